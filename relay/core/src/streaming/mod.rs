//! Event Stream Sessions
//!
//! Server-originated event streams, both ends:
//!
//! - [`StreamSession`]: an outbound byte channel plus the timers that write to it
//! - [`StreamProducer`]: plays the scripted response into a session
//! - [`StreamConsumer`] / [`consume`]: decodes a byte stream into typed events
//!
//! # Example
//!
//! ```ignore
//! let producer = StreamProducer::default();
//! let stream = producer.start(&StreamRequest::new("weather"), &cancel)?;
//!
//! let body = stream.into_stream().map(Ok::<_, Infallible>);
//! consume(body, &cancel, |event| reducer.handle(event)).await?;
//! ```

mod consumer;
mod producer;
mod session;

pub use consumer::{consume, ConsumeOutcome, ConsumerError, ConsumerEvent, StreamConsumer};
pub use producer::{ProducerConfig, ProducerStream, StreamProducer, DEFAULT_HEARTBEAT_MS};
pub use session::StreamSession;
