//! External collaborators
//!
//! The message repository and tool registry are consumed through narrow
//! interfaces. In-memory implementations back the daemon and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::protocol::{Message, ProtocolError, Role, ToolCall};

/// Messages returned by [`MessageRepository::list`]
pub const LIST_LIMIT: usize = 100;

/// Default page size for cursor pagination
pub const PAGE_SIZE: usize = 20;

/// Welcome message seeded into a fresh conversation
pub const WELCOME_TEXT: &str = "Hi there! I'm ready to stream responses and run tools.";

// =============================================================================
// Message Repository
// =============================================================================

/// Message persistence
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Most recent messages (at most [`LIST_LIMIT`]), oldest first
    async fn list(&self) -> Vec<Message>;

    /// Store a message
    async fn add(&self, message: Message);
}

/// Process-local message store
#[derive(Debug, Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository holding the welcome message
    #[must_use]
    pub fn with_welcome() -> Self {
        let repo = Self::new();
        repo.messages
            .write()
            .push(Message::assistant(WELCOME_TEXT).with_id("welcome"));
        repo
    }

    /// Number of stored messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Check if the repository is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn list(&self) -> Vec<Message> {
        let messages = self.messages.read();
        let start = messages.len().saturating_sub(LIST_LIMIT);
        messages[start..].to_vec()
    }

    async fn add(&self, message: Message) {
        self.messages.write().push(message);
    }
}

/// Body of a message-creation request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    /// Author
    pub role: Role,
    /// Text content; must not be empty
    pub content: String,
    /// Tool calls to attach
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl CreateMessage {
    /// Check the request before it is stored
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidRequest` for empty content.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.content.is_empty() {
            return Err(ProtocolError::InvalidRequest(
                "content must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and stamp with a fresh id and the current time
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidRequest` for empty content.
    pub fn into_message(self) -> Result<Message, ProtocolError> {
        self.validate()?;
        let mut message = Message::new(self.role, self.content);
        message.tool_calls = self.tool_calls;
        Ok(message)
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// One page of messages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// Messages on this page
    pub items: Vec<Message>,
    /// Id to pass as `cursor` for the next page; absent on a short page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Page through `messages`
///
/// The page starts right after the message whose id is `cursor`; an absent
/// or unknown cursor starts from the beginning. A full page carries its last
/// id as the next cursor.
#[must_use]
pub fn page(messages: &[Message], cursor: Option<&str>, size: usize) -> MessagePage {
    let start = cursor
        .and_then(|cursor| messages.iter().position(|m| m.id == cursor))
        .map_or(0, |index| index + 1);
    let items: Vec<Message> = messages.iter().skip(start).take(size).cloned().collect();
    let next_cursor = if size > 0 && items.len() == size {
        items.last().map(|m| m.id.clone())
    } else {
        None
    };
    MessagePage { items, next_cursor }
}

// =============================================================================
// Tool Registry
// =============================================================================

/// Tool metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Registry id (used in routes and tool calls)
    pub id: String,
    /// Display name
    pub name: String,
    /// One-line description
    pub description: String,
}

impl ToolDescriptor {
    /// Create a descriptor
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Read-only tool metadata lookup
#[derive(Clone, Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Create a registry from descriptors
    #[must_use]
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    /// All tools, in registration order
    #[must_use]
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Look up a tool by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.id == id)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(vec![
            ToolDescriptor::new("web-search", "Web Search", "Queries indexed sources."),
            ToolDescriptor::new("code-executor", "Code Executor", "Runs sandboxed code."),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numbered(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::user(format!("m{i}")).with_id(format!("id-{i}")))
            .collect()
    }

    fn ids(page: &MessagePage) -> Vec<&str> {
        page.items.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_returns_most_recent_hundred() {
        let repo = InMemoryMessageRepository::new();
        for message in numbered(120) {
            repo.add(message).await;
        }

        let listed = repo.list().await;
        assert_eq!(listed.len(), LIST_LIMIT);
        assert_eq!(listed[0].id, "id-20");
        assert_eq!(listed[99].id, "id-119");
    }

    #[tokio::test]
    async fn test_welcome_seed() {
        let repo = InMemoryMessageRepository::with_welcome();
        let listed = repo.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "welcome");
        assert_eq!(listed[0].content, WELCOME_TEXT);
    }

    #[test]
    fn test_pagination_walks_all_messages() {
        let messages = numbered(45);

        let first = page(&messages, None, PAGE_SIZE);
        assert_eq!(first.items.len(), 20);
        assert_eq!(first.next_cursor.as_deref(), Some("id-19"));

        let second = page(&messages, first.next_cursor.as_deref(), PAGE_SIZE);
        assert_eq!(ids(&second)[0], "id-20");

        let third = page(&messages, second.next_cursor.as_deref(), PAGE_SIZE);
        assert_eq!(third.items.len(), 5);
        assert_eq!(third.next_cursor, None);
    }

    #[test]
    fn test_unknown_cursor_starts_over() {
        let messages = numbered(3);
        let result = page(&messages, Some("missing"), PAGE_SIZE);
        assert_eq!(ids(&result), vec!["id-0", "id-1", "id-2"]);
    }

    #[test]
    fn test_page_serializes_camel_case() {
        let value = serde_json::to_value(page(&numbered(20), None, PAGE_SIZE)).unwrap();
        assert_eq!(value["nextCursor"], "id-19");
    }

    #[test]
    fn test_create_message_requires_content() {
        let request: CreateMessage =
            serde_json::from_value(serde_json::json!({"role": "user", "content": ""})).unwrap();
        assert!(matches!(
            request.into_message(),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_create_message_stamps_id() {
        let request: CreateMessage = serde_json::from_value(serde_json::json!({
            "role": "assistant",
            "content": "ok",
            "toolCalls": [{"id": "t1", "name": "web-search", "status": "queued"}]
        }))
        .unwrap();

        let message = request.into_message().unwrap();
        assert!(!message.id.is_empty());
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.tool_calls().len(), 1);
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ToolRegistry::default();
        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.get("web-search").unwrap().name, "Web Search");
        assert!(registry.get("missing").is_none());
    }
}
