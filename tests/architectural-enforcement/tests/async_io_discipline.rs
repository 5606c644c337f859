//! Integration Test: Async I/O Discipline
//!
//! **Policy**: relay production code waits on tokio timers and async I/O only.
//! **Exceptions**: the configuration loader reads its TOML file synchronously,
//! before any stream is served.

use std::path::Path;

use architectural_enforcement::{find_violations, production_lines, production_sources, report};

#[test]
fn test_sources_are_scanned() {
    let sources = production_sources();
    assert!(
        sources.iter().any(|p| p.ends_with("relay/core/src/lib.rs")),
        "relay-core sources not found: {sources:?}"
    );
    assert!(sources.iter().any(|p| p.ends_with("relay/daemon/src/main.rs")));
}

#[test]
fn test_test_modules_are_excluded() {
    let server = production_sources()
        .into_iter()
        .find(|p| p.ends_with("relay/daemon/src/server.rs"))
        .expect("server.rs present");
    let lines = production_lines(&server);
    assert!(!lines.is_empty());
    assert!(lines.iter().all(|(_, code)| !code.contains("mod tests")));
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = find_violations(&["thread::sleep("], |_| false);
    report(
        "thread-blocking sleep in production code (use tokio::time)",
        &violations,
    );
}

#[test]
fn test_no_blocking_network_io() {
    let violations = find_violations(
        &[
            "std::net::TcpStream",
            "std::net::TcpListener",
            "std::net::UdpSocket",
            "reqwest::blocking",
            "std::process::Command",
        ],
        |_| false,
    );
    report("blocking network or process I/O in production code", &violations);
}

#[test]
fn test_filesystem_access_only_in_config_loader() {
    let violations = find_violations(&["std::fs", "File::open", "File::create"], |path: &Path| {
        path.components().any(|c| c.as_os_str() == "config")
    });
    report("filesystem access outside the config loader", &violations);
}
