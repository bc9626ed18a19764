//! Mock-server startup for sandboxes that may forbid binding localhost.
//!
//! Socket-bound tests call [`start_mock_server_or_skip`] and return early on
//! `None`. Setting `HARVESTER_REQUIRE_SOCKET_TESTS=1` turns the skip into a
//! panic so CI cannot silently pass without running them.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const REQUIRE_ENV: &str = "HARVESTER_REQUIRE_SOCKET_TESTS";

fn socket_tests_required() -> bool {
    std::env::var(REQUIRE_ENV)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a wiremock server, or returns `None` when localhost cannot be bound.
#[track_caller]
pub fn start_mock_server_or_skip() -> impl std::future::Future<Output = Option<MockServer>> {
    let bindable = TcpListener::bind("127.0.0.1:0").is_ok();
    let caller = Location::caller();
    if !bindable {
        let message = format!(
            "[socket-bound-test] {}:{} cannot bind a localhost socket",
            caller.file(),
            caller.line()
        );
        assert!(!socket_tests_required(), "{message} and {REQUIRE_ENV} is set");
        eprintln!("{message}; skipping");
    }
    async move {
        if bindable {
            Some(MockServer::start().await)
        } else {
            None
        }
    }
}
