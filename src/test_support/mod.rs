//! Helpers shared by unit tests that bind a localhost mock server.

#[path = "../../tests/support/socket_guard.rs"]
pub(crate) mod socket_guard;
