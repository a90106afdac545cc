//! Shared test fixtures

pub mod mock_server;

pub use mock_server::{CommandRecord, MockConnector, MockServer, RefusingConnector, mock_key_hash};
