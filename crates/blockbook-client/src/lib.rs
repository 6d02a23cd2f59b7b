//! Client for the Blockbook websocket API.
//!
//! A single websocket connection carries many concurrent JSON requests; each
//! response is matched to its caller by request id.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use backend::Backend;
pub use client::{websocket_url, BlockbookClient};
pub use config::ClientConfig;
pub use error::BackendError;
pub use types::{AccountInfo, AccountUtxo, TransactionData};
