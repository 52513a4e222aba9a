//! Ledger network access for the token alert bot.
//!
//! Holds the streaming connection to a ledger server and turns ledger-closed
//! notifications into range scans for new trust lines.
//!
//! ## Architecture
//!
//! - `websocket` - Persistent stream connection with reconnect/backoff
//! - `manager` - Connection state machine and stream configuration
//! - `monitor` - Cursor owner; sequential notification handling
//! - `range` / `scanner` - Range fetching and trust-line extraction

pub mod error;
pub mod manager;
pub mod message;
pub mod monitor;
pub mod range;
pub mod scanner;
pub mod websocket;

pub use error::*;
pub use manager::*;
pub use message::{LedgerClosed, ResponseFrame, StreamEvent};
pub use monitor::*;
pub use range::*;
pub use scanner::*;
pub use websocket::*;
