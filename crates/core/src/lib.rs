//! Core data types for the token alert bot.

pub mod ledger;
pub mod subscriber;
pub mod token;

pub use ledger::*;
pub use subscriber::*;
pub use token::*;
