//! Token classification engine.
//!
//! Decides whether a trust-line candidate points at a token this process has
//! not alerted on yet, and enriches new tokens with best-effort market data.

pub mod classifier;
pub mod market;
pub mod novelty;

pub use classifier::*;
pub use market::*;
pub use novelty::*;
