//! Order-processing core for a simulated options-trading exchange.
//!
//! The crate is organised the way the original Python service's
//! `intern_trading_game` package is: a data model, an order book + matching
//! engines, a constraint validator, a phase-aware venue, a response
//! coordinator bridging sync callers to the async pipeline, and the
//! five-stage pipeline itself. None of these modules know about HTTP or
//! WebSockets directly — `main.rs` wires them to axum for the illustrative
//! demo binary.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fees;
pub mod matching;
pub mod model;
pub mod orderbook;
pub mod phase;
pub mod pipeline;
pub mod position;
pub mod validator;
pub mod venue;
pub mod ws;

pub use config::AppConfig;
pub use error::{ApiError, ErrorKind};
