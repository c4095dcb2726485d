pub mod breaker;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod io;
pub mod ledger;
pub mod logger;
pub mod parser;
pub mod paths;
pub mod phase_gate;
pub mod policy;
pub mod ports;
pub mod router;
pub mod services;
pub mod store;
pub mod tools;
pub mod types;

#[cfg(test)]
mod testing;

pub use dispatch::{ToolDispatcher, ToolResponse};
pub use engine::Engine;
pub use error::{PhaselaneError, Result};
pub use logger::StructuredLogger;
