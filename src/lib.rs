//! sigwatch - live candlestick signal engine with a durable track record

pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

pub use error::{AppError, Result};
