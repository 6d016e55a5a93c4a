mod error;
pub use error::{ConfigError, ConnError, Result};

pub mod config;
pub mod connectors;
pub mod http;
