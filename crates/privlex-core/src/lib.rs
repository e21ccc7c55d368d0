pub mod config;
pub mod error;
pub mod types;

pub use config::PrivlexConfig;
pub use error::{PrivlexError, Result};
pub use types::*;
