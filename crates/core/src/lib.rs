//! GameLink Core - Shared error and state types for the connection layer

mod error;
mod types;

pub use error::*;
pub use types::*;
