pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod machine;
pub mod probe;

#[cfg(test)]
mod testing;

pub use error::{Result, TalosmonError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
