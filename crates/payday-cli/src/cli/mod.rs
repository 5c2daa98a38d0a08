pub mod commands;
pub mod config;
pub mod protocol;
pub mod tracing_setup;

pub use commands::execute;
pub use config::CliConfig;
pub use protocol::{CliCommand, Response};
