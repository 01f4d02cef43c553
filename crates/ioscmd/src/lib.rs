// Library exports for testing
pub mod cli;
pub mod commands;
pub mod config;
pub mod remote;

pub use cli::{Cli, Commands, GlobalArgs};
pub use config::{FileConfig, Overrides, Settings};
pub use remote::{RemoteError, RemoteSession};
