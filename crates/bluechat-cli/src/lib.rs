//! BlueChat CLI library
//!
//! Command parsing, layered configuration, backend selection and the
//! interactive chat loop for the `bluechat` binary.

pub mod backend;
pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod demo;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, Backend};
pub use error::{CliError, Result};
