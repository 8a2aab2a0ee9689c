pub mod bigquery;
pub mod cli;
pub mod gcs;
pub mod load_config;
pub mod postgres;

pub use cli::{run, Cli, Commands};
