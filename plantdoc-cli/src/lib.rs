//! Command-line launcher for the PlantDoc knowledge base.
//!
//! - `plantdoc build` loads a dataset file and indexes it
//! - `plantdoc ask` answers one question
//! - `plantdoc chat` answers questions interactively
//! - `plantdoc inspect` describes the persisted index

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::{Cli, Command};
pub use commands::run;
