//! wardenctl library - CLI definition, commands and rendering
//!
//! Exposed as a library so the argument surface and renderers can be tested.

pub mod cli;
pub mod commands;
pub mod output;
pub mod prompt;
