pub mod cli;
pub mod command;
pub mod config;
pub mod runtime;
