//! runguard: execution and resource-governance core for user-submitted scripts
//! Screens submitted source, launches it as a supervised child process and
//! polices memory/CPU/time ceilings while streaming output to a durable log.

pub mod cli;
pub mod config;
pub mod deps;
pub mod governor;
pub mod language;
pub mod logsink;
pub mod persist;
pub mod registry;
pub mod sandbox;
pub mod screen;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod types;
