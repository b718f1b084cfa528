//! Application wiring and command implementations.

mod commands;
mod init;

pub use init::App;
