pub mod action;
pub mod action_list;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod network;
pub mod repl;
pub mod replica;
pub mod sequencer;
pub mod tournament;
pub mod wire;

pub use config::CONFIG;

#[cfg(test)]
mod tests;
