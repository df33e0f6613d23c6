//! TCP plumbing shared by both roles: the connection handshake and the
//! reader/writer task pair that owns each socket half.

mod connection;
mod handshake;

pub use connection::{spawn_reader, spawn_writer, ConnectionEvent};
pub use handshake::{accept, join};
