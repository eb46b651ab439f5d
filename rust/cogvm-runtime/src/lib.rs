//! cogvm Runtime
//!
//! Collaborator interfaces the VM talks to: the durable record store and the
//! sandboxed file accessor, with the built-in in-memory and filesystem
//! store implementations.

pub mod sandbox;
pub mod store;
