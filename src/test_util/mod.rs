//! This module contains utilities that are useful for testing code based on RON clients. They are
//!  used for testing the client itself, but they are also exported for application testing, which
//!  is why they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod node;
pub mod sim_network;
pub mod trace;
