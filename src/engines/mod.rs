//! Speech host implementations.
//!
//! This module contains [`SpeechHost`](crate::SpeechHost) implementations
//! that ship with the crate.
//!
//! # Available Hosts
//!
//! - `scripted` - in-memory host driven by hand, for tests and demos

pub mod scripted;
