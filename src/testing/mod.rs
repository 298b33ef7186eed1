//! Testing utilities and mock implementations
//!
//! Mock stage collaborators and an in-memory artifact store for driving the
//! pipeline without external programs or files on disk.

pub mod mocks;

pub use mocks::*;
