//! Utilities for testing code built on RPC endpoints. They are used for testing this crate
//!  itself, but they are also exported for application testing.

pub mod transport;
