//! Shared tabflow model types.
//!
//! Pure data types used by the engine and the state backend. Kept in their
//! own crate so both sides can share them without circular dependencies.

pub mod policy;
pub mod state;
