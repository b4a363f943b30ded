//! Trait-based storage abstractions with an in-memory reference backend.
//!
//! Production deployments supply their own implementations of the traits in
//! [`traits`]; the resumption store in particular must be reachable from
//! every process instance, since a suspended flow may resume anywhere.

pub mod inmemory;
pub mod traits;

pub use inmemory::MemoryStorage;
pub use traits::*;
