//! Utilities for testing the engine without live databases.
//!
//! [`memory::MemoryDatabase`] implements every tier trait in memory and can inject connection
//! and statement failures. [`fixtures`] builds the tables, specs and settings shared by tests.

pub mod fixtures;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod memory;
