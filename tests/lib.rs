//! Integration test support for the SMP client workspace.

pub mod fixtures;
