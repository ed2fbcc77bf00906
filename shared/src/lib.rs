//! Shared types and utilities for txpulse
//!
//! This crate contains the domain types exchanged between the metric stores,
//! the rule engine, the alert log and the live-update channel.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{finding::*, live::*, metric::*};
