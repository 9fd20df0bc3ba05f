//! Shared types, error helpers, and utilities used across all meshtrace crates.

pub mod error;
pub mod names;
pub mod time;
pub mod types;

pub use {
    error::FromMessage,
    types::{Coordinate, NodeClass, NodeIdentity},
};
