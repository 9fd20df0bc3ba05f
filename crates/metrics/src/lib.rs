//! Metrics collection and export for meshtrace.
//!
//! This crate provides the metric names used by the engine and the recorder
//! setup. Emission goes through the `metrics` crate facade, so nothing is
//! recorded unless a recorder is installed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use meshtrace_metrics::{correlation, counter};
//!
//! counter!(correlation::RECEPTIONS_TOTAL).increment(1);
//! ```
//!
//! # Features
//!
//! - `prometheus`: install a Prometheus recorder whose text rendering is
//!   written next to the JSON exports

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
