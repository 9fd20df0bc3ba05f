//! Relay usage, direct links and traced paths.
//!
//! Paths arrive as ordered lists of short key prefixes. [`HopNodeTracker`]
//! counts how often each relay is used, [`DirectLinkGraph`] records which
//! neighbours were heard relaying for each other, and [`PathTracer`] turns a
//! path into located points for display.

pub mod links;
pub mod paths;
pub mod usage;

pub use {
    links::{DirectLinkGraph, LinkStat},
    paths::{Admission, PathPoint, PathTrace, PathTracer},
    usage::{HopMarker, HopNodeTracker, HopUsage},
};
