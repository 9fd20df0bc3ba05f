//! The meshtrace engine.
//!
//! [`MeshEngine`] owns the correlator, the identity and location caches,
//! hop and link tracking, persistence and the snapshot histories. The host
//! feeds it decoded events and timer ticks; it never spawns tasks itself.

pub mod engine;
pub mod error;
pub mod sink;
pub mod summary;

pub use {
    engine::{HandleOutcome, MeshEngine, Tick, TickReport},
    error::{Error, Result},
    sink::{ExportSink, FileExportSink, InMemoryExportSink},
};
