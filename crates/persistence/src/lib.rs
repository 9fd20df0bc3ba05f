//! Durable storage for derived state.
//!
//! Collections are JSON documents of the form
//! `{<field>: {key: entry}, count, saved_at, saved_at_formatted}`. Entries
//! implement [`Expire`] so every save drops what has aged out. Writes are
//! coalesced per collection with a [`WriteCoalescer`].

pub mod coalesce;
pub mod collection;
pub mod error;
pub mod expire;
pub mod store;
pub mod store_file;
pub mod store_memory;

pub use {
    coalesce::WriteCoalescer,
    collection::{Collection, PersistenceStore, SaveReport},
    error::{Error, Result},
    expire::{Expire, prune_map},
    store::DocumentStore,
    store_file::FileDocumentStore,
    store_memory::InMemoryDocumentStore,
};
