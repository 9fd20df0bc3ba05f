//! Node identity: the registry seam, display-name resolution and
//! coordinate lookup.
//!
//! Senders show up as display names in channel traffic and as short key
//! prefixes in relay paths. [`IdentityResolver`] maps names to canonical
//! keys; [`LocationResolver`] maps keys, names and prefixes to positions.

pub mod error;
pub mod location;
pub mod registry;
pub mod registry_file;
pub mod registry_memory;
pub mod resolver;

pub use {
    error::{Error, Result},
    location::{Location, LocationResolver, PrefixPreference},
    registry::NodeRegistry,
    registry_file::FileRegistry,
    registry_memory::InMemoryRegistry,
    resolver::IdentityResolver,
};
