//! Configuration loading, validation, and env substitution.
//!
//! Config files: `meshtrace.toml`, `meshtrace.yaml`, or `meshtrace.json`
//! Searched in `./` then `~/.config/meshtrace/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, default_data_dir, discover_and_load, load_config},
    schema::{
        CorrelationConfig, ExportConfig, HopsConfig, IdentityConfig, MeshtraceConfig,
        MetricsConfig, PersistenceConfig, RegistryConfig, SnapshotsConfig, StorageConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
