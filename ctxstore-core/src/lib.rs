//! Binary persistence for finite-context DNA models.
//!
//! This crate saves trained context models to a versioned binary file and
//! loads them back, including:
//! - Hash-table models (bounded collision chains, one bound per file)
//! - Dense counter-array models (four counters per probability slot)
//! - Header validation (magic, version, alphabet, hash width)
//! - Rebuilding of runtime-only state after a load
//! - A read-only inspector that never materialises payloads
//!
//! Low-level codecs are kept internal so that every payload goes through the
//! same size computation.

/// Error type carrying the failing stage and model index.
pub mod error;

/// Store-wide configuration.
pub mod config;

/// On-disk header and descriptor records, constants and payload sizes.
pub mod format;

/// Context models and their payloads.
pub mod model;

/// Payload codecs.
///
/// Not exposed
pub(crate) mod codec;

/// Save and load of complete model files.
pub mod store;

/// Read-only model file description.
pub mod inspect;

pub use config::StoreConfig;
pub use error::{ErrorKind, FormatError, Result, Stage, StoreError};
pub use format::{FormatHeader, ModelDescriptor, PayloadShape, StorageMode};
pub use inspect::{ModelFileInfo, ModelSummary, inspect_file, inspect_reader};
pub use model::{
	ContextModel, CounterArray, EditParams, HashEntry, HashTable, ModelParams, Payload, Provenance,
};
pub use store::{LoadedModels, ModelStore};
