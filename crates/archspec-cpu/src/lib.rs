//! Labels for CPU microarchitectures, fine-grained enough to reason about
//! binary compatibility and compiler code generation.
//!
//! The crate answers three questions:
//! - What microarchitecture is this host, and which other microarchitectures
//!   can run its binaries? ([`host`], the ordering on [`Microarchitecture`])
//! - Does a microarchitecture support a given feature?
//!   ([`Microarchitecture::contains`])
//! - Which flags must a compiler at a given version use to emit code
//!   optimized for it? ([`Microarchitecture::optimization_flags`])
//!
//! Known microarchitectures come from a built-in JSON knowledge base,
//! replaceable via `ARCHSPEC_CPU_DIR` and extensible via
//! `ARCHSPEC_EXTENSION_CPU_DIR`; they form a DAG per architecture family
//! ([`Catalog`]), with features inherited along the `parents` edges.

pub mod alias;
pub mod catalog;
pub mod detect;
pub mod error;
pub mod flags;
pub mod microarchitecture;
pub mod schema;
pub mod version;

pub use catalog::Catalog;
pub use detect::{host, HostRecord, Probe};
pub use error::{CatalogError, FlagsError};
pub use microarchitecture::{
    generic_microarchitecture, microarchitecture_max, microarchitecture_min, Microarchitecture,
    Snapshot, GENERIC_VENDOR,
};
pub use version::{version_components, Version, VersionSpec};
