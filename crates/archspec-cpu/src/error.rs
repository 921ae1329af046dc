//! Error types for catalog construction and flag resolution.

use std::path::PathBuf;

/// Errors raised while building the microarchitecture catalog.
///
/// All of these surface at load time; a successfully built catalog never
/// produces them. The type is `Clone` because the shared catalog caches the
/// outcome of its one-shot build and replays a failure to every caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    /// A knowledge-base file could not be read.
    #[error("cannot read {}: {detail}", path.display())]
    Io {
        /// The file that failed to load.
        path: PathBuf,
        /// Stringified I/O error.
        detail: String,
    },

    /// A knowledge-base document is not valid JSON or violates the schema.
    #[error("malformed knowledge base ({origin}): {detail}")]
    Parse {
        /// Where the document came from (file path or "built-in").
        origin: String,
        /// Stringified deserialization error.
        detail: String,
    },

    /// A microarchitecture names a parent that is not in the catalog.
    #[error("microarchitecture '{child}' references unknown parent '{parent}'")]
    DanglingParent {
        /// The node whose `from` list is broken.
        child: String,
        /// The missing parent name.
        parent: String,
    },

    /// The `from` relations contain a cycle.
    #[error("cycle in microarchitecture graph involving '{name}'")]
    Cycle {
        /// A node on the cycle.
        name: String,
    },

    /// A node's ancestry reaches more than one family root.
    #[error("microarchitecture '{name}' belongs to multiple families [{roots}]")]
    MultipleFamilies {
        /// The offending node.
        name: String,
        /// Comma-joined root names.
        roots: String,
    },

    /// A compiler entry carries a version spec that does not parse.
    #[error(
        "invalid version spec '{spec}' for compiler '{compiler}' \
         on microarchitecture '{name}': {detail}"
    )]
    InvalidVersionSpec {
        /// The node declaring the entry.
        name: String,
        /// The compiler the entry belongs to.
        compiler: String,
        /// The offending spec string.
        spec: String,
        /// What was wrong with it.
        detail: String,
    },
}

/// Errors raised when resolving compiler optimization flags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlagsError {
    /// The compiler is known to the microarchitecture, but no version range
    /// in its table matches the requested version.
    #[error(
        "cannot produce optimized binary for microarchitecture '{name}' \
         with {compiler}@{version} [supported compiler versions are {supported}]"
    )]
    UnsupportedMicroarchitecture {
        /// The microarchitecture the flags were requested for.
        name: String,
        /// The requested compiler.
        compiler: String,
        /// The requested compiler version.
        version: String,
        /// Comma-joined union of the table's version specs.
        supported: String,
    },

    /// The requested compiler version has no numeric component.
    #[error("invalid compiler version '{version}': dot-separated digits expected")]
    InvalidCompilerVersion {
        /// The offending version string.
        version: String,
    },
}
