//! Knowledge-base document model, loading, and overlay merging.
//!
//! The knowledge base is a JSON document with top-level keys
//! `microarchitectures`, `feature_aliases` and `conversions`. A built-in copy
//! ships with the crate; `ARCHSPEC_CPU_DIR` replaces it wholesale and
//! `ARCHSPEC_EXTENSION_CPU_DIR` overlays it entry by entry.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::alias::AliasRule;
use crate::error::CatalogError;

/// Directory replacing the built-in knowledge base wholesale.
pub const CPU_DIR_ENV: &str = "ARCHSPEC_CPU_DIR";

/// Directory overlaying the knowledge base at top-level-attribute granularity.
pub const EXTENSION_CPU_DIR_ENV: &str = "ARCHSPEC_EXTENSION_CPU_DIR";

/// File name looked up inside either directory.
pub const TARGETS_FILE: &str = "microarchitectures.json";

const BUILTIN: &str = include_str!("../data/microarchitectures.json");

/// Raw knowledge-base document, before graph construction.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetsDocument {
    /// Microarchitecture definitions, keyed by name.
    pub microarchitectures: BTreeMap<String, RawMicroarchitecture>,
    /// Alias rules mapping raw host tokens to canonical features.
    #[serde(default)]
    pub feature_aliases: Vec<AliasRule>,
    /// Secondary aliasing tables for OS-specific raw tokens.
    #[serde(default)]
    pub conversions: Conversions,
}

/// One microarchitecture definition as written in the knowledge base.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMicroarchitecture {
    /// Direct parents, first parent preferred. Accepts the `parents` key
    /// emitted by [`crate::microarchitecture::Snapshot`] as well.
    #[serde(rename = "from", alias = "parents", default)]
    pub parents: Vec<String>,
    /// CPU vendor, or `"generic"` for family roots and compatibility levels.
    pub vendor: String,
    /// Features introduced by this node (ancestors' features are inherited).
    #[serde(default)]
    pub features: Vec<String>,
    /// Per-compiler entries, scanned in declaration order.
    #[serde(default)]
    pub compilers: BTreeMap<String, Vec<RawCompilerEntry>>,
    /// Generation within the compatibility class (POWER8 is 8, and so on).
    #[serde(default)]
    pub generation: u32,
}

/// One row of a compiler table as written in the knowledge base.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCompilerEntry {
    /// Version spec in the colon/comma grammar.
    pub versions: String,
    /// Flag template; `{name}` expands to `name` or the owning node's name.
    pub flags: String,
    /// The microarchitecture's name according to this compiler.
    #[serde(default)]
    pub name: Option<String>,
    /// Warning to surface alongside a successful render.
    #[serde(default)]
    pub warnings: Option<String>,
}

/// Secondary aliasing tables used while normalizing raw host tokens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Conversions {
    /// Lower-cased Darwin x86 feature token → Linux counterpart(s),
    /// space-separated.
    #[serde(default)]
    pub darwin_flags: BTreeMap<String, String>,
    /// AArch64 `CPU implementer` code → vendor string.
    #[serde(default)]
    pub arm_vendors: BTreeMap<String, String>,
    /// Raw RISC-V `uarch` value → catalog name.
    #[serde(default)]
    pub riscv_uarchs: BTreeMap<String, String>,
    /// RISC-V `uarch` vendor prefix → vendor string.
    #[serde(default)]
    pub riscv_vendors: BTreeMap<String, String>,
}

impl TargetsDocument {
    /// Load the document honoring `ARCHSPEC_CPU_DIR` and
    /// `ARCHSPEC_EXTENSION_CPU_DIR`.
    pub fn load() -> Result<Self, CatalogError> {
        let replacement = env::var_os(CPU_DIR_ENV).map(PathBuf::from);
        let extension = env::var_os(EXTENSION_CPU_DIR_ENV).map(PathBuf::from);
        Self::load_with(replacement.as_deref(), extension.as_deref())
    }

    /// Load the document from explicit directories.
    ///
    /// `replacement` substitutes the built-in data wholesale; `extension` is
    /// merged over the base at top-level-attribute granularity.
    pub fn load_with(
        replacement: Option<&Path>,
        extension: Option<&Path>,
    ) -> Result<Self, CatalogError> {
        let (mut base, origin) = match replacement {
            Some(dir) => (read_value(&dir.join(TARGETS_FILE))?, dir.display().to_string()),
            None => (parse_value(BUILTIN, "built-in")?, String::from("built-in")),
        };

        if let Some(dir) = extension {
            let overlay = read_value(&dir.join(TARGETS_FILE))?;
            merge(&mut base, overlay);
        }

        serde_json::from_value(base).map_err(|e| CatalogError::Parse {
            origin,
            detail: e.to_string(),
        })
    }
}

fn read_value(path: &Path) -> Result<Value, CatalogError> {
    let text = fs::read_to_string(path).map_err(|e| CatalogError::Io {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    parse_value(&text, &path.display().to_string())
}

fn parse_value(text: &str, origin: &str) -> Result<Value, CatalogError> {
    serde_json::from_str(text).map_err(|e| CatalogError::Parse {
        origin: origin.to_string(),
        detail: e.to_string(),
    })
}

/// Merge an overlay document into a base document.
///
/// For each top-level key whose value is an object on both sides, every
/// second-level entry of the overlay wholly replaces (or inserts) the base
/// entry of the same name. Any other overlay value replaces the base value
/// outright: a list has no named second-level entries.
fn merge(base: &mut Value, overlay: Value) {
    let Value::Object(overlay) = overlay else {
        *base = overlay;
        return;
    };
    let Value::Object(base) = base else {
        *base = Value::Object(overlay);
        return;
    };

    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(base_entries)), Value::Object(entries)) => {
                for (name, entry) in entries {
                    base_entries.insert(name, entry);
                }
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
