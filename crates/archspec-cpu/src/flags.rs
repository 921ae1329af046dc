//! Compiler optimization-flag rendering.
//!
//! Each node may carry per-compiler tables of `(version spec, flag template)`
//! entries. Rendering walks the node and then its ancestors for a table,
//! picks the first entry whose spec matches the requested version, and
//! substitutes `{name}` tokens.
//!
//! The two failure modes are deliberately asymmetric: a compiler with no
//! table anywhere is simply unknown (empty string), while a table with no
//! matching version range means the compiler is known to be unable to target
//! the node (hard error listing the supported ranges).

use crate::error::FlagsError;
use crate::microarchitecture::Microarchitecture;
use crate::version::{Version, VersionSpec};

/// One row of a node's compiler table, with the version spec already parsed.
#[derive(Debug, Clone)]
pub struct CompilerEntry {
    /// Versions this entry applies to; entries are scanned in declaration
    /// order and the first match wins, so overlaps are fine.
    pub versions: VersionSpec,
    /// Flag template; every `{name}` token is substituted on render.
    pub flags: String,
    /// Name of the microarchitecture according to this compiler, when it
    /// differs from the catalog name (e.g. `thunderx2t99`).
    pub name: Option<String>,
    /// Warning surfaced alongside a successful render.
    pub warnings: Option<String>,
}

/// A successful flag resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// The flag string, `{name}` tokens substituted.
    pub flags: String,
    /// The matched entry's warning, if it declared one.
    pub warning: Option<String>,
}

/// Resolve the optimization flags for `target` under `compiler` at `version`.
///
/// The compiler table is looked up on `target` first, then on its ancestors
/// in ancestry order; `{name}` renders as the entry's `name` override or the
/// name of the node that owns the table.
pub fn render(
    target: &Microarchitecture,
    compiler: &str,
    version: &str,
) -> Result<Rendered, FlagsError> {
    let owner = std::iter::once(target)
        .chain(target.ancestors().iter().map(AsRef::as_ref))
        .find(|node| node.compilers().contains_key(compiler));

    // No table anywhere: the compiler is unknown to this family branch.
    let Some(owner) = owner else {
        return Ok(Rendered {
            flags: String::new(),
            warning: None,
        });
    };

    let requested =
        Version::parse(version).ok_or_else(|| FlagsError::InvalidCompilerVersion {
            version: version.to_string(),
        })?;

    let entries = &owner.compilers()[compiler];
    for entry in entries {
        if entry.versions.matches(&requested) {
            let name = entry.name.as_deref().unwrap_or_else(|| owner.name());
            return Ok(Rendered {
                flags: entry.flags.replace("{name}", name),
                warning: entry.warnings.clone(),
            });
        }
    }

    let supported = entries
        .iter()
        .map(|e| e.versions.source())
        .collect::<Vec<_>>()
        .join(", ");
    Err(FlagsError::UnsupportedMicroarchitecture {
        name: target.name().to_string(),
        compiler: compiler.to_string(),
        version: version.to_string(),
        supported,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use super::*;

    fn entry(versions: &str, flags: &str, name: Option<&str>, warnings: Option<&str>) -> CompilerEntry {
        CompilerEntry {
            versions: VersionSpec::parse(versions).unwrap(),
            flags: flags.to_string(),
            name: name.map(str::to_string),
            warnings: warnings.map(str::to_string),
        }
    }

    fn node(
        name: &str,
        parents: Vec<Arc<Microarchitecture>>,
        compilers: BTreeMap<String, Vec<CompilerEntry>>,
    ) -> Arc<Microarchitecture> {
        Microarchitecture::new(name, parents, "generic", BTreeSet::new(), compilers, 0)
    }

    fn sample() -> Arc<Microarchitecture> {
        let mut root_compilers = BTreeMap::new();
        root_compilers.insert(
            "gcc".to_string(),
            vec![entry("4.2:", "-march={name} -mtune=generic", Some("base-64"), None)],
        );
        let root = node("base", vec![], root_compilers);

        let mut compilers = BTreeMap::new();
        compilers.insert(
            "gcc".to_string(),
            vec![
                entry("4.6:4.8.5", "-march={name} -mtune={name}", Some("oldname"), None),
                entry("4.9:", "-march={name} -mtune={name}", None, None),
            ],
        );
        compilers.insert(
            "oneapi".to_string(),
            vec![entry(
                "2021:",
                "-march={name}",
                None,
                Some("oneapi support is provisional"),
            )],
        );
        node("chip", vec![root], compilers)
    }

    #[test]
    fn first_matching_entry_wins() {
        let chip = sample();
        // 4.8 matches only the first entry, which carries a name override.
        let rendered = render(&chip, "gcc", "4.8").unwrap();
        assert_eq!(rendered.flags, "-march=oldname -mtune=oldname");
        // 4.9 falls through to the second entry, rendered with the node name.
        let rendered = render(&chip, "gcc", "4.9").unwrap();
        assert_eq!(rendered.flags, "-march=chip -mtune=chip");
    }

    #[test]
    fn no_unrendered_tokens_remain() {
        let chip = sample();
        let rendered = render(&chip, "gcc", "12.0").unwrap();
        assert!(!rendered.flags.contains("{name}"));
    }

    #[test]
    fn warning_is_surfaced_with_the_flags() {
        let chip = sample();
        let rendered = render(&chip, "oneapi", "2023.1").unwrap();
        assert_eq!(rendered.flags, "-march=chip");
        assert_eq!(
            rendered.warning.as_deref(),
            Some("oneapi support is provisional")
        );
    }

    #[test]
    fn unknown_compiler_is_empty_string() {
        let chip = sample();
        let rendered = render(&chip, "crayftn", "10.0").unwrap();
        assert_eq!(rendered.flags, "");
        assert!(rendered.warning.is_none());
    }

    #[test]
    fn unknown_compiler_short_circuits_version_validation() {
        let chip = sample();
        assert_eq!(render(&chip, "crayftn", "not-a-version").unwrap().flags, "");
    }

    #[test]
    fn version_below_every_range_is_unsupported() {
        let chip = sample();
        let err = render(&chip, "gcc", "4.5").unwrap_err();
        match err {
            FlagsError::UnsupportedMicroarchitecture {
                name,
                compiler,
                version,
                supported,
            } => {
                assert_eq!(name, "chip");
                assert_eq!(compiler, "gcc");
                assert_eq!(version, "4.5");
                assert_eq!(supported, "4.6:4.8.5, 4.9:");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unsupported_message_names_everything() {
        let chip = sample();
        let message = render(&chip, "gcc", "4.5").unwrap_err().to_string();
        assert!(message.contains("chip"));
        assert!(message.contains("gcc@4.5"));
        assert!(message.contains("4.6:4.8.5"));
        assert!(message.contains("4.9:"));
    }

    #[test]
    fn invalid_version_is_rejected_for_known_compilers() {
        let chip = sample();
        let err = render(&chip, "gcc", "banana").unwrap_err();
        assert!(matches!(err, FlagsError::InvalidCompilerVersion { .. }));
    }

    #[test]
    fn ancestor_table_is_used_with_the_ancestor_name() {
        let mut compilers = BTreeMap::new();
        compilers.insert(
            "gcc".to_string(),
            vec![entry("4.2:", "-march={name}", None, None)],
        );
        let root = node("base", vec![], compilers);
        let leaf = node("leaf", vec![root], BTreeMap::new());

        // leaf has no gcc table; base's entry renders with base's name.
        let rendered = render(&leaf, "gcc", "9.0").unwrap();
        assert_eq!(rendered.flags, "-march=base");
    }
}
