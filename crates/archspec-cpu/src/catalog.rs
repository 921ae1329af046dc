//! Catalog construction: raw document in, frozen microarchitecture graph out.
//!
//! Parents are filled before their children, so every node is built exactly
//! once with its ancestry precomputed. Dangling parents, cycles, malformed
//! version specs and multi-rooted ancestries are all rejected here — a
//! catalog that builds successfully never fails at query time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use crate::alias::AliasRule;
use crate::error::CatalogError;
use crate::flags::CompilerEntry;
use crate::microarchitecture::Microarchitecture;
use crate::schema::{Conversions, RawMicroarchitecture, TargetsDocument};
use crate::version::VersionSpec;

/// The frozen set of known microarchitectures plus the alias tables.
#[derive(Debug)]
pub struct Catalog {
    targets: BTreeMap<String, Arc<Microarchitecture>>,
    aliases: Vec<AliasRule>,
    conversions: Conversions,
}

impl Catalog {
    /// The process-wide catalog, built once on first access.
    ///
    /// The build honors `ARCHSPEC_CPU_DIR` and `ARCHSPEC_EXTENSION_CPU_DIR`;
    /// concurrent first-touch is serialized, and a failed build replays the
    /// same error to every caller.
    pub fn shared() -> Result<&'static Catalog, CatalogError> {
        static SHARED: OnceLock<Result<Catalog, CatalogError>> = OnceLock::new();
        SHARED
            .get_or_init(|| TargetsDocument::load().and_then(Catalog::from_document))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Build a catalog from a raw knowledge-base document.
    pub fn from_document(doc: TargetsDocument) -> Result<Catalog, CatalogError> {
        let mut targets = BTreeMap::new();
        let mut in_progress = BTreeSet::new();
        for name in doc.microarchitectures.keys() {
            fill(name, &doc.microarchitectures, &mut targets, &mut in_progress)?;
        }

        for node in targets.values() {
            check_single_family(node)?;
        }

        Ok(Catalog {
            targets,
            aliases: doc.feature_aliases,
            conversions: doc.conversions,
        })
    }

    /// Look up a microarchitecture by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Microarchitecture>> {
        self.targets.get(name)
    }

    /// All catalog names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// All nodes, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Microarchitecture>> {
        self.targets.values()
    }

    /// Number of known microarchitectures.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True when the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Every node whose family root carries the given name.
    pub fn family_members(&self, family: &str) -> Vec<&Arc<Microarchitecture>> {
        self.targets
            .values()
            .filter(|m| m.family().name() == family)
            .collect()
    }

    /// The alias rules, in declaration order.
    pub fn aliases(&self) -> &[AliasRule] {
        &self.aliases
    }

    /// The secondary aliasing tables.
    pub fn conversions(&self) -> &Conversions {
        &self.conversions
    }
}

/// Recursively build `name` and everything it inherits from.
fn fill(
    name: &str,
    raw: &BTreeMap<String, RawMicroarchitecture>,
    targets: &mut BTreeMap<String, Arc<Microarchitecture>>,
    in_progress: &mut BTreeSet<String>,
) -> Result<(), CatalogError> {
    if targets.contains_key(name) {
        return Ok(());
    }
    if !in_progress.insert(name.to_string()) {
        return Err(CatalogError::Cycle {
            name: name.to_string(),
        });
    }

    let definition = &raw[name];
    let mut parents = Vec::with_capacity(definition.parents.len());
    for parent in &definition.parents {
        if !raw.contains_key(parent) {
            return Err(CatalogError::DanglingParent {
                child: name.to_string(),
                parent: parent.clone(),
            });
        }
        fill(parent, raw, targets, in_progress)?;
        parents.push(Arc::clone(&targets[parent]));
    }

    let compilers = parse_compilers(name, definition)?;
    let features = definition.features.iter().cloned().collect();
    let node = Microarchitecture::new(
        name,
        parents,
        definition.vendor.clone(),
        features,
        compilers,
        definition.generation,
    );

    in_progress.remove(name);
    targets.insert(name.to_string(), node);
    Ok(())
}

fn parse_compilers(
    name: &str,
    definition: &RawMicroarchitecture,
) -> Result<BTreeMap<String, Vec<CompilerEntry>>, CatalogError> {
    let mut compilers = BTreeMap::new();
    for (compiler, entries) in &definition.compilers {
        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            let versions = VersionSpec::parse(&entry.versions).map_err(|e| {
                CatalogError::InvalidVersionSpec {
                    name: name.to_string(),
                    compiler: compiler.clone(),
                    spec: entry.versions.clone(),
                    detail: e.to_string(),
                }
            })?;
            parsed.push(CompilerEntry {
                versions,
                flags: entry.flags.clone(),
                name: entry.name.clone(),
                warnings: entry.warnings.clone(),
            });
        }
        compilers.insert(compiler.clone(), parsed);
    }
    Ok(compilers)
}

/// Every compatibility class must be single-rooted.
fn check_single_family(node: &Microarchitecture) -> Result<(), CatalogError> {
    let roots: Vec<&str> = node
        .ancestors()
        .iter()
        .filter(|a| a.parents().is_empty())
        .map(|a| a.name())
        .collect();
    if roots.len() > 1 {
        return Err(CatalogError::MultipleFamilies {
            name: node.name().to_string(),
            roots: roots.join(", "),
        });
    }
    Ok(())
}
