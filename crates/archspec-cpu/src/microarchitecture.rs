//! The microarchitecture entity and its comparison algebra.
//!
//! A microarchitecture is a node in a family DAG: its `parents` are the
//! microarchitectures whose binaries it can run, its `features` are the CPU
//! capabilities it introduces on top of them. Ordering follows ancestry, not
//! feature sets — two nodes that share features but are not linked through
//! `parents` are incomparable.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FlagsError;
use crate::flags::{self, CompilerEntry};

/// Vendor string marking family roots and compatibility levels.
pub const GENERIC_VENDOR: &str = "generic";

/// A specific CPU microarchitecture.
///
/// Nodes are immutable once the catalog is built and are shared by
/// reference; children hold non-owning-in-spirit `Arc`s to their parents
/// (the graph is acyclic, so no reference cycles can form).
#[derive(Debug)]
pub struct Microarchitecture {
    name: String,
    parents: Vec<Arc<Microarchitecture>>,
    ancestors: Vec<Arc<Microarchitecture>>,
    vendor: String,
    features: BTreeSet<String>,
    compilers: BTreeMap<String, Vec<CompilerEntry>>,
    generation: u32,
}

impl Microarchitecture {
    /// Build a node from its parts, precomputing the ancestor chain.
    ///
    /// Ancestors are ordered parents-first, then each parent's own ancestors
    /// in turn, deduplicated on first occurrence; the last element is always
    /// the family root.
    pub(crate) fn new(
        name: impl Into<String>,
        parents: Vec<Arc<Microarchitecture>>,
        vendor: impl Into<String>,
        features: BTreeSet<String>,
        compilers: BTreeMap<String, Vec<CompilerEntry>>,
        generation: u32,
    ) -> Arc<Microarchitecture> {
        let mut ancestors = parents.clone();
        for parent in &parents {
            for ancestor in &parent.ancestors {
                if !ancestors.iter().any(|a| a.name == ancestor.name) {
                    ancestors.push(Arc::clone(ancestor));
                }
            }
        }
        Arc::new(Microarchitecture {
            name: name.into(),
            parents,
            ancestors,
            vendor: vendor.into(),
            features,
            compilers,
            generation,
        })
    }

    /// The unique, case-sensitive name (e.g. `"broadwell"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The CPU vendor, or [`GENERIC_VENDOR`] for vendor-neutral nodes.
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Direct parents, first parent preferred.
    pub fn parents(&self) -> &[Arc<Microarchitecture>] {
        &self.parents
    }

    /// Features introduced by this node, excluding inherited ones.
    pub fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    /// Per-compiler optimization entries, in declaration order.
    pub fn compilers(&self) -> &BTreeMap<String, Vec<CompilerEntry>> {
        &self.compilers
    }

    /// Generation within the compatibility class; 0 when irrelevant.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// All ancestors, self excluded, parents-first and deduplicated.
    pub fn ancestors(&self) -> &[Arc<Microarchitecture>] {
        &self.ancestors
    }

    /// The family root this node belongs to (itself for roots).
    pub fn family(&self) -> &Microarchitecture {
        self.ancestors.last().map(AsRef::as_ref).unwrap_or(self)
    }

    /// The most specific vendor-neutral node compatible with this one.
    ///
    /// For `broadwell` this is `x86_64_v3`: the best compatibility level a
    /// binary can target and still run here.
    pub fn generic(&self) -> &Microarchitecture {
        std::iter::once(self)
            .chain(self.ancestors.iter().map(AsRef::as_ref))
            .filter(|m| m.vendor == GENERIC_VENDOR)
            .max_by_key(|m| m.ancestors.len())
            .unwrap_or(self)
    }

    /// Whether this node supports a feature, inherited ones included.
    pub fn contains(&self, feature: &str) -> bool {
        self.features.contains(feature)
            || self.ancestors.iter().any(|a| a.features.contains(feature))
    }

    /// The full feature set: own features plus everything inherited.
    pub fn inherited_features(&self) -> BTreeSet<String> {
        let mut all = self.features.clone();
        for ancestor in &self.ancestors {
            all.extend(ancestor.features.iter().cloned());
        }
        all
    }

    /// Compiler flags that produce code optimized for this node.
    ///
    /// Unknown compilers yield an empty string; a known compiler whose table
    /// has no matching version range is [`FlagsError::UnsupportedMicroarchitecture`].
    /// Callers that want the entry's warning as well should use
    /// [`flags::render`].
    pub fn optimization_flags(&self, compiler: &str, version: &str) -> Result<String, FlagsError> {
        flags::render(self, compiler, version).map(|rendered| rendered.flags)
    }

    /// A serializable snapshot of this node.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            features: self.features.iter().cloned().collect(),
            parents: self.parents.iter().map(|p| p.name.clone()).collect(),
            generation: self.generation,
        }
    }

    /// Render the ancestor DAG as an indented tree, one node per line.
    pub fn tree(&self) -> String {
        let mut out = String::new();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<(usize, &Microarchitecture)> = vec![(0, self)];
        while let Some((level, node)) = stack.pop() {
            out.push_str(&" ".repeat(level));
            out.push_str(&node.name);
            out.push('\n');
            if !seen.insert(&node.name) {
                continue;
            }
            for parent in node.parents.iter().rev() {
                stack.push((level + 4, parent.as_ref()));
            }
        }
        out
    }
}

/// A serializable view of a node: name, vendor, *own* features (sorted),
/// parent names, and generation.
///
/// The `parents` key is accepted by the knowledge-base loader, so a snapshot
/// can be fed back through an overlay directory unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub vendor: String,
    pub features: Vec<String>,
    pub parents: Vec<String>,
    #[serde(default)]
    pub generation: u32,
}

/// Identity is by name: the catalog guarantees names are unique.
impl PartialEq for Microarchitecture {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Microarchitecture {}

impl Hash for Microarchitecture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// The compatibility partial order: `a < b` iff `a` is an ancestor of `b`,
/// i.e. binaries built for `a` run on `b`. Nodes in different families (or
/// unrelated branches of one family) are incomparable.
impl PartialOrd for Microarchitecture {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if other.ancestors.iter().any(|a| a.name == self.name) {
            Some(Ordering::Less)
        } else if self.ancestors.iter().any(|a| a.name == other.name) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl fmt::Display for Microarchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The more generic of two comparable nodes, `None` if incomparable.
pub fn microarchitecture_min<'a>(
    a: &'a Microarchitecture,
    b: &'a Microarchitecture,
) -> Option<&'a Microarchitecture> {
    if a <= b {
        Some(a)
    } else if b <= a {
        Some(b)
    } else {
        None
    }
}

/// The more specific of two comparable nodes, `None` if incomparable.
pub fn microarchitecture_max<'a>(
    a: &'a Microarchitecture,
    b: &'a Microarchitecture,
) -> Option<&'a Microarchitecture> {
    if a <= b {
        Some(b)
    } else if b <= a {
        Some(a)
    } else {
        None
    }
}

/// A featureless, vendor-neutral node with the given name.
///
/// Used as the degraded result of a failed host probe, and as the fallback
/// when the host's architecture tag has no catalog entry.
pub fn generic_microarchitecture(name: &str) -> Arc<Microarchitecture> {
    Microarchitecture::new(
        name,
        Vec::new(),
        GENERIC_VENDOR,
        BTreeSet::new(),
        BTreeMap::new(),
        0,
    )
}
