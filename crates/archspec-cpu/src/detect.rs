//! Host CPU detection and best-node selection.
//!
//! Detection runs in three steps: a platform probe produces a raw record,
//! alias rules canonicalize the record's feature tokens, and selection picks
//! the deepest catalog node whose inherited feature set the host satisfies.
//!
//! Probes never fail the caller: unreadable files, missing binaries and
//! unparseable output all degrade to a generic record, which selection turns
//! into the family root (or a bare generic node for unknown architectures).

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use crate::alias::{self, AliasContext};
use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::microarchitecture::{generic_microarchitecture, Microarchitecture, GENERIC_VENDOR};
use crate::schema::Conversions;

const MACHDEP_CPU_VENDOR: &str = "machdep.cpu.vendor";
const MACHDEP_CPU_BRAND_STRING: &str = "machdep.cpu.brand_string";
const MACHDEP_CPU_FEATURES: &str = "machdep.cpu.features";
const MACHDEP_CPU_LEAF7_FEATURES: &str = "machdep.cpu.leaf7_features";
const MACHDEP_CPU_EXTFEATURES: &str = "machdep.cpu.extfeatures";

/// Raw information gathered on the host CPU, before canonicalization.
#[derive(Debug, Clone, Default)]
pub struct HostRecord {
    /// Probed vendor string; empty when the probe could not tell.
    pub vendor: String,
    /// Raw feature tokens, as reported by the operating system.
    pub features: BTreeSet<String>,
    /// Model or brand information, when available.
    pub model: Option<String>,
    /// The x86 `cpu family` value, when available.
    pub family: Option<String>,
    /// POWER generation (8 for POWER8); 0 everywhere else.
    pub generation: u32,
    /// Every other key/value pair the probe saw (`/proc/cpuinfo` fields,
    /// the `hw.optional.*` namespace).
    pub extra: BTreeMap<String, String>,
}

impl HostRecord {
    /// The degraded record used when probing fails.
    pub fn generic() -> Self {
        HostRecord {
            vendor: GENERIC_VENDOR.to_string(),
            ..Default::default()
        }
    }
}

/// Platform-specific probing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Linux-like systems: parse `/proc/cpuinfo`.
    Linux,
    /// Darwin-like systems: invoke `sysctl`.
    Darwin,
    /// Everything else: produce a generic record.
    Fallback,
}

impl Probe {
    /// The strategy for the operating system this library was built for.
    pub fn current() -> Probe {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Probe::Linux
        } else if cfg!(target_os = "macos") {
            Probe::Darwin
        } else {
            Probe::Fallback
        }
    }

    /// Operating-system identity as seen by alias rules.
    pub fn os(&self) -> &'static str {
        match self {
            Probe::Linux => "linux",
            Probe::Darwin => "darwin",
            Probe::Fallback => "unknown",
        }
    }

    /// Run the probe. Failures degrade to [`HostRecord::generic`].
    pub fn collect(&self, conversions: &Conversions) -> HostRecord {
        let record = match self {
            Probe::Linux => linux_record(conversions),
            Probe::Darwin => darwin_record(conversions),
            Probe::Fallback => Ok(HostRecord::generic()),
        };
        record.unwrap_or_else(|_| HostRecord::generic())
    }
}

/// The host's architecture tag, normalized to knowledge-base names.
pub fn architecture() -> &'static str {
    match env::consts::ARCH {
        // Rust does not distinguish POWER endianness in ARCH.
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// Detect the host microarchitecture against the shared catalog.
pub fn host() -> Result<Arc<Microarchitecture>, CatalogError> {
    Ok(host_with(Catalog::shared()?))
}

/// Detect the host microarchitecture against an explicit catalog.
pub fn host_with(catalog: &Catalog) -> Arc<Microarchitecture> {
    let probe = Probe::current();
    let record = probe.collect(catalog.conversions());
    let architecture = host_architecture(probe, &record);
    select(catalog, probe.os(), &record, &architecture)
}

/// The architecture tag to select against.
///
/// On Darwin the compile-time architecture lies under Rosetta, so the brand
/// string decides: an Apple CPU is aarch64 no matter what this binary was
/// built for.
fn host_architecture(probe: Probe, record: &HostRecord) -> String {
    if probe == Probe::Darwin {
        let brand = record
            .extra
            .get(MACHDEP_CPU_BRAND_STRING)
            .map(String::as_str)
            .unwrap_or("");
        let tag = if brand.contains("Apple") { "aarch64" } else { "x86_64" };
        return tag.to_string();
    }
    architecture().to_string()
}

/// Pick the best catalog node for a canonicalized host record.
///
/// Candidates are the members of the architecture's family whose vendor
/// matches (vendor-neutral nodes always qualify), whose generation does not
/// exceed the host's, and whose full inherited feature set the host
/// satisfies. Among those the deepest node wins, then the highest
/// generation, then the lexicographically greatest name. An empty candidate
/// set falls back to the family root, and an architecture with no catalog
/// root yields a bare generic node.
pub fn select(
    catalog: &Catalog,
    os: &str,
    record: &HostRecord,
    architecture: &str,
) -> Arc<Microarchitecture> {
    let Some(root) = catalog.get(architecture) else {
        return generic_microarchitecture(architecture);
    };

    let ctx = AliasContext {
        os,
        vendor: &record.vendor,
        features: &record.features,
        extra: &record.extra,
    };
    let canonical = alias::canonicalize(catalog.aliases(), &ctx);

    let best = catalog
        .family_members(root.name())
        .into_iter()
        .filter(|node| node.vendor() == GENERIC_VENDOR || node.vendor() == record.vendor)
        .filter(|node| record.generation == 0 || node.generation() <= record.generation)
        .filter(|node| {
            node.inherited_features()
                .iter()
                .all(|f| canonical.contains(f))
        })
        .max_by(|a, b| selection_key(a).cmp(&selection_key(b)));

    match best {
        Some(node) => Arc::clone(node),
        None => Arc::clone(root),
    }
}

fn selection_key(node: &Microarchitecture) -> (usize, u32, &str) {
    (node.ancestors().len(), node.generation(), node.name())
}

// --- Linux ---

fn linux_record(conversions: &Conversions) -> io::Result<HostRecord> {
    let text = fs::read_to_string("/proc/cpuinfo")?;
    Ok(parse_cpuinfo(&text, architecture(), conversions))
}

/// Parse the first processor block of a `/proc/cpuinfo` dump.
fn parse_cpuinfo(text: &str, architecture: &str, conversions: &Conversions) -> HostRecord {
    let mut data: BTreeMap<String, String> = BTreeMap::new();
    for line in text.lines() {
        match line.split_once(':') {
            Some((key, value)) => {
                data.insert(key.trim().to_string(), value.trim().to_string());
            }
            // A separator-less line after populated data is the blank line
            // between two processors; only the first block matters.
            None if !data.is_empty() => break,
            None => {}
        }
    }

    let mut record = HostRecord {
        vendor: GENERIC_VENDOR.to_string(),
        ..Default::default()
    };

    match architecture {
        "x86_64" => {
            if let Some(vendor) = data.get("vendor_id") {
                record.vendor = vendor.clone();
            }
            record.features = split_tokens(data.get("flags"));
            record.family = data.get("cpu family").cloned();
            record.model = data
                .get("model name")
                .or_else(|| data.get("model"))
                .cloned();
        }
        "aarch64" => {
            if let Some(code) = data.get("CPU implementer") {
                record.vendor = conversions
                    .arm_vendors
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| code.clone());
            }
            record.features = split_tokens(data.get("Features"));
            record.model = data.get("CPU part").cloned();
        }
        "ppc64le" | "ppc64" => {
            let cpu = data.get("cpu").map(String::as_str).unwrap_or("");
            // Emulated hosts report the emulator's cpuinfo; no POWER match
            // means no generation and a generic record.
            if let Some(generation) = power_generation(cpu) {
                record.vendor = "IBM".to_string();
                record.generation = generation;
                record.model = Some(cpu.to_string());
            }
        }
        "riscv64" | "riscv32" => {
            if let Some(uarch) = data.get("uarch") {
                record.model = Some(
                    conversions
                        .riscv_uarchs
                        .get(uarch)
                        .cloned()
                        .unwrap_or_else(|| uarch.clone()),
                );
                if let Some((prefix, _)) = uarch.split_once(',') {
                    if let Some(vendor) = conversions.riscv_vendors.get(prefix) {
                        record.vendor = vendor.clone();
                    }
                }
            }
        }
        _ => {}
    }

    record.extra = data;
    record
}

/// Extract the generation from a POWER cpu string (`"POWER9 (raw)"` → 9).
fn power_generation(cpu: &str) -> Option<u32> {
    let rest = &cpu[cpu.find("POWER")? + "POWER".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn split_tokens(value: Option<&String>) -> BTreeSet<String> {
    value
        .map(String::as_str)
        .unwrap_or("")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

// --- Darwin ---

fn darwin_record(conversions: &Conversions) -> io::Result<HostRecord> {
    let mut data = parse_sysctl_output(&sysctl(&[
        "-i",
        MACHDEP_CPU_VENDOR,
        MACHDEP_CPU_BRAND_STRING,
        MACHDEP_CPU_FEATURES,
        MACHDEP_CPU_LEAF7_FEATURES,
        MACHDEP_CPU_EXTFEATURES,
    ])?);
    // The hw.optional namespace drives the Apple Silicon alias rules; its
    // absence is not an error.
    if let Ok(optional) = sysctl(&["hw.optional"]) {
        data.extend(parse_sysctl_output(&optional));
    }
    Ok(darwin_record_from(data, conversions))
}

/// Parse `sysctl` output lines of the form `key: value`.
fn parse_sysctl_output(text: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once(": ") {
            data.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    data
}

/// Build a record from sysctl key/value pairs.
fn darwin_record_from(
    data: BTreeMap<String, String>,
    conversions: &Conversions,
) -> HostRecord {
    let brand = data
        .get(MACHDEP_CPU_BRAND_STRING)
        .cloned()
        .unwrap_or_default();

    let mut record = HostRecord {
        vendor: GENERIC_VENDOR.to_string(),
        ..Default::default()
    };

    if brand.contains("Apple") {
        record.vendor = "Apple".to_string();
        record.model = Some(apple_model(&brand));
    } else {
        if let Some(vendor) = data.get(MACHDEP_CPU_VENDOR) {
            record.vendor = vendor.clone();
        }
        let mut features: BTreeSet<String> = BTreeSet::new();
        for key in [
            MACHDEP_CPU_FEATURES,
            MACHDEP_CPU_LEAF7_FEATURES,
            MACHDEP_CPU_EXTFEATURES,
        ] {
            features.extend(
                data.get(key)
                    .map(String::as_str)
                    .unwrap_or("")
                    .split_whitespace()
                    .map(str::to_lowercase),
            );
        }
        // Darwin names some x86 features differently from Linux; a
        // conversion applies once all of its Darwin tokens are present.
        for (darwin_tokens, linux_tokens) in &conversions.darwin_flags {
            if darwin_tokens
                .split_whitespace()
                .all(|t| features.contains(t))
            {
                features.extend(linux_tokens.split_whitespace().map(str::to_string));
            }
        }
        record.features = features;
        record.model = Some(brand.clone());
    }

    record.extra = data;
    record
}

/// The Apple Silicon model encoded in a brand string, defaulting to `m1`.
fn apple_model(brand: &str) -> String {
    let brand = brand.to_lowercase();
    for model in ["m4", "m3", "m2", "m1"] {
        if brand.contains(model) {
            return model.to_string();
        }
    }
    "m1".to_string()
}

/// Run `sysctl`, making sure `/sbin` and `/usr/sbin` are searched.
fn sysctl(args: &[&str]) -> io::Result<String> {
    let path = env::var_os("PATH").unwrap_or_default();
    let mut search: Vec<PathBuf> = env::split_paths(&path).collect();
    for extra in ["/sbin", "/usr/sbin"] {
        let extra = PathBuf::from(extra);
        if !search.contains(&extra) {
            search.push(extra);
        }
    }
    let mut command = Command::new("sysctl");
    command.args(args);
    if let Ok(joined) = env::join_paths(search) {
        command.env("PATH", joined);
    }
    let output = command.output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
