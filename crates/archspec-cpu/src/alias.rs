//! Feature alias resolution.
//!
//! Host probes report raw, OS-flavored feature tokens. Alias rules rewrite
//! those into the canonical names used by the catalog, either
//! unconditionally or gated on vendor, operating system, the presence or
//! absence of other raw tokens, or the value of an OS-sourced key.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

/// One alias rule: emit `feature` when the rule fires.
///
/// Rules are evaluated in declaration order; a rule with no predicate fields
/// beyond `raw` fires whenever one of its raw tokens is present.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasRule {
    /// Canonical feature added to the probed set.
    pub feature: String,
    /// Raw tokens that imply the feature; any one suffices.
    #[serde(default)]
    pub raw: Vec<String>,
    /// Required vendor. Absent or `"any_vendor"` matches every vendor.
    #[serde(default)]
    pub vendor: Option<String>,
    /// Required operating system (`"linux"` or `"darwin"`).
    #[serde(default)]
    pub os: Option<String>,
    /// Raw tokens that must all be present.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Raw tokens that must all be absent.
    #[serde(default)]
    pub absent: Vec<String>,
    /// OS-sourced key (e.g. a `sysctl` leaf) that must be present.
    #[serde(default)]
    pub key: Option<String>,
    /// Literal value the key must hold. Without it, any non-zero,
    /// non-empty value counts.
    #[serde(default)]
    pub value: Option<String>,
}

/// Context an alias rule is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct AliasContext<'a> {
    /// Operating system identity, `"linux"` or `"darwin"` (anything else
    /// fails every OS-gated rule).
    pub os: &'a str,
    /// Probed vendor string.
    pub vendor: &'a str,
    /// Raw feature tokens reported by the probe.
    pub features: &'a BTreeSet<String>,
    /// OS-sourced key/value pairs (e.g. the `hw.optional.*` namespace).
    pub extra: &'a BTreeMap<String, String>,
}

impl AliasRule {
    /// Whether every predicate of this rule holds in the given context.
    pub fn applies(&self, ctx: &AliasContext<'_>) -> bool {
        if let Some(os) = &self.os {
            if ctx.os != os {
                return false;
            }
        }
        match self.vendor.as_deref() {
            None | Some("any_vendor") => {}
            Some(vendor) => {
                if ctx.vendor != vendor {
                    return false;
                }
            }
        }
        if !self.raw.is_empty() && !self.raw.iter().any(|t| ctx.features.contains(t)) {
            return false;
        }
        if !self.requires.iter().all(|t| ctx.features.contains(t)) {
            return false;
        }
        if self.absent.iter().any(|t| ctx.features.contains(t)) {
            return false;
        }
        if let Some(key) = &self.key {
            let Some(value) = ctx.extra.get(key) else {
                return false;
            };
            match &self.value {
                Some(expected) => {
                    if value != expected {
                        return false;
                    }
                }
                None => {
                    if value.is_empty() || value == "0" {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Rewrite a probed raw feature set into canonical catalog features.
///
/// Raw tokens pass through unchanged; every rule that fires adds its
/// canonical feature on top. The result is deduplicated by construction.
pub fn canonicalize(rules: &[AliasRule], ctx: &AliasContext<'_>) -> BTreeSet<String> {
    let mut canonical = ctx.features.clone();
    for rule in rules {
        if rule.applies(ctx) {
            canonical.insert(rule.feature.clone());
        }
    }
    canonical
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(tokens: &[&str]) -> BTreeSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn rule(json: serde_json::Value) -> AliasRule {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn unconditional_rule_fires_on_raw_token() {
        let rules = vec![rule(serde_json::json!({"feature": "sse3", "raw": ["pni"]}))];
        let feats = features(&["pni", "mmx"]);
        let extra = BTreeMap::new();
        let ctx = AliasContext {
            os: "linux",
            vendor: "GenuineIntel",
            features: &feats,
            extra: &extra,
        };
        let canonical = canonicalize(&rules, &ctx);
        assert!(canonical.contains("sse3"));
        // Raw tokens pass through.
        assert!(canonical.contains("pni"));
        assert!(canonical.contains("mmx"));
    }

    #[test]
    fn vendor_gate() {
        let rules = vec![rule(serde_json::json!({
            "feature": "sse4a", "raw": ["sse4a"], "vendor": "AuthenticAMD"
        }))];
        let feats = features(&["sse4a"]);
        let extra = BTreeMap::new();

        let amd = AliasContext {
            os: "linux",
            vendor: "AuthenticAMD",
            features: &feats,
            extra: &extra,
        };
        assert!(rules[0].applies(&amd));

        let intel = AliasContext {
            os: "linux",
            vendor: "GenuineIntel",
            features: &feats,
            extra: &extra,
        };
        assert!(!rules[0].applies(&intel));
    }

    #[test]
    fn any_vendor_matches_everything() {
        let r = rule(serde_json::json!({
            "feature": "x", "raw": ["x_raw"], "vendor": "any_vendor"
        }));
        let feats = features(&["x_raw"]);
        let extra = BTreeMap::new();
        let ctx = AliasContext {
            os: "linux",
            vendor: "whatever",
            features: &feats,
            extra: &extra,
        };
        assert!(r.applies(&ctx));
    }

    #[test]
    fn os_gate() {
        let r = rule(serde_json::json!({
            "feature": "lahf_lm", "raw": ["lahf"], "os": "darwin"
        }));
        let feats = features(&["lahf"]);
        let extra = BTreeMap::new();
        let darwin = AliasContext {
            os: "darwin",
            vendor: "GenuineIntel",
            features: &feats,
            extra: &extra,
        };
        let linux = AliasContext {
            os: "linux",
            ..darwin
        };
        assert!(r.applies(&darwin));
        assert!(!r.applies(&linux));
    }

    #[test]
    fn requires_and_absent() {
        let r = rule(serde_json::json!({
            "feature": "xop", "raw": ["xop"], "requires": ["fma4"], "absent": ["hypervisor"]
        }));
        let extra = BTreeMap::new();

        let both = features(&["xop", "fma4"]);
        let ctx = AliasContext {
            os: "linux",
            vendor: "AuthenticAMD",
            features: &both,
            extra: &extra,
        };
        assert!(r.applies(&ctx));

        let missing = features(&["xop"]);
        let ctx = AliasContext {
            features: &missing,
            ..ctx
        };
        assert!(!r.applies(&ctx));

        let blocked = features(&["xop", "fma4", "hypervisor"]);
        let ctx = AliasContext {
            features: &blocked,
            ..ctx
        };
        assert!(!r.applies(&ctx));
    }

    #[test]
    fn key_value_gate() {
        let r = rule(serde_json::json!({
            "feature": "asimddp",
            "os": "darwin",
            "vendor": "Apple",
            "key": "hw.optional.arm.FEAT_DotProd"
        }));
        let feats = BTreeSet::new();

        let mut extra = BTreeMap::new();
        extra.insert("hw.optional.arm.FEAT_DotProd".to_string(), "1".to_string());
        let ctx = AliasContext {
            os: "darwin",
            vendor: "Apple",
            features: &feats,
            extra: &extra,
        };
        assert!(r.applies(&ctx));

        // "0" is falsy without an explicit expected value.
        let mut zeroed = BTreeMap::new();
        zeroed.insert("hw.optional.arm.FEAT_DotProd".to_string(), "0".to_string());
        let ctx = AliasContext {
            extra: &zeroed,
            ..ctx
        };
        assert!(!r.applies(&ctx));

        // Missing key never fires.
        let empty = BTreeMap::new();
        let ctx = AliasContext {
            extra: &empty,
            ..ctx
        };
        assert!(!r.applies(&ctx));
    }

    #[test]
    fn literal_value_match() {
        let r = rule(serde_json::json!({
            "feature": "marked", "key": "some.key", "value": "yes"
        }));
        let feats = BTreeSet::new();
        let mut yes = BTreeMap::new();
        yes.insert("some.key".to_string(), "yes".to_string());
        let ctx = AliasContext {
            os: "linux",
            vendor: "generic",
            features: &feats,
            extra: &yes,
        };
        assert!(r.applies(&ctx));

        let mut no = BTreeMap::new();
        no.insert("some.key".to_string(), "no".to_string());
        let ctx = AliasContext { extra: &no, ..ctx };
        assert!(!r.applies(&ctx));
    }

    #[test]
    fn unknown_tokens_pass_through() {
        let rules: Vec<AliasRule> = Vec::new();
        let feats = features(&["totally_new_flag"]);
        let extra = BTreeMap::new();
        let ctx = AliasContext {
            os: "linux",
            vendor: "generic",
            features: &feats,
            extra: &extra,
        };
        let canonical = canonicalize(&rules, &ctx);
        assert!(canonical.contains("totally_new_flag"));
        assert_eq!(canonical.len(), 1);
    }
}
