//! Environment fingerprints: a hash over named host facts, recorded at
//! submission for provenance and compared on later runs to detect drift.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use jobward_core::{JobError, JobResult, PRODUCER_VERSION};
use jobward_events::EnvironmentFingerprint;

pub const DEFAULT_RULES: [&str; 3] = ["arch", "os", "producer_version"];

/// Resolves one fingerprint rule to a value.
pub trait FactSource: Send + Sync {
    fn fact(&self, rule: &str) -> JobResult<String>;
}

/// Facts about the running host.
///
/// Supported rules: `os`, `arch`, `family`, `producer_version`, `cwd`,
/// `hostname` and `env:<KEY>` (empty when unset).
#[derive(Debug, Default, Copy, Clone)]
pub struct HostFacts;

impl FactSource for HostFacts {
    fn fact(&self, rule: &str) -> JobResult<String> {
        match rule {
            "os" => Ok(std::env::consts::OS.to_string()),
            "arch" => Ok(std::env::consts::ARCH.to_string()),
            "family" => Ok(std::env::consts::FAMILY.to_string()),
            "producer_version" => Ok(PRODUCER_VERSION.to_string()),
            "cwd" => std::env::current_dir()
                .map(|p| p.display().to_string())
                .map_err(|e| JobError::from(e).with_detail("rule", rule)),
            "hostname" => Ok(hostname()),
            _ => match rule.strip_prefix("env:") {
                Some(key) if !key.is_empty() => Ok(std::env::var(key).unwrap_or_default()),
                _ => Err(unsupported(rule)),
            },
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn unsupported(rule: &str) -> JobError {
    JobError::invalid_input(format!("unsupported environment fingerprint rule '{rule}'"))
        .with_detail("rule", rule)
}

/// Fixed facts, for tests and replays on another host.
#[derive(Debug, Default, Clone)]
pub struct StaticFacts(pub BTreeMap<String, String>);

impl FactSource for StaticFacts {
    fn fact(&self, rule: &str) -> JobResult<String> {
        self.0.get(rule).cloned().ok_or_else(|| unsupported(rule))
    }
}

/// Trim, drop empties, dedupe and sort; fall back to [`DEFAULT_RULES`].
pub fn normalize_rules(rules: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = rules
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    if normalized.is_empty() {
        normalized = DEFAULT_RULES.iter().map(|r| r.to_string()).collect();
    }
    normalized
}

#[derive(Serialize)]
struct HashInput<'a> {
    rules: &'a [String],
    values: &'a BTreeMap<String, String>,
}

/// Resolve every rule and hash `{rules, values}` as compact JSON with sorted keys.
pub fn compute(rules: &[String], facts: &dyn FactSource) -> JobResult<EnvironmentFingerprint> {
    let rules = normalize_rules(rules);
    let values = rules
        .iter()
        .map(|rule| Ok((rule.clone(), facts.fact(rule)?)))
        .collect::<JobResult<BTreeMap<_, _>>>()?;

    let bytes = serde_json::to_vec(&HashInput {
        rules: &rules,
        values: &values,
    })
    .map_err(|e| JobError::invalid_input(format!("fingerprint serialization failed: {e}")))?;

    Ok(EnvironmentFingerprint {
        hash: hex::encode(Sha256::digest(&bytes)),
        rules,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(pairs: &[(&str, &str)]) -> StaticFacts {
        StaticFacts(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn rules_are_normalized_with_defaults() {
        assert_eq!(normalize_rules(&[]), vec!["arch", "os", "producer_version"]);
        let rules = vec![" os ".to_string(), "arch".to_string(), "os".to_string(), "".to_string()];
        assert_eq!(normalize_rules(&rules), vec!["arch", "os"]);
    }

    #[test]
    fn hash_is_order_independent_and_value_sensitive() {
        let linux = facts(&[("os", "linux"), ("arch", "x86_64")]);
        let a = compute(&["os".to_string(), "arch".to_string()], &linux).unwrap();
        let b = compute(&["arch".to_string(), "os".to_string()], &linux).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);

        let mac = facts(&[("os", "macos"), ("arch", "x86_64")]);
        let c = compute(&["os".to_string(), "arch".to_string()], &mac).unwrap();
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn host_facts_support_env_rules_and_reject_unknown() {
        let value = HostFacts.fact("env:JOBWARD_SURELY_UNSET_VARIABLE").unwrap();
        assert_eq!(value, "");
        assert_eq!(HostFacts.fact("os").unwrap(), std::env::consts::OS);
        assert!(HostFacts.fact("kernel_magic").is_err());
        assert!(HostFacts.fact("env:").is_err());
    }
}
