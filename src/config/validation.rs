//! Unknown-key detection with Levenshtein suggestions.
//!
//! The raw TOML is first parsed into a `toml::Value`, its key tree walked
//! and compared against the known field names. Unknown keys only warn;
//! serde deserialization then runs as usual.

use std::collections::HashSet;

/// A non-fatal config warning.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `ServiceConfig`.
///
/// Kept by hand in step with service_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [server]
        "server",
        "server.addr",
        // [transport]
        "transport",
        "transport.topic_prefix",
        "transport.silence_warning_secs",
        "transport.reconnect_max_attempts",
        // [classifier]
        "classifier",
        "classifier.escalation_threshold",
        "classifier.primary",
        "classifier.primary.kind",
        "classifier.primary.model_path",
        "classifier.primary.timeout_ms",
        "classifier.secondary",
        "classifier.secondary.kind",
        "classifier.secondary.endpoint",
        "classifier.secondary.api_key_env",
        "classifier.secondary.timeout_ms",
        // [archiver]
        "archiver",
        "archiver.kind",
        "archiver.dir",
        "archiver.public_base_url",
        "archiver.upload_url",
        "archiver.folder",
        "archiver.max_bytes",
        "archiver.timeout_ms",
        // [store]
        "store",
        "store.backend",
        "store.data_dir",
        "store.scan_limit",
        // [pipeline]
        "pipeline",
        "pipeline.workers",
        "pipeline.ingest_queue_capacity",
        "pipeline.retry_interval_secs",
        "pipeline.dead_letter_max_entries",
        // [health]
        "health",
        "health.interval_secs",
        "health.min_free_disk_mb",
        "health.dead_letter_backlog_warning",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known key within edit distance 3. Ties go to the
/// lexicographically smaller key.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Entry point
// ============================================================================

/// Warnings for every unknown key in a raw TOML document.
///
/// Parse errors are left for serde to report.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("workers", "workers"), 0);
        assert_eq!(levenshtein("workrs", "workers"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [classifier.secondary]
            kind = "remote"
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"classifier".to_string()));
        assert!(keys.contains(&"classifier.secondary".to_string()));
        assert!(keys.contains(&"classifier.secondary.kind".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys("[store]\nscan_limt = 200\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "store.scan_limt");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("store.scan_limit"));
    }

    #[test]
    fn test_valid_document_produces_no_warnings() {
        let toml_str = r#"
[server]
addr = "127.0.0.1:9000"

[classifier]
escalation_threshold = 0.6

[classifier.primary]
kind = "heuristic"

[pipeline]
workers = 4
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn test_garbage_key_has_no_suggestion() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key", &known).is_none());
    }
}
