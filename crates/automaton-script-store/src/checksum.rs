use automaton_core_types::{OrchestratorError, Script};
use sha2::{Digest, Sha256};

/// SHA-256 over the canonicalized JSON of a Script with its `checksum`
/// field cleared. `serde_json::Value`'s map is a
/// `BTreeMap` by default, so re-serializing through `Value` already yields
/// alphabetically sorted object keys — that's the canonical form.
pub fn compute(script: &Script) -> Result<String, OrchestratorError> {
    let mut value = serde_json::to_value(script).map_err(|e| OrchestratorError::ResourceInit {
        reason: format!("failed to serialize script for checksum: {e}"),
    })?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("checksum");
    }
    let canonical = serde_json::to_string(&value).map_err(|e| OrchestratorError::ResourceInit {
        reason: format!("failed to canonicalize script json: {e}"),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_core_types::{ScriptId, ScriptOrigin, VariableSchema};
    use chrono::Utc;

    fn sample() -> Script {
        Script {
            id: ScriptId::new(),
            name: "sample".into(),
            created_at: Utc::now(),
            last_run_at: None,
            origin: ScriptOrigin::Authored,
            initial_url: "https://example.test".into(),
            actions: Vec::new(),
            schema: VariableSchema::default(),
            checksum: None,
        }
    }

    #[test]
    fn checksum_is_stable_across_checksum_field_changes() {
        let mut a = sample();
        a.id = ScriptId::new();
        let mut b = a.clone();
        b.checksum = Some("stale".into());
        b.id = a.id;
        assert_eq!(compute(&a).unwrap(), compute(&b).unwrap());
    }

    #[test]
    fn checksum_changes_with_content() {
        let a = sample();
        let mut b = a.clone();
        b.id = ScriptId::new();
        b.name = "different".into();
        assert_ne!(compute(&a).unwrap(), compute(&b).unwrap());
    }
}
