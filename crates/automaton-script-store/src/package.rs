use std::io::{Read, Write};

use automaton_core_types::{Action, OrchestratorError, Script, Variable};
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// Portable export/import unit. Variables never carry stored
/// values regardless of sensitivity — callers supply them again at
/// execution time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptPackage {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub variables: Vec<Variable>,
    pub actions: Vec<Action>,
    pub metadata: PackageMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    pub checksum: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub compatibility: Compatibility,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Compatibility {
    pub features: Vec<String>,
}

const CURRENT_VERSION: &str = "1.0.0";
const SUPPORTED_FEATURES: &[&str] = &["targets.fallbacks", "variables.sensitive"];

impl ScriptPackage {
    /// Build a package from a Script, redacting sensitive values and
    /// recomputing the checksum over the package body.
    pub fn from_script(script: &Script) -> Result<Self, OrchestratorError> {
        let mut variables = script.schema.variables.clone();
        for v in &mut variables {
            v.value = None;
        }
        let mut package = ScriptPackage {
            name: script.name.clone(),
            version: CURRENT_VERSION.to_string(),
            author: None,
            description: None,
            variables,
            actions: script.actions.clone(),
            metadata: PackageMetadata {
                created_at: script.created_at,
                compatibility: Compatibility { features: SUPPORTED_FEATURES.to_vec() },
            },
            dependencies: Vec::new(),
            checksum: String::new(),
        };
        package.checksum = package.compute_checksum()?;
        Ok(package)
    }

    fn compute_checksum(&self) -> Result<String, OrchestratorError> {
        let mut value = serde_json::to_value(self).map_err(|e| OrchestratorError::ResourceInit {
            reason: format!("failed to serialize package for checksum: {e}"),
        })?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("checksum");
        }
        let canonical = serde_json::to_string(&value).map_err(|e| OrchestratorError::ResourceInit {
            reason: format!("failed to canonicalize package json: {e}"),
        })?;
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn verify_checksum(&self) -> Result<bool, OrchestratorError> {
        Ok(self.compute_checksum()? == self.checksum)
    }

    /// Validate version/feature compatibility before import.
    pub fn validate_compatibility(&self) -> Result<(), OrchestratorError> {
        if !is_semver(&self.version) {
            return Err(OrchestratorError::SchemaMismatch {
                reason: format!("package version '{}' is not valid semver", self.version),
            });
        }
        for feature in &self.metadata.compatibility.features {
            if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: format!("unsupported package feature '{feature}'"),
                });
            }
        }
        for variable in &self.variables {
            if Variable::is_reserved(&variable.name) {
                return Err(OrchestratorError::ReservedName(variable.name.clone()));
            }
            if !Variable::name_is_valid(&variable.name) {
                return Err(OrchestratorError::InvalidName(variable.name.clone()));
            }
            if let Some(pattern) = &variable.pattern {
                if regex::Regex::new(pattern).is_err() {
                    return Err(OrchestratorError::SchemaMismatch {
                        reason: format!("variable '{}' has an uncompilable pattern", variable.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Serialize, gzip, and base64-wrap the package for transport.
    pub fn to_compressed_string(&self) -> Result<String, OrchestratorError> {
        let json = serde_json::to_vec(self).map_err(|e| OrchestratorError::ResourceInit {
            reason: format!("failed to serialize package: {e}"),
        })?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).map_err(|e| OrchestratorError::ResourceInit {
            reason: format!("failed to gzip package: {e}"),
        })?;
        let compressed = encoder.finish().map_err(|e| OrchestratorError::ResourceInit {
            reason: format!("failed to finalize gzip stream: {e}"),
        })?;
        Ok(STANDARD.encode(compressed))
    }

    pub fn from_compressed_string(data: &str) -> Result<Self, OrchestratorError> {
        let compressed = STANDARD.decode(data).map_err(|e| OrchestratorError::SchemaMismatch {
            reason: format!("invalid base64 package payload: {e}"),
        })?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).map_err(|e| OrchestratorError::SchemaMismatch {
            reason: format!("invalid gzip package payload: {e}"),
        })?;
        serde_json::from_slice(&json).map_err(|e| OrchestratorError::SchemaMismatch {
            reason: format!("invalid package json: {e}"),
        })
    }
}

fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_core_types::{ScriptId, ScriptOrigin, VariableSchema};
    use chrono::Utc;

    fn sample_script() -> Script {
        Script {
            id: ScriptId::new(),
            name: "demo".into(),
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
    fn round_trips_through_compression() {
        let package = ScriptPackage::from_script(&sample_script()).unwrap();
        let encoded = package.to_compressed_string().unwrap();
        let decoded = ScriptPackage::from_compressed_string(&encoded).unwrap();
        assert_eq!(decoded.name, package.name);
        assert!(decoded.verify_checksum().unwrap());
    }

    #[test]
    fn rejects_unsupported_feature() {
        let mut package = ScriptPackage::from_script(&sample_script()).unwrap();
        package.metadata.compatibility.features.push("unknown.feature".into());
        assert!(package.validate_compatibility().is_err());
    }
}
