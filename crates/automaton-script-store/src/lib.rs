//! Persists [`Script`]s and provides CRUD plus export/import, one JSON file
//! per script under a configured storage root (see DESIGN.md for why this
//! crate is plain `tokio::fs` rather than a pluggable storage backend).

pub mod checksum;
pub mod package;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use automaton_core_types::{
    OrchestratorError, Script, ScriptId, ScriptOrigin, VariableSchema,
};
use automaton_recorder::naming::{resolve_conflict, ConflictPolicy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

pub use package::{Compatibility, PackageMetadata, ScriptPackage};

const INDEX_FILE: &str = "index.json";

/// Lightweight listing entry, kept in memory and mirrored to `index.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptSummary {
    pub id: ScriptId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub origin: ScriptOrigin,
    pub step_count: usize,
    pub variable_count: usize,
}

impl From<&Script> for ScriptSummary {
    fn from(script: &Script) -> Self {
        Self {
            id: script.id,
            name: script.name.clone(),
            created_at: script.created_at,
            last_run_at: script.last_run_at,
            origin: script.origin,
            step_count: script.actions.len(),
            variable_count: script.schema.variables.len(),
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct IndexFile {
    scripts: Vec<ScriptSummary>,
}

pub struct ExportOptions {
    pub compress: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { compress: true }
    }
}

pub struct ImportOptions {
    pub conflict: ConflictPolicy,
    pub mapping: HashMap<String, String>,
    pub validate_only: bool,
}

pub struct ImportPreview {
    pub name: String,
    pub would_rename_to: Option<String>,
    pub conflicts: Vec<String>,
}

pub enum ImportOutcome {
    Preview(ImportPreview),
    Imported(ScriptId),
    Skipped,
}

/// File-backed Script Store. One file per script under `root/scripts/`, one
/// top-level index. Writes are serialized per script id; reads don't block on
/// each other.
pub struct ScriptStore {
    root: PathBuf,
    index: RwLock<HashMap<ScriptId, ScriptSummary>>,
    write_locks: DashMap<ScriptId, Arc<AsyncMutex<()>>>,
}

impl ScriptStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("scripts")).await.map_err(io_err)?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let raw = tokio::fs::read(&index_path).await.map_err(io_err)?;
            let parsed: IndexFile = serde_json::from_slice(&raw).map_err(json_err)?;
            parsed.scripts.into_iter().map(|s| (s.id, s)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self { root, index: RwLock::new(index), write_locks: DashMap::new() })
    }

    fn script_path(&self, id: ScriptId) -> PathBuf {
        self.root.join("scripts").join(format!("{}.json", id.0))
    }

    fn lock_for(&self, id: ScriptId) -> Arc<AsyncMutex<()>> {
        self.write_locks.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    async fn persist_index(&self) -> Result<(), OrchestratorError> {
        let scripts: Vec<ScriptSummary> = self.index.read().values().cloned().collect();
        let body = serde_json::to_vec_pretty(&IndexFile { scripts }).map_err(json_err)?;
        write_atomic(&self.root.join(INDEX_FILE), &body).await
    }

    /// Atomic replace by id; computes and stores a content checksum.
    pub async fn save(&self, mut script: Script) -> Result<ScriptId, OrchestratorError> {
        script.validate()?;
        script.checksum = None;
        script.checksum = Some(checksum::compute(&script)?);

        let lock = self.lock_for(script.id);
        let _guard = lock.lock().await;

        let body = serde_json::to_vec_pretty(&script).map_err(json_err)?;
        write_atomic(&self.script_path(script.id), &body).await?;

        self.index.write().insert(script.id, ScriptSummary::from(&script));
        self.persist_index().await?;
        debug!(id = %script.id.0, "saved script");
        Ok(script.id)
    }

    pub async fn load(&self, id: ScriptId) -> Result<Script, OrchestratorError> {
        if self.index.read().get(&id).is_none() {
            return Err(OrchestratorError::ScriptNotFound(id.0.to_string()));
        }
        let raw = tokio::fs::read(self.script_path(id))
            .await
            .map_err(|_| OrchestratorError::ScriptNotFound(id.0.to_string()))?;
        serde_json::from_slice(&raw).map_err(json_err)
    }

    pub fn list(&self) -> Vec<ScriptSummary> {
        let mut summaries: Vec<ScriptSummary> = self.index.read().values().cloned().collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub async fn delete(&self, id: ScriptId) -> Result<(), OrchestratorError> {
        if self.index.write().remove(&id).is_none() {
            return Err(OrchestratorError::ScriptNotFound(id.0.to_string()));
        }
        let _ = tokio::fs::remove_file(self.script_path(id)).await;
        self.persist_index().await
    }

    /// Produce a portable package; compresses and checksums, redacting
    /// sensitive values regardless of `options`.
    pub async fn export(&self, id: ScriptId, options: ExportOptions) -> Result<String, OrchestratorError> {
        let script = self.load(id).await?;
        let package = ScriptPackage::from_script(&script)?;
        if options.compress {
            package.to_compressed_string()
        } else {
            serde_json::to_string_pretty(&package).map_err(json_err)
        }
    }

    /// Validate and, unless `validate_only`, persist an imported package.
    pub async fn import(
        &self,
        package: ScriptPackage,
        options: ImportOptions,
    ) -> Result<ImportOutcome, OrchestratorError> {
        if !package.verify_checksum()? {
            return Err(OrchestratorError::SchemaMismatch { reason: "package checksum mismatch".into() });
        }
        package.validate_compatibility()?;

        let existing_names: std::collections::HashSet<String> =
            self.index.read().values().map(|s| s.name.clone()).collect();

        let timestamp = package.metadata.created_at.format("%Y%m%d%H%M%S").to_string();
        let rand = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let unique_suffix = format!("{timestamp}_{rand}");
        let resolved_name = resolve_conflict(
            &package.name,
            |n| existing_names.contains(n),
            options.conflict,
            &unique_suffix,
        );

        let Some(resolved_name) = resolved_name else {
            return Ok(ImportOutcome::Skipped);
        };

        if options.validate_only {
            return Ok(ImportOutcome::Preview(ImportPreview {
                name: package.name.clone(),
                would_rename_to: if resolved_name != package.name { Some(resolved_name) } else { None },
                conflicts: if existing_names.contains(&package.name) {
                    vec![package.name.clone()]
                } else {
                    Vec::new()
                },
            }));
        }

        let mut variables = package.variables;
        for variable in &mut variables {
            if let Some(renamed) = options.mapping.get(&variable.name) {
                variable.name = renamed.clone();
            }
        }

        let script = Script {
            id: ScriptId::new(),
            name: resolved_name,
            created_at: Utc::now(),
            last_run_at: None,
            origin: ScriptOrigin::Imported,
            initial_url: package
                .actions
                .first()
                .and_then(|a| match &a.kind {
                    automaton_core_types::ActionKind::Navigate { url } => Some(url.clone()),
                    _ => None,
                })
                .unwrap_or_default(),
            actions: package.actions,
            schema: VariableSchema { variables },
            checksum: None,
        };
        let id = self.save(script).await?;
        Ok(ImportOutcome::Imported(id))
    }
}

async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), OrchestratorError> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, body).await.map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;
    Ok(())
}

fn io_err(e: std::io::Error) -> OrchestratorError {
    OrchestratorError::ResourceInit { reason: format!("storage io error: {e}") }
}

fn json_err(e: serde_json::Error) -> OrchestratorError {
    OrchestratorError::ResourceInit { reason: format!("storage serialization error: {e}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_core_types::ScriptOrigin;

    fn sample_script(name: &str) -> Script {
        Script {
            id: ScriptId::new(),
            name: name.to_string(),
            created_at: Utc::now(),
            last_run_at: None,
            origin: ScriptOrigin::Authored,
            initial_url: "https://example.test".into(),
            actions: vec![automaton_core_types::Action::new(
                1,
                "Navigate",
                automaton_core_types::ActionKind::Navigate { url: "https://example.test".into() },
            )],
            schema: VariableSchema::default(),
            checksum: None,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::open(dir.path()).await.unwrap();
        let script = sample_script("alpha");
        let id = store.save(script.clone()).await.unwrap();
        let loaded = store.load(id).await.unwrap();
        assert_eq!(loaded.name, "alpha");
        assert!(loaded.checksum.is_some());
    }

    #[tokio::test]
    async fn delete_removes_from_index_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::open(dir.path()).await.unwrap();
        let id = store.save(sample_script("beta")).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(store.load(id).await.is_err());
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn export_then_import_round_trips_under_rename_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::open(dir.path()).await.unwrap();
        store.save(sample_script("gamma")).await.unwrap();
        let exported = store.export(store.list()[0].id, ExportOptions::default()).await.unwrap();
        let package = ScriptPackage::from_compressed_string(&exported).unwrap();

        let outcome = store
            .import(
                package,
                ImportOptions {
                    conflict: ConflictPolicy::Rename,
                    mapping: HashMap::new(),
                    validate_only: false,
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ImportOutcome::Imported(_)));
        assert_eq!(store.list().len(), 2);
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ScriptStore::open(dir.path()).await.unwrap();
            store.save(sample_script("delta")).await.unwrap();
        }
        let reopened = ScriptStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list().len(), 1);
    }
}
