//! Shared data model and error taxonomy for the automation orchestrator.
//!
//! Every other crate in the workspace depends on this one; it carries no
//! dependency back onto them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod ids {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    macro_rules! opaque_id {
        ($name:ident) => {
            #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
            pub struct $name(pub Uuid);

            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl std::str::FromStr for $name {
                type Err = uuid::Error;
                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Ok(Self(Uuid::parse_str(s)?))
                }
            }
        };
    }

    opaque_id!(SessionId);
    opaque_id!(ScriptId);
    opaque_id!(ExecutionId);
    opaque_id!(ActionRecordId);
}

pub use ids::{ActionRecordId, ExecutionId, ScriptId, SessionId};

/// Reserved variable names that may never be used by an automation schema.
pub const RESERVED_VARIABLE_NAMES: &[&str] =
    &["id", "name", "type", "value", "system", "admin"];

// ---------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------

/// One way of describing the DOM element an [`Action`] refers to.
///
/// The ordering of variants below is also the *default* resolution order a
/// [`Target`]'s fallbacks are tried in when no explicit order was recorded.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetCandidate {
    RoleName { role: String, name: String },
    AriaLabel { label: String },
    Placeholder { placeholder: String },
    Text { text: String },
    Selector { selector: String },
    Index { index: usize },
}

impl TargetCandidate {
    /// Resolution-order rank used for deterministic fallback ordering.
    pub fn rank(&self) -> u8 {
        match self {
            TargetCandidate::RoleName { .. } => 0,
            TargetCandidate::AriaLabel { .. } => 1,
            TargetCandidate::Placeholder { .. } => 2,
            TargetCandidate::Text { .. } => 3,
            TargetCandidate::Selector { .. } => 4,
            TargetCandidate::Index { .. } => 5,
        }
    }
}

impl fmt::Display for TargetCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetCandidate::RoleName { role, name } => write!(f, "role={role} name={name}"),
            TargetCandidate::AriaLabel { label } => write!(f, "aria-label={label}"),
            TargetCandidate::Placeholder { placeholder } => write!(f, "placeholder={placeholder}"),
            TargetCandidate::Text { text } => write!(f, "text={text}"),
            TargetCandidate::Selector { selector } => write!(f, "selector={selector}"),
            TargetCandidate::Index { index } => write!(f, "index={index}"),
        }
    }
}

/// A structured, ordered description of a DOM element with deterministic
/// fallbacks.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub primary: TargetCandidate,
    pub fallbacks: Vec<TargetCandidate>,
}

impl Target {
    pub fn new(primary: TargetCandidate) -> Self {
        Self { primary, fallbacks: Vec::new() }
    }

    pub fn with_fallbacks(primary: TargetCandidate, mut fallbacks: Vec<TargetCandidate>) -> Self {
        fallbacks.sort_by_key(|c| c.rank());
        Self { primary, fallbacks }
    }

    /// All candidates, primary first, in resolution order.
    pub fn candidates(&self) -> Vec<&TargetCandidate> {
        let mut all = vec![&self.primary];
        all.extend(self.fallbacks.iter());
        all
    }
}

// ---------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WaitSpec {
    Duration { millis: u64 },
    Predicate { expression: String },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScrollSpec {
    Direction { direction: ScrollDirection },
    Target { target: Target },
}

/// The canonical executable unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    Navigate { url: String },
    Fill { target: Target, value: String },
    Click { target: Target },
    Select { target: Target, option: String },
    Wait { spec: WaitSpec },
    Scroll { spec: ScrollSpec },
    Extract { target: Target, variable: String },
    Assert { predicate: String },
}

impl ActionKind {
    /// The target this action resolves against, if any (`navigate`, `wait`
    /// by duration, and `assert` carry no target).
    pub fn target(&self) -> Option<&Target> {
        match self {
            ActionKind::Fill { target, .. }
            | ActionKind::Click { target }
            | ActionKind::Select { target, .. }
            | ActionKind::Extract { target, .. } => Some(target),
            ActionKind::Scroll { spec: ScrollSpec::Target { target } } => Some(target),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Navigate { .. } => "navigate",
            ActionKind::Fill { .. } => "fill",
            ActionKind::Click { .. } => "click",
            ActionKind::Select { .. } => "select",
            ActionKind::Wait { .. } => "wait",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::Extract { .. } => "extract",
            ActionKind::Assert { .. } => "assert",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TargetNotFound,
    Navigation,
    Timeout,
    Driver,
    Cancelled,
}

/// Result of executing one [`Action`] against the Worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub observed_url: Option<String>,
    pub final_target_used: Option<TargetCandidate>,
    pub duration_ms: u64,
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub attempt_log: Vec<String>,
}

impl ActionResult {
    pub fn success(observed_url: Option<String>, used: Option<TargetCandidate>, duration_ms: u64) -> Self {
        Self {
            success: true,
            observed_url,
            final_target_used: used,
            duration_ms,
            failure: None,
            attempt_log: Vec::new(),
        }
    }

    pub fn failure(kind: FailureKind, duration_ms: u64, attempt_log: Vec<String>) -> Self {
        Self {
            success: false,
            observed_url: None,
            final_target_used: None,
            duration_ms,
            failure: Some(kind),
            attempt_log,
        }
    }
}

/// One recorded/replayed step. `step` is the 1-based, contiguous index
/// within its owning [`Script`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionRecordId,
    pub step: u32,
    pub description: String,
    pub instruction: Option<String>,
    pub kind: ActionKind,
    pub variable: Option<String>,
    pub result: Option<ActionResult>,
    pub recorded_at: DateTime<Utc>,
}

impl Action {
    pub fn new(step: u32, description: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: ActionRecordId::new(),
            step,
            description: description.into(),
            instruction: None,
            kind,
            variable: None,
            result: None,
            recorded_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------
// Variable schema
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Text,
    Email,
    Phone,
    Date,
    Url,
    Number,
    Password,
    Secret,
    File,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub pattern: Option<String>,
    pub required: bool,
    pub sensitive: bool,
    pub default: Option<String>,
    /// Never populated on a persisted/exported [`Script`]; execution-time
    /// resolved values live in the Execution's read-only variable map instead.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<String>,
}

impl Variable {
    pub fn name_is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    pub fn is_reserved(name: &str) -> bool {
        RESERVED_VARIABLE_NAMES.contains(&name.to_ascii_lowercase().as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSchema {
    pub variables: Vec<Variable>,
}

impl VariableSchema {
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn has_duplicate_names(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        !self.variables.iter().all(|v| seen.insert(v.name.clone()))
    }

    /// Erase stored values for sensitive variables in place.
    pub fn redact_sensitive(&mut self) {
        for v in &mut self.variables {
            if v.sensitive {
                v.value = None;
            }
        }
    }
}

// ---------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptOrigin {
    Recorded,
    Imported,
    Authored,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub origin: ScriptOrigin,
    pub initial_url: String,
    pub actions: Vec<Action>,
    pub schema: VariableSchema,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<String>,
}

impl Script {
    /// Validate step-index ordering and schema consistency.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.actions.is_empty() {
            return Err(OrchestratorError::SchemaMismatch {
                reason: "script has no steps".into(),
            });
        }
        for (i, action) in self.actions.iter().enumerate() {
            let expected = (i + 1) as u32;
            if action.step != expected {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: format!(
                        "step indices must be 1-based and contiguous; expected {expected}, found {}",
                        action.step
                    ),
                });
            }
        }
        if self.schema.has_duplicate_names() {
            return Err(OrchestratorError::SchemaMismatch {
                reason: "variable schema has duplicate names".into(),
            });
        }
        for name in self.referenced_variables() {
            if self.schema.get(&name).is_none() {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: format!("action references undeclared variable '{name}'"),
                });
            }
        }
        Ok(())
    }

    /// Every `${NAME}` variable referenced by any action.
    pub fn referenced_variables(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|a| a.variable.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub step: u32,
    pub description: String,
    pub result: ActionResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub script_id: ScriptId,
    pub session_id: SessionId,
    pub total_steps: u32,
    pub current_step: u32,
    pub status: ExecutionStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub log: Vec<StepLogEntry>,
    pub errors: Vec<ErrorRecord>,
    pub last_successful_step: u32,
}

/// A serializable snapshot of an [`OrchestratorError`], used where the error
/// itself must be stored alongside an [`Execution`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}

impl From<&OrchestratorError> for ErrorRecord {
    fn from(err: &OrchestratorError) -> Self {
        Self { kind: err.kind().to_string(), message: err.to_string() }
    }
}

// ---------------------------------------------------------------------
// Interpreter diagnostics
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub description: String,
    pub score: f64,
}

// ---------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------

#[derive(Error, Clone, Debug, Serialize, Deserialize)]
pub enum OrchestratorError {
    #[error("no visible element matched any candidate target (tried: {})", attempts.join(", "))]
    TargetNotFound { attempts: Vec<String> },

    #[error("action deadline exceeded")]
    Timeout,

    #[error("navigation failed: {reason}")]
    Navigation { reason: String },

    #[error("browser driver fault: {reason}")]
    Driver { reason: String },

    #[error("required variables missing: {}", missing.join(", "))]
    MissingVariable { missing: Vec<String> },

    #[error("could not interpret instruction: {instruction}")]
    Unrecognized { instruction: String },

    #[error("instruction is ambiguous among {} candidates", candidates.len())]
    Ambiguous {
        instruction: String,
        candidates: Vec<ScoredCandidate>,
    },

    #[error("variable name '{0}' is reserved")]
    ReservedName(String),

    #[error("variable name '{0}' is invalid")]
    InvalidName(String),

    #[error("schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    #[error("worker is busy with another action")]
    Busy,

    #[error("operation cancelled")]
    Cancelled,

    #[error("session '{0}' is unknown")]
    SessionUnknown(String),

    #[error("script '{0}' was not found")]
    ScriptNotFound(String),

    #[error("underlying driver could not be initialized: {reason}")]
    ResourceInit { reason: String },
}

impl OrchestratorError {
    /// The stable kind string every error carries.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::TargetNotFound { .. } => "TargetNotFound",
            OrchestratorError::Timeout => "Timeout",
            OrchestratorError::Navigation { .. } => "Navigation",
            OrchestratorError::Driver { .. } => "Driver",
            OrchestratorError::MissingVariable { .. } => "MissingVariable",
            OrchestratorError::Unrecognized { .. } => "Unrecognized",
            OrchestratorError::Ambiguous { .. } => "Ambiguous",
            OrchestratorError::ReservedName(_) => "ReservedName",
            OrchestratorError::InvalidName(_) => "InvalidName",
            OrchestratorError::SchemaMismatch { .. } => "SchemaMismatch",
            OrchestratorError::Busy => "Busy",
            OrchestratorError::Cancelled => "Cancelled",
            OrchestratorError::SessionUnknown(_) => "SessionUnknown",
            OrchestratorError::ScriptNotFound(_) => "ScriptNotFound",
            OrchestratorError::ResourceInit { .. } => "ResourceInit",
        }
    }

    /// Whether the Worker should retry the action in place.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TargetNotFound { .. } | OrchestratorError::Timeout
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct FrameIdx(pub u64);

// ---------------------------------------------------------------------
// Outbound wire events
// ---------------------------------------------------------------------

/// Every outbound event type the Client Gateway fans out to attached clients.
/// `real_time_screenshot` is the only type ever coalesced under backpressure
///; everything else must never be dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Status {
        session_id: SessionId,
        detail: serde_json::Value,
    },
    Screenshot {
        data: String,
        url: String,
        frame_id: u64,
    },
    RealTimeScreenshot {
        data: String,
        url: String,
        frame_id: u64,
    },
    ExecutionStarted {
        execution_id: ExecutionId,
        total_steps: u32,
        script_name: String,
    },
    ExecutionProgress {
        execution_id: ExecutionId,
        current_step: u32,
        total_steps: u32,
        progress: u8,
        status: ExecutionStatus,
        step: StepLogEntry,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        duration_ms: u64,
    },
    ExecutionFailed {
        execution_id: ExecutionId,
        duration_ms: u64,
        error: ErrorRecord,
        last_successful_step: u32,
    },
    ExecutionPaused {
        execution_id: ExecutionId,
    },
    ExecutionResumed {
        execution_id: ExecutionId,
    },
    ExecutionStopped {
        execution_id: ExecutionId,
        duration_ms: u64,
        last_successful_step: u32,
    },
    RecordingStarted {
        session_id: SessionId,
    },
    RecordingCompleted {
        script_id: ScriptId,
        action_count: usize,
        variable_count: usize,
    },
    ScriptVariables {
        script_id: ScriptId,
        schema: VariableSchema,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
    },
}

impl OutboundEvent {
    /// Non-critical events may be coalesced (keep-newest) under backpressure;
    /// everything else is critical and must never be dropped.
    pub fn is_critical(&self) -> bool {
        !matches!(self, OutboundEvent::RealTimeScreenshot { .. })
    }

    /// Coalescing key: events sharing a key may replace one another in an
    /// overflowing outbound buffer. Only non-critical events are coalesced.
    pub fn coalesce_key(&self) -> Option<&'static str> {
        match self {
            OutboundEvent::RealTimeScreenshot { .. } => Some("real_time_screenshot"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_fallbacks_sort_by_resolution_rank() {
        let target = Target::with_fallbacks(
            TargetCandidate::Selector { selector: "#a".into() },
            vec![
                TargetCandidate::Index { index: 0 },
                TargetCandidate::RoleName { role: "button".into(), name: "Go".into() },
            ],
        );
        let ranks: Vec<u8> = target.fallbacks.iter().map(|c| c.rank()).collect();
        assert_eq!(ranks, vec![0, 5]);
    }

    #[test]
    fn variable_name_validation_matches_spec_pattern() {
        assert!(Variable::name_is_valid("user_cpf"));
        assert!(Variable::name_is_valid("login-url"));
        assert!(!Variable::name_is_valid("1name"));
        assert!(!Variable::name_is_valid(""));
        assert!(Variable::is_reserved("admin"));
        assert!(!Variable::is_reserved("admin_panel"));
    }

    #[test]
    fn script_validate_rejects_noncontiguous_steps() {
        let mut script = Script {
            id: ScriptId::new(),
            name: "t".into(),
            created_at: Utc::now(),
            last_run_at: None,
            origin: ScriptOrigin::Recorded,
            initial_url: "https://example.test".into(),
            actions: vec![
                Action::new(1, "nav", ActionKind::Navigate { url: "https://x".into() }),
                Action::new(3, "click", ActionKind::Click {
                    target: Target::new(TargetCandidate::Selector { selector: "#go".into() }),
                }),
            ],
            schema: VariableSchema::default(),
            checksum: None,
        };
        assert!(script.validate().is_err());
        script.actions[1].step = 2;
        assert!(script.validate().is_ok());
    }
}
