//! Inbound WebSocket message shapes: the canonical client-to-gateway JSON
//! envelope and the routing table it dispatches to. One flat tagged enum
//! rather than per-route structs.

use std::collections::HashMap;

use automaton_core_types::{ExecutionId, ScriptId};
use automaton_core_types::ScrollDirection;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    ChatInstruction {
        message: String,
    },
    StartRecording {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    StopRecording,
    ExecuteScript {
        script_id: ScriptId,
        #[serde(default)]
        variables: HashMap<String, String>,
    },
    PauseExecution {
        execution_id: ExecutionId,
    },
    ResumeExecution {
        execution_id: ExecutionId,
    },
    StopExecution {
        execution_id: ExecutionId,
    },
    GetExecutionStatus {
        execution_id: ExecutionId,
    },
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        value: String,
    },
    Scroll {
        #[serde(default)]
        direction: Option<ScrollDirection>,
        #[serde(default)]
        selector: Option<String>,
    },
    KeyPress {
        key: String,
    },
    ToggleManualMode,
    ScreenshotRequest,
    GetScripts,
    GetScript {
        script_id: ScriptId,
    },
    DeleteScript {
        script_id: ScriptId,
    },
    ExportScript {
        script_id: ScriptId,
        #[serde(default)]
        compress: Option<bool>,
    },
    ImportScript {
        package: String,
        #[serde(default)]
        conflict: Option<String>,
        #[serde(default)]
        mapping: HashMap<String, String>,
        #[serde(default)]
        validate_only: bool,
    },
}
