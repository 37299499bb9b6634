//! The persistent bidirectional WebSocket endpoint: handshake auth, session
//! attach/detach, a spawned writer draining the session's outbox, and
//! per-message dispatch over the full inbound routing table.

use std::sync::Arc;
use std::time::Instant;

use automaton_browser_worker::BrowserDriver;
use automaton_core_types::{
    ActionKind, OrchestratorError, OutboundEvent, ScrollSpec, SessionId, Target, TargetCandidate,
};
use automaton_recorder::naming::ConflictPolicy;
use automaton_script_store::{ExportOptions, ImportOptions, ImportOutcome, ScriptPackage};
use automaton_session::Session;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::execution;
use crate::server::messages::InboundMessage;
use crate::server::rate_limit::RateLimitKind;
use crate::server::state::AppState;

pub fn router<D: BrowserDriver + 'static>(state: AppState<D>) -> Router {
    Router::new().route("/ws", get(ws_handler::<D>)).with_state(state)
}

async fn ws_handler<D: BrowserDriver + 'static>(
    State(state): State<AppState<D>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.auth.authorize(&headers, &uri) {
        return (StatusCode::UNAUTHORIZED, "missing or invalid token").into_response();
    }
    let session_id = session_id_from_query(&uri);
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

fn session_id_from_query(uri: &Uri) -> Option<SessionId> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "session_id")
        .and_then(|(_, value)| value.parse().ok())
}

fn rate_limit_kind(message: &InboundMessage) -> RateLimitKind {
    match message {
        InboundMessage::ChatInstruction { .. }
        | InboundMessage::Navigate { .. }
        | InboundMessage::Click { .. }
        | InboundMessage::Type { .. }
        | InboundMessage::Scroll { .. }
        | InboundMessage::KeyPress { .. }
        | InboundMessage::ScreenshotRequest => RateLimitKind::Instruction,
        _ => RateLimitKind::Control,
    }
}

async fn handle_socket<D: BrowserDriver + 'static>(
    socket: WebSocket,
    state: AppState<D>,
    session_id: Option<SessionId>,
) {
    let (session, client_id, mut outbox) = match state.sessions.attach(session_id).await {
        Ok(attached) => attached,
        Err(err) => {
            warn!(?err, "failed to attach websocket client to a session");
            return;
        }
    };
    let streamer = state.streamer_for(&session);

    session.fanout.broadcast(OutboundEvent::Status {
        session_id: session.id,
        detail: serde_json::json!({ "event": "attached", "client_id": client_id }),
    });

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(batch) = outbox.recv_batch().await {
            for event in batch {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(?err, "failed to serialize outbound event");
                        continue;
                    }
                };
                if sink.send(Message::Text(payload)).await.is_err() {
                    return;
                }
            }
        }
    });

    let mut manual_mode = false;
    loop {
        tokio::select! {
            _ = &mut writer => break,
            incoming = stream.next() => {
                let Some(incoming) = incoming else { break };
                match incoming {
                    Ok(Message::Text(text)) => {
                        handle_text(&state, &session, &streamer, &text, &mut manual_mode).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}
                    Err(err) => {
                        debug!(?err, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    writer.abort();
    state.sessions.detach(session.id, client_id);
    debug!(session_id = %session.id.0, client_id, "websocket client detached");
}

async fn handle_text<D: BrowserDriver + 'static>(
    state: &AppState<D>,
    session: &Arc<Session<D>>,
    streamer: &Arc<automaton_screenshot::ScreenshotStreamer<D>>,
    text: &str,
    manual_mode: &mut bool,
) {
    let inbound: InboundMessage = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(err) => {
            session.fanout.broadcast(OutboundEvent::Error {
                code: "bad_request".into(),
                message: format!("could not parse message: {err}"),
                context: None,
            });
            return;
        }
    };

    if !state.rate_limiter.allow(session.id, rate_limit_kind(&inbound)) {
        session.fanout.broadcast(OutboundEvent::Error {
            code: "rate_limited".into(),
            message: "too many messages; slow down".into(),
            context: None,
        });
        return;
    }
    session.touch();

    if let Err(err) = dispatch(state, session, streamer, inbound, manual_mode).await {
        session.fanout.broadcast(error_event(&err));
    }
}

fn error_event(err: &OrchestratorError) -> OutboundEvent {
    OutboundEvent::Error { code: err.kind().to_string(), message: err.to_string(), context: None }
}

async fn dispatch<D: BrowserDriver + 'static>(
    state: &AppState<D>,
    session: &Arc<Session<D>>,
    streamer: &Arc<automaton_screenshot::ScreenshotStreamer<D>>,
    message: InboundMessage,
    manual_mode: &mut bool,
) -> Result<(), OrchestratorError> {
    match message {
        InboundMessage::ChatInstruction { message } => chat_instruction(state, session, streamer, message).await,
        InboundMessage::StartRecording { name, .. } => {
            session.start_recording(name.unwrap_or_else(|| "Untitled recording".to_string()))?;
            session.fanout.broadcast(OutboundEvent::RecordingStarted { session_id: session.id });
            Ok(())
        }
        InboundMessage::StopRecording => {
            let script = session.stop_recording()?;
            let action_count = script.actions.len();
            let variable_count = script.schema.variables.len();
            let script_id = state.scripts.save(script).await?;
            session.fanout.broadcast(OutboundEvent::RecordingCompleted {
                script_id,
                action_count,
                variable_count,
            });
            Ok(())
        }
        InboundMessage::ExecuteScript { script_id, variables } => {
            let script = state.scripts.load(script_id).await?;
            session.fanout.broadcast(OutboundEvent::ScriptVariables { script_id, schema: script.schema.clone() });
            let session = session.clone();
            let progress = state.progress.clone();
            let store = state.scripts.clone();
            let streamer = streamer.clone();
            let action_deadline = state.config.action_deadline;
            tokio::spawn(async move {
                execution::run_script(session, progress, store, script, variables, action_deadline, Some(streamer)).await;
            });
            Ok(())
        }
        InboundMessage::PauseExecution { execution_id } => {
            let handle = execution_handle_or_error(state, execution_id)?;
            state.progress.pause(&handle, &session.fanout)
        }
        InboundMessage::ResumeExecution { execution_id } => {
            let handle = execution_handle_or_error(state, execution_id)?;
            state.progress.resume(&handle, &session.fanout)
        }
        InboundMessage::StopExecution { execution_id } => {
            let handle = execution_handle_or_error(state, execution_id)?;
            state.progress.stop(handle, &session.fanout)
        }
        InboundMessage::GetExecutionStatus { execution_id } => {
            let detail = match state.progress.get_active(execution_id) {
                Some(handle) => serde_json::to_value(handle.snapshot()),
                None => match state.progress.get_history(execution_id) {
                    Some(execution) => serde_json::to_value(execution),
                    None => {
                        return Err(OrchestratorError::SchemaMismatch {
                            reason: format!("execution '{}' is unknown", execution_id.0),
                        });
                    }
                },
            }
            .map_err(|e| OrchestratorError::SchemaMismatch { reason: e.to_string() })?;
            session.fanout.broadcast(OutboundEvent::Status { session_id: session.id, detail });
            Ok(())
        }
        InboundMessage::Navigate { url } => {
            run_manual_action(session, streamer, ActionKind::Navigate { url }, state.config.action_deadline).await
        }
        InboundMessage::Click { selector } => {
            let action = ActionKind::Click { target: selector_target(selector) };
            run_manual_action(session, streamer, action, state.config.action_deadline).await
        }
        InboundMessage::Type { selector, value } => {
            let action = ActionKind::Fill { target: selector_target(selector), value };
            run_manual_action(session, streamer, action, state.config.action_deadline).await
        }
        InboundMessage::Scroll { direction, selector } => {
            let spec = match (direction, selector) {
                (_, Some(selector)) => ScrollSpec::Target { target: selector_target(selector) },
                (Some(direction), None) => ScrollSpec::Direction { direction },
                (None, None) => {
                    return Err(OrchestratorError::SchemaMismatch {
                        reason: "scroll requires either a direction or a selector".into(),
                    });
                }
            };
            run_manual_action(session, streamer, ActionKind::Scroll { spec }, state.config.action_deadline).await
        }
        InboundMessage::KeyPress { key } => {
            let deadline = Instant::now() + state.config.action_deadline;
            let result = session.worker.send_key(&key, deadline).await?;
            streamer.notify_activity();
            session.fanout.broadcast(OutboundEvent::Status {
                session_id: session.id,
                detail: serde_json::json!({ "key_press": key, "success": result.success }),
            });
            Ok(())
        }
        InboundMessage::ToggleManualMode => {
            *manual_mode = !*manual_mode;
            session.fanout.broadcast(OutboundEvent::Status {
                session_id: session.id,
                detail: serde_json::json!({ "manual_mode": *manual_mode }),
            });
            Ok(())
        }
        InboundMessage::ScreenshotRequest => {
            let frame = session.worker.snapshot().await?;
            session.fanout.broadcast(OutboundEvent::Screenshot {
                data: frame.data_base64,
                url: frame.url,
                frame_id: frame.id.0,
            });
            Ok(())
        }
        InboundMessage::GetScripts => {
            let detail = serde_json::json!({ "scripts": state.scripts.list() });
            session.fanout.broadcast(OutboundEvent::Status { session_id: session.id, detail });
            Ok(())
        }
        InboundMessage::GetScript { script_id } => {
            let script = state.scripts.load(script_id).await?;
            session.fanout.broadcast(OutboundEvent::ScriptVariables { script_id, schema: script.schema.clone() });
            session.fanout.broadcast(OutboundEvent::Status {
                session_id: session.id,
                detail: serde_json::json!({ "script": script }),
            });
            Ok(())
        }
        InboundMessage::DeleteScript { script_id } => {
            state.scripts.delete(script_id).await?;
            session.fanout.broadcast(OutboundEvent::Status {
                session_id: session.id,
                detail: serde_json::json!({ "deleted": script_id }),
            });
            Ok(())
        }
        InboundMessage::ExportScript { script_id, compress } => {
            let options = ExportOptions { compress: compress.unwrap_or(true) };
            let package = state.scripts.export(script_id, options).await?;
            session.fanout.broadcast(OutboundEvent::Status {
                session_id: session.id,
                detail: serde_json::json!({ "script_id": script_id, "package": package }),
            });
            Ok(())
        }
        InboundMessage::ImportScript { package, conflict, mapping, validate_only } => {
            let package = ScriptPackage::from_compressed_string(&package)
                .or_else(|_| serde_json::from_str(&package).map_err(|e| OrchestratorError::SchemaMismatch { reason: e.to_string() }))?;
            let options = ImportOptions {
                conflict: parse_conflict_policy(conflict.as_deref()),
                mapping,
                validate_only,
            };
            let outcome = state.scripts.import(package, options).await?;
            let detail = match outcome {
                ImportOutcome::Imported(script_id) => serde_json::json!({ "imported": script_id }),
                ImportOutcome::Skipped => serde_json::json!({ "skipped": true }),
                ImportOutcome::Preview(preview) => serde_json::json!({
                    "preview": true,
                    "name": preview.name,
                    "would_rename_to": preview.would_rename_to,
                    "conflicts": preview.conflicts,
                }),
            };
            session.fanout.broadcast(OutboundEvent::Status { session_id: session.id, detail });
            Ok(())
        }
    }
}

fn selector_target(selector: String) -> Target {
    Target::new(TargetCandidate::Selector { selector })
}

fn parse_conflict_policy(value: Option<&str>) -> ConflictPolicy {
    match value {
        Some("overwrite") => ConflictPolicy::Overwrite,
        Some("skip") => ConflictPolicy::Skip,
        _ => ConflictPolicy::Rename,
    }
}

fn execution_handle_or_error<D: BrowserDriver + 'static>(
    state: &AppState<D>,
    execution_id: automaton_core_types::ExecutionId,
) -> Result<Arc<automaton_progress::ExecutionHandle>, OrchestratorError> {
    state.progress.get_active(execution_id).ok_or_else(|| OrchestratorError::SchemaMismatch {
        reason: format!("execution '{}' is not active", execution_id.0),
    })
}

/// Manual-mode actions bypass the interpreter and the Progress Manager
/// entirely: they drive the Worker directly and, if a
/// recording is open, are captured the same as any other successful action.
async fn run_manual_action<D: BrowserDriver + 'static>(
    session: &Arc<Session<D>>,
    streamer: &Arc<automaton_screenshot::ScreenshotStreamer<D>>,
    action: ActionKind,
    action_deadline: std::time::Duration,
) -> Result<(), OrchestratorError> {
    let deadline = Instant::now() + action_deadline;
    let result = session.worker.execute(&action, deadline).await?;
    streamer.notify_activity();
    if result.success {
        let current_url = session.worker.current_url().await;
        session.record_if_active(None, action, &current_url);
    }
    session.fanout.broadcast(OutboundEvent::Status {
        session_id: session.id,
        detail: serde_json::json!({ "action_result": result }),
    });
    Ok(())
}

/// Interpret a free-text instruction via the tiered Action Interpreter and
/// execute the resulting plan against the session's Worker.
async fn chat_instruction<D: BrowserDriver + 'static>(
    state: &AppState<D>,
    session: &Arc<Session<D>>,
    streamer: &Arc<automaton_screenshot::ScreenshotStreamer<D>>,
    message: String,
) -> Result<(), OrchestratorError> {
    let elements = session.worker.query_elements().await?;
    let plan = state
        .interpreter
        .interpret(&message, &elements, |target| ActionKind::Click { target })
        .await?;

    for action in plan {
        let deadline = Instant::now() + state.config.action_deadline;
        let result = session.worker.execute(&action, deadline).await?;
        streamer.notify_activity();
        if result.success {
            let current_url = session.worker.current_url().await;
            session.record_if_active(Some(message.clone()), action, &current_url);
        } else {
            session.fanout.broadcast(OutboundEvent::Status {
                session_id: session.id,
                detail: serde_json::json!({ "instruction": message, "action_result": result }),
            });
            return Ok(());
        }
    }

    session.fanout.broadcast(OutboundEvent::Status {
        session_id: session.id,
        detail: serde_json::json!({ "instruction": message, "ok": true }),
    });
    Ok(())
}
