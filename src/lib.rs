//! Session-scoped browser automation gateway: wires the workspace's crates
//! (Worker, Interpreter, Session Manager, Progress Manager, Script Store,
//! Recorder, Screenshot Streamer) behind one WebSocket endpoint.

pub mod auth;
pub mod config;
pub mod execution;
pub mod metrics;
pub mod server;
