// crates/edgegate-core/src/core/audit.rs
// ============================================================================
// Module: EdgeGate Audit Logging
// Description: Ordered, append-only audit events and the file line sink.
// Purpose: Emit redacted audit records without hard logging dependencies.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Every state transition and security decision emits an audit event ordered
//! by `(workspace_id, ts, seq)`. The event type is intentionally lightweight
//! so deployments can route events to their preferred pipeline. Redaction is
//! by construction: payload builders only ever receive `token_last4`, never
//! secret plaintext.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ActorId;
use crate::core::identifiers::WorkspaceId;
use crate::core::time::Timestamp;
use crate::interfaces::AuditSink;
use crate::interfaces::AuditSinkError;

// ============================================================================
// SECTION: Events
// ============================================================================

/// One append-only audit event.
///
/// # Invariants
/// - Events are ordered by `(workspace_id, ts, seq)`; `seq` is assigned by
///   the sink and monotonic per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic sequence number assigned by the sink.
    pub seq: u64,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Acting principal (`system` for worker transitions).
    pub actor: ActorId,
    /// Event type label, `snake_case`.
    pub event_type: String,
    /// Structured, pre-redacted payload.
    pub payload: Value,
    /// Event time.
    pub ts: Timestamp,
}

impl AuditEvent {
    /// Creates an event with `seq = 0`; the sink assigns the real sequence.
    #[must_use]
    pub fn new(
        workspace_id: WorkspaceId,
        actor: ActorId,
        event_type: impl Into<String>,
        payload: Value,
        ts: Timestamp,
    ) -> Self {
        Self {
            seq: 0,
            workspace_id,
            actor,
            event_type: event_type.into(),
            payload,
            ts,
        }
    }
}

// ============================================================================
// SECTION: File Sink
// ============================================================================

/// JSON-lines audit sink writing one event per line.
pub struct FileAuditSink {
    /// Open file handle and next sequence number.
    inner: Mutex<FileSinkState>,
}

/// Mutable sink state behind the lock.
struct FileSinkState {
    /// Append-mode file handle.
    file: File,
    /// Next sequence number to assign.
    next_seq: u64,
}

impl FileAuditSink {
    /// Opens (or creates) the audit log at `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`AuditSinkError`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, AuditSinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| AuditSinkError::Io(err.to_string()))?;
        Ok(Self {
            inner: Mutex::new(FileSinkState {
                file,
                next_seq: 1,
            }),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditSinkError> {
        let mut state =
            self.inner.lock().map_err(|_| AuditSinkError::Io("sink poisoned".to_string()))?;
        let mut event = event;
        event.seq = state.next_seq;
        state.next_seq += 1;
        let line = serde_json::to_string(&event)
            .map_err(|err| AuditSinkError::Serialize(err.to_string()))?;
        writeln!(state.file, "{line}").map_err(|err| AuditSinkError::Io(err.to_string()))?;
        Ok(())
    }
}
