//! `AuditSink`: an append-only sink of newline-delimited JSON
//! `AuditRecord`s, one per request that reached the `ExecutionEngine`.
//!
//! Durability is configuration-driven rather than assumed one way. A
//! single background writer task owns the file handle either way;
//! `durable: true` additionally waits for that task to fsync the line
//! before `record()` returns, blocking the response on durability when
//! configured.

use crate::error::{GatewayError, Result};
use crate::model::AuditRecord;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

enum Entry {
    Write(AuditRecord, Option<oneshot::Sender<()>>),
}

pub struct AuditSink {
    tx: mpsc::UnboundedSender<Entry>,
    durable: bool,
}

impl AuditSink {
    /// Opens (creating if absent) the newline-delimited-JSON file at `path`
    /// and spawns its background writer task.
    pub fn open(path: impl Into<PathBuf>, durable: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GatewayError::config(format!("opening audit log {}: {e}", path.display())))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Entry>();
        tokio::spawn(async move {
            let mut file = file;
            while let Some(Entry::Write(record, ack)) = rx.recv().await {
                if let Err(e) = write_line(&mut file, &record) {
                    tracing::error!(error = %e, "failed to append audit record");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
        });

        Ok(Self { tx, durable })
    }

    /// Append one record. Never fails the caller's request on a write
    /// error — the error is logged and swallowed, since losing an audit
    /// line must not also lose the response it describes.
    pub async fn record(&self, record: AuditRecord) {
        if self.durable {
            let (ack_tx, ack_rx) = oneshot::channel();
            if self.tx.send(Entry::Write(record, Some(ack_tx))).is_ok() {
                let _ = ack_rx.await;
            }
        } else {
            let _ = self.tx.send(Entry::Write(record, None));
        }
    }
}

fn write_line(file: &mut std::fs::File, record: &AuditRecord) -> std::io::Result<()> {
    let line = serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
    writeln!(file, "{line}")?;
    file.flush()?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EndpointKind, PolicyDecision, RequestStatus, Transport};
    use chrono::Utc;

    fn sample_record() -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            transport: Transport::Http,
            kind: EndpointKind::Tool,
            name: "calculate_discount".to_string(),
            input_json: serde_json::json!({"price": 100}),
            duration_ms: 5,
            policy_decision: PolicyDecision::Allow,
            reason: None,
            status: RequestStatus::Success,
            error: None,
            session_id: None,
            trace_id: None,
        }
    }

    #[tokio::test]
    async fn durable_record_is_flushed_before_returning() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let sink = AuditSink::open(&path, true).unwrap();
        sink.record(sample_record()).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("calculate_discount"));
    }

    #[tokio::test]
    async fn best_effort_record_eventually_lands() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let sink = AuditSink::open(&path, false).unwrap();
        sink.record(sample_record()).await;
        // Best-effort mode doesn't guarantee the write has landed by the
        // time `record()` returns; give the background task a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
