//! Audit trail for compliance reports and pipeline runs
//!
//! Each entry stores the serialized payload together with its SHA-256
//! digest so tampering can be detected later.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditSubject {
    ComplianceReport,
    PipelineRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub subject: AuditSubject,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Audit trail storage
pub struct AuditLog {
    entries: Arc<RwLock<HashMap<Uuid, AuditEntry>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a payload under a fresh audit id
    pub async fn record<T: Serialize>(&self, subject: AuditSubject, payload: &T) -> Result<Uuid> {
        let payload = serde_json::to_value(payload)?;
        let entry = AuditEntry {
            audit_id: Uuid::new_v4(),
            subject,
            payload_hash: compute_payload_hash(&payload),
            payload,
            created_at: Utc::now(),
        };

        let audit_id = entry.audit_id;
        let mut entries = self.entries.write().await;
        entries.insert(audit_id, entry);
        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&audit_id).cloned())
    }

    /// Audit ids for a subject, oldest first
    pub async fn list(&self, subject: AuditSubject) -> Result<Vec<Uuid>> {
        let entries = self.entries.read().await;

        let mut items: Vec<_> = entries
            .values()
            .filter(|entry| entry.subject == subject)
            .map(|entry| (entry.audit_id, entry.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Recompute the digest of a stored payload and compare
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let entries = self.entries.read().await;

        if let Some(entry) = entries.get(&audit_id) {
            Ok(compute_payload_hash(&entry.payload) == entry.payload_hash)
        } else {
            Ok(false)
        }
    }

    #[cfg(test)]
    pub(crate) async fn tamper(&self, audit_id: Uuid, payload: serde_json::Value) {
        if let Some(entry) = self.entries.write().await.get_mut(&audit_id) {
            entry.payload = payload;
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the JSON encoding, streamed straight into the hasher
pub fn compute_payload_hash<T: Serialize + ?Sized>(payload: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), payload).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let id = log
            .record(AuditSubject::ComplianceReport, &json!({"accuracy": 0.91}))
            .await
            .unwrap();

        assert!(log.verify_integrity(id).await.unwrap());
        assert_eq!(log.list(AuditSubject::ComplianceReport).await.unwrap(), vec![id]);
        assert!(log.list(AuditSubject::PipelineRun).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampering_detected() {
        let log = AuditLog::new();
        let id = log
            .record(AuditSubject::PipelineRun, &json!({"status": "success"}))
            .await
            .unwrap();

        log.tamper(id, json!({"status": "error"})).await;
        assert!(!log.verify_integrity(id).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());
    }

    #[test]
    fn test_hash_is_stable() {
        let a = compute_payload_hash(&json!({"a": 1}));
        let b = compute_payload_hash(&json!({"a": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
