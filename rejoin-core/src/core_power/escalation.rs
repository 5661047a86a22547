//! Escalation audit trail and the request-context capability token

use crate::core_room::{PowerTier, RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Capability proving the caller is inside a synchronous request-handling
/// call chain.
///
/// The authorization-bypassing grant in [`super::PowerResolver`] requires a
/// `&RequestToken`, and only request-path entry points inside this crate can
/// construct one. The passive invite watcher holds no token and so cannot
/// reach escalation, which is the structural guarantee against the
/// escalate → invite → accept → re-trigger feedback cascade.
#[derive(Debug)]
pub struct RequestToken(());

impl RequestToken {
    pub(crate) fn new() -> Self {
        RequestToken(())
    }
}

/// Audit record of one authorization-bypassing power grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub room: RoomId,
    pub user: UserId,
    pub tier: PowerTier,
    pub at: Timestamp,
}

/// Append-only escalation audit log, readable by operators
pub struct EscalationLog {
    records: RwLock<Vec<EscalationRecord>>,
}

impl EscalationLog {
    pub fn new() -> Self {
        EscalationLog {
            records: RwLock::new(Vec::new()),
        }
    }

    pub async fn append(&self, record: EscalationRecord) {
        let mut records = self.records.write().await;
        records.push(record);
    }

    /// Snapshot of all records, oldest first
    pub async fn records(&self) -> Vec<EscalationRecord> {
        self.records.read().await.clone()
    }

    pub async fn records_for(&self, room: &RoomId) -> Vec<EscalationRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| &r.room == room)
            .cloned()
            .collect()
    }
}

impl Default for EscalationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_is_append_only() {
        let log = EscalationLog::new();
        log.append(EscalationRecord {
            room: RoomId::new("!a:test"),
            user: UserId::new("bob"),
            tier: PowerTier::INVITE_DEFAULT,
            at: Timestamp::now(),
        })
        .await;
        log.append(EscalationRecord {
            room: RoomId::new("!b:test"),
            user: UserId::new("carol"),
            tier: PowerTier::INVITE_DEFAULT,
            at: Timestamp::now(),
        })
        .await;

        assert_eq!(log.records().await.len(), 2);
        assert_eq!(log.records_for(&RoomId::new("!a:test")).await.len(), 1);
    }
}
