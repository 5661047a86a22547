//! Per-user, per-endpoint sliding burst-window rate limiting
//!
//! Each endpoint carries its own independent budget. Counters are kept
//! per (user, endpoint) key behind their own lock so unrelated users never
//! serialize on each other.

use crate::core_room::UserId;
use crate::error::{RejoinError, RejoinResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Rate-limited endpoints, each with an independent budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    RequestRoomCode,
    Knock,
    AutoJoin,
}

/// Budget for one endpoint: at most `max_requests` within `window`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_requests: u32,
}

impl Budget {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Budget {
            window,
            max_requests,
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Budget {
            window: Duration::from_secs(120),
            max_requests: 120,
        }
    }
}

type Key = (UserId, Endpoint);

/// Sliding-window limiter with per-key counters
pub struct RateLimiter {
    budgets: HashMap<Endpoint, Budget>,
    log: RwLock<HashMap<Key, Arc<Mutex<Vec<Instant>>>>>,
}

impl RateLimiter {
    pub fn new(budgets: HashMap<Endpoint, Budget>) -> Self {
        RateLimiter {
            budgets,
            log: RwLock::new(HashMap::new()),
        }
    }

    /// Limiter that never denies, for tests that exercise other components
    pub fn unlimited() -> Self {
        let mut budgets = HashMap::new();
        for endpoint in [Endpoint::RequestRoomCode, Endpoint::Knock, Endpoint::AutoJoin] {
            budgets.insert(endpoint, Budget::new(Duration::from_secs(1), u32::MAX));
        }
        RateLimiter::new(budgets)
    }

    /// Admit or deny one request. On admission the request is recorded
    /// against the window; on denial nothing is recorded.
    pub async fn check(&self, user: &UserId, endpoint: Endpoint) -> RejoinResult<()> {
        self.check_at(user, endpoint, Instant::now()).await
    }

    pub(crate) async fn check_at(
        &self,
        user: &UserId,
        endpoint: Endpoint,
        now: Instant,
    ) -> RejoinResult<()> {
        let budget = self
            .budgets
            .get(&endpoint)
            .cloned()
            .unwrap_or_default();

        let slot = {
            let log = self.log.read().await;
            log.get(&(user.clone(), endpoint)).cloned()
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                let mut log = self.log.write().await;
                log.entry((user.clone(), endpoint))
                    .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
                    .clone()
            }
        };

        let mut timestamps = slot.lock().await;
        timestamps.retain(|t| now.duration_since(*t) <= budget.window);

        if timestamps.len() as u32 >= budget.max_requests {
            tracing::debug!(user = %user, ?endpoint, "rate limit exceeded");
            return Err(RejoinError::RateLimited);
        }

        timestamps.push(now);
        Ok(())
    }
}
