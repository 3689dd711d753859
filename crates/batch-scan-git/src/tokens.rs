//! Round-robin pool of API tokens with rate-limit cooldowns.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Cooldown applied when the API does not say when the limit resets.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// A token handed out by the pool, with its slot for later feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledToken {
    pub index: usize,
    pub token: String,
}

/// Every token is cooling down; the earliest is usable at `retry_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllThrottled {
    /// Unix seconds.
    pub retry_at: u64,
}

#[derive(Debug)]
struct PoolState {
    cursor: usize,
    cooldown_until: Vec<SystemTime>,
}

/// Shared pool of search tokens.
///
/// Selection is round-robin from an explicit cursor and skips tokens that
/// are cooling down, so concurrent workers spread across the tokens that
/// still have quota.
#[derive(Debug)]
pub struct TokenPool {
    tokens: Vec<String>,
    state: Mutex<PoolState>,
}

impl TokenPool {
    /// Build a pool, dropping blank entries.
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.into().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let cooldown_until = vec![UNIX_EPOCH; tokens.len()];
        Self {
            tokens,
            state: Mutex::new(PoolState {
                cursor: 0,
                cooldown_until,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Take the next token that is not cooling down.
    pub fn acquire(&self) -> Result<PooledToken, AllThrottled> {
        self.acquire_at(SystemTime::now())
    }

    fn acquire_at(&self, now: SystemTime) -> Result<PooledToken, AllThrottled> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let n = self.tokens.len();

        for _ in 0..n {
            let index = state.cursor;
            state.cursor = (state.cursor + 1) % n;
            if state.cooldown_until[index] <= now {
                return Ok(PooledToken {
                    index,
                    token: self.tokens[index].clone(),
                });
            }
        }

        let earliest = state
            .cooldown_until
            .iter()
            .min()
            .copied()
            .unwrap_or(now);
        Err(AllThrottled {
            retry_at: unix_secs(earliest),
        })
    }

    /// Put a token on cooldown until `reset_at` (unix seconds), or for a
    /// default period when unknown. Always at least one second.
    pub fn mark_rate_limited(&self, token: &PooledToken, reset_at: Option<u64>) {
        let now = SystemTime::now();
        let until = reset_at
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(now + DEFAULT_COOLDOWN)
            .max(now + Duration::from_secs(1));

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = state.cooldown_until.get_mut(token.index) {
            *slot = (*slot).max(until);
            warn!(
                token_slot = token.index,
                until = unix_secs(until),
                "Search token rate limited, cooling down"
            );
        }
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
