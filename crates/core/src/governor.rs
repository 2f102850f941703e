//! Rate and concurrency governance for external API calls.
//!
//! Every collaborator call passes through [`RateGovernor::acquire`] first.
//! Each named API has two independent limits: a maximum number of in-flight
//! calls, and a maximum number of call starts within any trailing 60-second
//! window. The in-flight slot is released when the returned [`Permit`] drops,
//! on every exit path; window entries are never released early, they age out.
//!
//! Ledgers are shared by all runs in the process, so the limits are a global
//! budget. Fairness is FIFO via the tokio semaphore queue.

use serde::Deserialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Limits for one named API.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct ApiLimits {
    /// Maximum simultaneously in-flight calls.
    pub max_concurrent: usize,

    /// Maximum call starts within any trailing window.
    pub max_per_minute: usize,
}

/// Errors surfaced by the governor.
#[derive(Error, Debug)]
pub enum GovernorError {
    /// The API name has no configured limits. Unknown names are rejected so
    /// a typo cannot bypass budgeting.
    #[error("no limits configured for api '{0}'")]
    UnknownApi(String),

    /// The ledger's semaphore was closed; only reachable during shutdown.
    #[error("governor ledger closed for api '{0}'")]
    Closed(String),
}

struct ApiLedger {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_per_minute: usize,
    window: Duration,
    /// Call-start timestamps within the trailing window, oldest first.
    starts: Mutex<VecDeque<Instant>>,
}

/// Scoped acquisition of one in-flight slot for one API call.
///
/// Dropping the permit releases the slot. The window entry recorded at
/// acquisition stays until it ages out.
#[derive(Debug)]
pub struct Permit {
    _slot: OwnedSemaphorePermit,
}

/// Bounds concurrent and per-minute calls to each named external API.
pub struct RateGovernor {
    ledgers: HashMap<String, ApiLedger>,
}

impl RateGovernor {
    /// Build a governor with a 60-second trailing window.
    pub fn new(limits: impl IntoIterator<Item = (String, ApiLimits)>) -> Self {
        Self::with_window(limits, Duration::from_secs(60))
    }

    /// Build a governor with an explicit window length. Used by tests to
    /// exercise window aging without real minutes passing.
    pub fn with_window(
        limits: impl IntoIterator<Item = (String, ApiLimits)>,
        window: Duration,
    ) -> Self {
        let ledgers = limits
            .into_iter()
            .map(|(name, limits)| {
                let ledger = ApiLedger {
                    semaphore: Arc::new(Semaphore::new(limits.max_concurrent)),
                    max_concurrent: limits.max_concurrent,
                    max_per_minute: limits.max_per_minute,
                    window,
                    starts: Mutex::new(VecDeque::new()),
                };
                (name, ledger)
            })
            .collect();
        Self { ledgers }
    }

    /// Acquire a permit to start one call against `api`.
    ///
    /// Blocks (without busy-waiting) until both the in-flight and the
    /// trailing-window constraints are satisfiable, then records the call
    /// start. Callers hold the permit for the duration of the call.
    pub async fn acquire(&self, api: &str) -> Result<Permit, GovernorError> {
        let ledger = self
            .ledgers
            .get(api)
            .ok_or_else(|| GovernorError::UnknownApi(api.to_string()))?;

        let slot = Arc::clone(&ledger.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GovernorError::Closed(api.to_string()))?;

        loop {
            let wait = {
                let mut starts = ledger.starts.lock().await;
                let now = Instant::now();
                while let Some(oldest) = starts.front() {
                    if now.duration_since(*oldest) >= ledger.window {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }
                if starts.len() < ledger.max_per_minute {
                    starts.push_back(now);
                    None
                } else {
                    // Sleep until the oldest entry leaves the window, then
                    // re-check under the lock.
                    starts.front().map(|oldest| ledger.window - now.duration_since(*oldest))
                }
            };

            match wait {
                None => return Ok(Permit { _slot: slot }),
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Number of calls currently in flight for `api`.
    pub fn in_flight(&self, api: &str) -> Result<usize, GovernorError> {
        let ledger = self
            .ledgers
            .get(api)
            .ok_or_else(|| GovernorError::UnknownApi(api.to_string()))?;
        Ok(ledger.max_concurrent - ledger.semaphore.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_api(max_concurrent: usize, max_per_minute: usize) -> RateGovernor {
        RateGovernor::new([(
            "llm".to_string(),
            ApiLimits {
                max_concurrent,
                max_per_minute,
            },
        )])
    }

    #[tokio::test]
    async fn unknown_api_is_rejected() {
        let governor = single_api(1, 10);
        let err = governor.acquire("tts").await.unwrap_err();
        assert!(matches!(err, GovernorError::UnknownApi(name) if name == "tts"));
    }

    #[tokio::test]
    async fn permit_drop_releases_in_flight_slot() {
        let governor = single_api(1, 100);

        let permit = governor.acquire("llm").await.unwrap();
        assert_eq!(governor.in_flight("llm").unwrap(), 1);

        drop(permit);
        assert_eq!(governor.in_flight("llm").unwrap(), 0);

        // A second acquisition succeeds immediately after release.
        let _again = governor.acquire("llm").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_blocks_until_release() {
        let governor = Arc::new(single_api(1, 100));

        let first = governor.acquire("llm").await.unwrap();

        let contender = {
            let governor = Arc::clone(&governor);
            tokio::spawn(async move { governor.acquire("llm").await })
        };

        // The contender cannot proceed while the first permit is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn window_limit_delays_next_call_until_entry_ages_out() {
        let governor = RateGovernor::with_window(
            [(
                "llm".to_string(),
                ApiLimits {
                    max_concurrent: 10,
                    max_per_minute: 2,
                },
            )],
            Duration::from_secs(60),
        );

        let started = Instant::now();
        drop(governor.acquire("llm").await.unwrap());
        drop(governor.acquire("llm").await.unwrap());

        // Third call must wait out the trailing window.
        drop(governor.acquire("llm").await.unwrap());
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn independent_apis_do_not_stall_each_other() {
        let governor = RateGovernor::new([
            (
                "llm".to_string(),
                ApiLimits {
                    max_concurrent: 1,
                    max_per_minute: 100,
                },
            ),
            (
                "search".to_string(),
                ApiLimits {
                    max_concurrent: 1,
                    max_per_minute: 100,
                },
            ),
        ]);

        let _llm = governor.acquire("llm").await.unwrap();
        // Exhausting llm's in-flight budget leaves search unaffected.
        let _search = governor.acquire("search").await.unwrap();
        assert_eq!(governor.in_flight("llm").unwrap(), 1);
        assert_eq!(governor.in_flight("search").unwrap(), 1);
    }
}
