//! Versioned compare-and-update for objects with concurrent writers

use std::fmt::Debug;
use std::time::Duration;

use kube::api::{Api, PostParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{is_conflict, Error, Result};

/// Attempt budget for a single correction. On exhaustion the failure is
/// surfaced to the caller; the next watch event or resync retries from
/// scratch against fresh state.
pub const MAX_ATTEMPTS: u32 = 5;

/// Read-modify-write under optimistic concurrency. The object is fetched
/// fresh (never patched from a cached copy), mutated in place, and written
/// back carrying the resourceVersion from the read, so the API server
/// rejects the write with 409 if any other writer got there first. Only
/// Conflict is retried; every other failure propagates immediately.
pub async fn update_with_conflict_retry<K, F>(
    api: &Api<K>,
    kind: &'static str,
    name: &str,
    mutate: F,
) -> Result<K>
where
    K: Clone + Debug + DeserializeOwned + Serialize,
    F: Fn(&mut K),
{
    let mut attempt = 0;
    loop {
        let mut obj = api.get(name).await.map_err(Error::KubeError)?;
        mutate(&mut obj);

        match api.replace(name, &PostParams::default(), &obj).await {
            Ok(updated) => return Ok(updated),
            Err(err) if is_conflict(&err) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(Error::ConflictExhausted {
                        kind,
                        name: name.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = conflict_backoff(attempt - 1);
                debug!(
                    "Conflict updating {} {:?} (attempt {}/{}), retrying in {:?}",
                    kind, name, attempt, MAX_ATTEMPTS, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(Error::KubeError(err)),
        }
    }
}

/// Exponential backoff between conflict retries: 20ms * 2^attempt, capped at
/// one second.
pub fn conflict_backoff(attempt: u32) -> Duration {
    let millis = 20u64.saturating_mul(2u64.saturating_pow(attempt.min(6))).min(1000);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        assert_eq!(conflict_backoff(0), Duration::from_millis(20));
        assert_eq!(conflict_backoff(1), Duration::from_millis(40));
        assert_eq!(conflict_backoff(2), Duration::from_millis(80));
        assert_eq!(conflict_backoff(3), Duration::from_millis(160));
        // capped at 1s
        assert_eq!(conflict_backoff(6), Duration::from_millis(1000));
        assert_eq!(conflict_backoff(42), Duration::from_millis(1000));
    }
}
