//! Response Cache (C10).
//!
//! Non-streaming path only (§4.10). Key = SHA-256 over
//! `"agent:" ∥ name ∥ "|prompt:" ∥ prompt ∥ "|args:" ∥ sorted-kv(args)`.
//! Guarantees at-most-one concurrent compute per key (singleflight, P2):
//! concurrent callers for a missing key await one in-flight computation;
//! only successful results are stored, with a TTL. Open Question 2: this
//! cache is in-memory only — no cross-restart persistence.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::agents::reasoning::FinalResponse;

/// Default TTL (§4.10, §6 timeouts table).
pub const DEFAULT_TTL_SECS: u64 = 600;

#[derive(Clone)]
struct CacheEntry {
    value: FinalResponse,
    expires_at: Instant,
}

enum Slot {
    /// A computation is in flight; late-arriving callers subscribe.
    InFlight(broadcast::Sender<Result<FinalResponse, String>>),
    Ready(CacheEntry),
}

/// Canonical cache key derivation (§4.10).
pub fn cache_key(agent_name: &str, prompt: &str, args: &Value) -> String {
    let canonical_args = canonicalize(args);
    let mut hasher = Sha256::new();
    hasher.update(b"agent:");
    hasher.update(agent_name.as_bytes());
    hasher.update(b"|prompt:");
    hasher.update(prompt.as_bytes());
    hasher.update(b"|args:");
    hasher.update(canonical_args.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sort object keys recursively so equivalent argument maps hash identically
/// regardless of insertion order.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let parts: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{k}={}", canonicalize(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// Read-through singleflight cache keyed by (agent, prompt, args).
pub struct ResponseCache {
    slots: Arc<DashMap<String, Slot>>,
    ttl: Duration,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            ttl,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Get-or-compute: `compute` runs at most once per key while the result
    /// is missing or expired; concurrent callers for the same key await that
    /// single computation (P2).
    pub async fn get_or_compute<F, Fut>(&self, key: String, compute: F) -> Result<FinalResponse, String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<FinalResponse, String>>,
    {
        loop {
            let mut subscribe_to = None;
            let mut become_leader = false;

            match self.slots.get(&key).map(|e| match e.value() {
                Slot::Ready(entry) if entry.expires_at > Instant::now() => {
                    Some(Ok::<FinalResponse, ()>(entry.value.clone()))
                }
                Slot::Ready(_) => None,
                Slot::InFlight(tx) => {
                    subscribe_to = Some(tx.subscribe());
                    None
                }
            }) {
                Some(Some(Ok(value))) => {
                    self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return Ok(value);
                }
                _ => {}
            }

            if subscribe_to.is_none() && !self.slots.contains_key(&key) {
                become_leader = true;
            } else if let Some(entry) = self.slots.get(&key) {
                if matches!(entry.value(), Slot::Ready(e) if e.expires_at <= Instant::now()) {
                    become_leader = true;
                }
            }

            if become_leader {
                let (tx, _rx) = broadcast::channel(16);
                let inserted_as_leader = match self.slots.entry(key.clone()) {
                    dashmap::mapref::entry::Entry::Vacant(v) => {
                        v.insert(Slot::InFlight(tx.clone()));
                        true
                    }
                    dashmap::mapref::entry::Entry::Occupied(mut o) => {
                        if matches!(o.get(), Slot::Ready(e) if e.expires_at <= Instant::now()) {
                            o.insert(Slot::InFlight(tx.clone()));
                            true
                        } else {
                            false
                        }
                    }
                };

                if inserted_as_leader {
                    self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let result = compute().await;
                    match &result {
                        Ok(value) => {
                            self.slots.insert(
                                key.clone(),
                                Slot::Ready(CacheEntry {
                                    value: value.clone(),
                                    expires_at: Instant::now() + self.ttl,
                                }),
                            );
                            let _ = tx.send(Ok(value.clone()));
                        }
                        Err(message) => {
                            self.slots.remove(&key);
                            let _ = tx.send(Err(message.clone()));
                        }
                    }
                    return result;
                }
                // Lost the race to become leader; loop and resubscribe.
                continue;
            }

            if let Some(mut rx) = subscribe_to {
                self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return match rx.recv().await {
                    Ok(result) => result,
                    Err(_) => Err("singleflight leader dropped without a result".to_string()),
                };
            }
            // Entry became ready between the first check and here; loop once more.
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::reasoning::FinishReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(text: &str) -> FinalResponse {
        FinalResponse { text: text.to_string(), finish_reason: FinishReason::Stop }
    }

    #[test]
    fn cache_key_is_stable_regardless_of_arg_order() {
        let a = serde_json::json!({"b": 2, "a": 1});
        let b = serde_json::json!({"a": 1, "b": 2});
        assert_eq!(cache_key("agent", "hi", &a), cache_key("agent", "hi", &b));
    }

    #[test]
    fn cache_key_differs_by_prompt() {
        let args = serde_json::json!({});
        assert_ne!(cache_key("agent", "hi", &args), cache_key("agent", "bye", &args));
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_a_hit() {
        let cache = ResponseCache::with_default_ttl();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_compute("k".to_string(), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(response("hello"))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_collapse_to_one_compute() {
        let cache = Arc::new(ResponseCache::with_default_ttl());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("same-key".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(response("computed"))
                    })
                    .await
            }));
        }

        for h in handles {
            let result = h.await.unwrap().unwrap();
            assert_eq!(result.text, "computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_compute_is_not_cached() {
        let cache = ResponseCache::with_default_ttl();
        let first = cache
            .get_or_compute("err-key".to_string(), || async { Err("boom".to_string()) })
            .await;
        assert!(first.is_err());

        let second = cache
            .get_or_compute("err-key".to_string(), || async { Ok(response("recovered")) })
            .await
            .unwrap();
        assert_eq!(second.text, "recovered");
    }

    #[tokio::test]
    async fn expired_entry_recomputes() {
        let cache = ResponseCache::new(Duration::from_millis(10));
        cache
            .get_or_compute("exp-key".to_string(), || async { Ok(response("v1")) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = cache
            .get_or_compute("exp-key".to_string(), || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(response("v2"))
            })
            .await
            .unwrap();
        assert_eq!(result.text, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
