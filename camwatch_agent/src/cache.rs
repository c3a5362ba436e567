//! TTL cache in front of a slow, unreliable remote source.
//!
//! Each instance owns one value and moves through three states:
//!
//! ```text
//! Empty --ok--> Fresh --ttl--> Stale --ok--> Fresh
//!   |                            |
//!   +--err--> Empty              +--err--> Stale (last value, stale = true)
//! ```
//!
//! Refreshes are single-flight: the first caller that finds the entry expired
//! spawns the refresh task, later callers await the same task. The task runs
//! to completion even if every waiting caller goes away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CacheError, FetchError};

/// One fetch of the remote value.
#[async_trait]
pub trait RemoteFetch<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, FetchError>;
}

/// Re-establish whatever credentials the fetcher relies on. Safe to call
/// repeatedly.
#[async_trait]
pub trait CredentialRefresh: Send + Sync {
    async fn refresh_credentials(&self) -> Result<(), FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// Bound on a single fetch attempt; a timeout counts as a failed fetch.
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<T> {
    pub value: T,
    pub captured_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
        }
    }
}

/// What a caller gets back: a copy of the value and whether it is past its TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub stale: bool,
    pub age: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub fetches: u64,
    pub failures: u64,
    pub auth_retries: u64,
}

pub fn classify<T>(entry: Option<&CachedValue<T>>, now: Instant, ttl: Duration) -> CacheState {
    match entry {
        None => CacheState::Empty,
        Some(e) if now.saturating_duration_since(e.captured_at) < ttl => CacheState::Fresh,
        Some(_) => CacheState::Stale,
    }
}

/// Store a successful fetch; a failure leaves the entry (and its timestamp)
/// untouched.
pub fn apply_refresh<T>(
    entry: &mut Option<CachedValue<T>>,
    outcome: Result<T, FetchError>,
    now: Instant,
) -> Result<(), FetchError> {
    match outcome {
        Ok(value) => {
            *entry = Some(CachedValue {
                value,
                captured_at: now,
            });
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// What the callers of a refresh see, given its outcome.
pub fn resolve<T: Clone>(
    metric: &str,
    entry: Option<&CachedValue<T>>,
    outcome: &Result<(), FetchError>,
    now: Instant,
) -> Result<Cached<T>, CacheError> {
    match (entry, outcome) {
        (Some(e), Ok(())) => Ok(view(e, now, false)),
        (Some(e), Err(_)) => Ok(view(e, now, true)),
        (None, Err(cause)) => Err(CacheError::NoDataAvailable {
            metric: metric.to_string(),
            cause: cause.clone(),
        }),
        (None, Ok(())) => Err(CacheError::NoDataAvailable {
            metric: metric.to_string(),
            cause: FetchError::Malformed("refresh reported success without a value".into()),
        }),
    }
}

fn view<T: Clone>(e: &CachedValue<T>, now: Instant, stale: bool) -> Cached<T> {
    Cached {
        value: e.value.clone(),
        stale,
        age: now.saturating_duration_since(e.captured_at),
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<(), FetchError>>>;

struct Slot<T> {
    entry: Option<CachedValue<T>>,
    inflight: Option<RefreshFuture>,
}

struct Inner<T> {
    name: String,
    policy: CachePolicy,
    fetcher: Arc<dyn RemoteFetch<T>>,
    credentials: Option<Arc<dyn CredentialRefresh>>,
    slot: Mutex<Slot<T>>,
    fetches: AtomicU64,
    failures: AtomicU64,
    auth_retries: AtomicU64,
}

/// Handle to one cached remote metric. Clones share the same entry.
pub struct RemoteCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RemoteCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> RemoteCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        policy: CachePolicy,
        fetcher: Arc<dyn RemoteFetch<T>>,
        credentials: Option<Arc<dyn CredentialRefresh>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                policy,
                fetcher,
                credentials,
                slot: Mutex::new(Slot {
                    entry: None,
                    inflight: None,
                }),
                fetches: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                auth_retries: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn policy(&self) -> CachePolicy {
        self.inner.policy
    }

    /// Fresh value without a remote call, otherwise one refresh (shared with any
    /// concurrent callers), falling back to the last value marked stale.
    ///
    /// Must be called inside a tokio runtime: the refresh runs as its own task.
    pub async fn get(&self) -> Result<Cached<T>, CacheError> {
        let refresh = {
            let mut slot = self.inner.lock();
            let now = Instant::now();
            if let Some(e) = slot.entry.as_ref() {
                if classify(Some(e), now, self.inner.policy.ttl) == CacheState::Fresh {
                    debug!(cache = %self.inner.name, "cache hit");
                    return Ok(view(e, now, false));
                }
            }
            slot.inflight
                .get_or_insert_with(|| self.spawn_refresh())
                .clone()
        };
        let outcome = refresh.await;
        let slot = self.inner.lock();
        resolve(&self.inner.name, slot.entry.as_ref(), &outcome, Instant::now())
    }

    /// Current state without triggering a refresh.
    pub fn state(&self) -> CacheState {
        let slot = self.inner.lock();
        classify(slot.entry.as_ref(), Instant::now(), self.inner.policy.ttl)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            auth_retries: self.inner.auth_retries.load(Ordering::Relaxed),
        }
    }

    // Called with the slot lock held; the task itself only locks after fetching.
    fn spawn_refresh(&self) -> RefreshFuture {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut guard = InflightGuard {
                inner: Arc::clone(&inner),
                armed: true,
            };
            let outcome = inner.fetch_with_auth_retry().await;
            let mut slot = inner.lock();
            slot.inflight = None;
            guard.armed = false;
            let result = apply_refresh(&mut slot.entry, outcome, Instant::now());
            match &result {
                Ok(()) => debug!(cache = %inner.name, "refreshed"),
                Err(e) => {
                    inner.failures.fetch_add(1, Ordering::Relaxed);
                    if slot.entry.is_some() {
                        warn!(cache = %inner.name, reason = e.kind(), "refresh failed, serving stale value: {e}");
                    } else {
                        warn!(cache = %inner.name, reason = e.kind(), "refresh failed, no data available: {e}");
                    }
                }
            }
            result
        });
        handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(FetchError::Transport(format!("refresh task aborted: {e}")))
                })
            })
            .boxed()
            .shared()
    }
}

/// Clears the in-flight refresh when the task unwinds (a panicking fetcher)
/// or is dropped before it stored an outcome. Otherwise every later caller
/// would await the same finished failure.
struct InflightGuard<T>
where
    T: Send + Sync + 'static,
{
    inner: Arc<Inner<T>>,
    armed: bool,
}

impl<T> Drop for InflightGuard<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().inflight = None;
        warn!(cache = %self.inner.name, "refresh task ended without an outcome");
    }
}

impl<T> Inner<T>
where
    T: Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_once(&self) -> Result<T, FetchError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let limit = self.policy.fetch_timeout;
        match tokio::time::timeout(limit, self.fetcher.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(limit)),
        }
    }

    /// One fetch; on an auth rejection, one credential refresh and one retry.
    async fn fetch_with_auth_retry(&self) -> Result<T, FetchError> {
        let first = self.fetch_once().await;
        let Some(creds) = self.credentials.as_ref() else {
            return first;
        };
        if !matches!(&first, Err(e) if e.is_auth()) {
            return first;
        }
        self.auth_retries.fetch_add(1, Ordering::Relaxed);
        info!(cache = %self.name, "credentials rejected, refreshing and retrying once");
        let limit = self.policy.fetch_timeout;
        match tokio::time::timeout(limit, creds.refresh_credentials()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(cache = %self.name, "credential refresh failed: {e}"),
            Err(_) => warn!(cache = %self.name, "credential refresh timed out after {limit:?}"),
        }
        self.fetch_once().await
    }
}
