//! Deployment cache
//!
//! Keyed store of deployment records and their log tails. Every fetch goes
//! through here so that:
//!
//! - at most one request per (id, purpose) is in flight; later callers join it
//! - responses are applied in the order their requests were issued, using a
//!   cache-wide sequence number; anything older than the last applied or
//!   invalidated state is dropped
//! - results of fetches issued for a subscription are dropped once that
//!   subscription has ended
//! - a failure is kept per key and never leaks into other ids

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::http::deployments::DeploymentApi;
use crate::models::deployment::{sort_newest_first, Deployment, DeploymentStatus, LogEntry};

const EVENT_CAPACITY: usize = 64;

/// Cache tuning
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Age after which a cached value is re-fetched on read
    pub stale_after: Duration,

    /// Unsubscribed entries untouched for this long are evicted
    pub idle_ttl: Duration,

    /// Maximum number of deployment entries
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            idle_ttl: Duration::from_secs(600),
            capacity: 100,
        }
    }
}

/// What a fetch is for; one in-flight request per (id, purpose)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPurpose {
    Record,
    Logs,
    List,
}

/// Published after the cache changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A newer deployment record was applied
    Updated { id: String, status: DeploymentStatus },

    /// A newer log tail was applied
    LogsUpdated { id: String, count: usize },

    /// The record was marked stale; the next read re-fetches
    Invalidated { id: String },

    /// The deployment no longer exists
    Removed { id: String },
}

/// Read-only view of one entry
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub deployment: Option<Deployment>,
    pub deployment_error: Option<ClientError>,
    pub logs: Option<Vec<LogEntry>>,
    pub logs_error: Option<ClientError>,
    pub stale: bool,
    pub logs_stale: bool,
    pub fetched_at: Option<Instant>,
    pub subscribers: usize,
    pub active_poll: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    IfStale,
    Force,
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, ClientError>>>;

struct InFlight<T> {
    seq: u64,
    origin: Option<Arc<SubscriptionState>>,
    issued_at: Instant,
    future: SharedFetch<T>,
}

impl<T> InFlight<T> {
    /// A fetch whose subscription ended can no longer be applied, so nobody
    /// should wait on it.
    fn is_orphaned(&self) -> bool {
        self.origin.as_ref().is_some_and(|o| !o.is_active())
    }

    /// Whether this fetch still pins its entry. A caller may drop the
    /// future without awaiting it, so a fetch older than `ttl` stops counting.
    fn pins(&self, now: Instant, ttl: Duration) -> bool {
        !self.is_orphaned() && now.duration_since(self.issued_at) < ttl
    }
}

struct Slot<T> {
    value: Option<T>,
    error: Option<ClientError>,
    fetched_at: Option<Instant>,
    stale: bool,
    /// Responses issued at or before this number are ignored
    floor_seq: u64,
    applied_seq: u64,
    inflight: Option<InFlight<T>>,
}

impl<T: Clone> Slot<T> {
    fn new(floor_seq: u64) -> Self {
        Self {
            value: None,
            error: None,
            fetched_at: None,
            stale: false,
            floor_seq,
            applied_seq: floor_seq,
            inflight: None,
        }
    }

    fn is_fresh(&self, now: Instant, stale_after: Duration) -> bool {
        !self.stale
            && self.value.is_some()
            && self
                .fetched_at
                .is_some_and(|at| now.duration_since(at) < stale_after)
    }

    fn is_pinned(&self, now: Instant, ttl: Duration) -> bool {
        self.inflight.as_ref().is_some_and(|f| f.pins(now, ttl))
    }

    /// Keep the value on screen, but never let a response issued before
    /// this point count as fresh.
    fn invalidate(&mut self, floor_seq: u64) {
        self.stale = true;
        self.floor_seq = floor_seq;
        self.inflight = None;
    }
}

struct Entry {
    record: Slot<Deployment>,
    logs: Slot<Vec<LogEntry>>,
    subscribers: usize,
    active_poll: bool,
    last_access: Instant,
}

impl Entry {
    fn new(floor_seq: u64, now: Instant) -> Self {
        Self {
            record: Slot::new(floor_seq),
            logs: Slot::new(floor_seq),
            subscribers: 0,
            active_poll: false,
            last_access: now,
        }
    }

    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        self.subscribers == 0 && !self.record.is_pinned(now, ttl) && !self.logs.is_pinned(now, ttl)
    }
}

struct State {
    entries: HashMap<String, Entry>,
    list: Slot<Vec<Deployment>>,
}

trait Resource: 'static {
    type Value: Clone + Send + Sync + 'static;

    const PURPOSE: FetchPurpose;

    fn slot<'a>(state: &'a mut State, id: &str) -> Option<&'a mut Slot<Self::Value>>;

    fn call(api: Arc<dyn DeploymentApi>, id: String) -> BoxFuture<'static, Result<Self::Value, ClientError>>;

    fn event(id: &str, value: &Self::Value) -> Option<CacheEvent>;
}

struct Record;
struct Logs;
struct Listing;

impl Resource for Record {
    type Value = Deployment;

    const PURPOSE: FetchPurpose = FetchPurpose::Record;

    fn slot<'a>(state: &'a mut State, id: &str) -> Option<&'a mut Slot<Deployment>> {
        state.entries.get_mut(id).map(|e| &mut e.record)
    }

    fn call(api: Arc<dyn DeploymentApi>, id: String) -> BoxFuture<'static, Result<Deployment, ClientError>> {
        async move { api.get_deployment(&id).await }.boxed()
    }

    fn event(id: &str, value: &Deployment) -> Option<CacheEvent> {
        Some(CacheEvent::Updated {
            id: id.to_string(),
            status: value.status.clone(),
        })
    }
}

impl Resource for Logs {
    type Value = Vec<LogEntry>;

    const PURPOSE: FetchPurpose = FetchPurpose::Logs;

    fn slot<'a>(state: &'a mut State, id: &str) -> Option<&'a mut Slot<Vec<LogEntry>>> {
        state.entries.get_mut(id).map(|e| &mut e.logs)
    }

    fn call(api: Arc<dyn DeploymentApi>, id: String) -> BoxFuture<'static, Result<Vec<LogEntry>, ClientError>> {
        async move { api.get_logs(&id).await }.boxed()
    }

    fn event(id: &str, value: &Vec<LogEntry>) -> Option<CacheEvent> {
        Some(CacheEvent::LogsUpdated {
            id: id.to_string(),
            count: value.len(),
        })
    }
}

impl Resource for Listing {
    type Value = Vec<Deployment>;

    const PURPOSE: FetchPurpose = FetchPurpose::List;

    fn slot<'a>(state: &'a mut State, _id: &str) -> Option<&'a mut Slot<Vec<Deployment>>> {
        Some(&mut state.list)
    }

    fn call(api: Arc<dyn DeploymentApi>, _id: String) -> BoxFuture<'static, Result<Vec<Deployment>, ClientError>> {
        async move {
            let mut deployments = api.list_deployments().await?;
            sort_newest_first(&mut deployments);
            Ok(deployments)
        }
        .boxed()
    }

    fn event(_id: &str, _value: &Vec<Deployment>) -> Option<CacheEvent> {
        None
    }
}

struct Inner {
    api: Arc<dyn DeploymentApi>,
    options: CacheOptions,
    state: Mutex<State>,
    seq: AtomicU64,
    events: broadcast::Sender<CacheEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, event: CacheEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn ensure_entry(&self, state: &mut State, id: &str, now: Instant) {
        if let Some(entry) = state.entries.get_mut(id) {
            entry.last_access = now;
            return;
        }

        self.evict(state, now);
        state
            .entries
            .insert(id.to_string(), Entry::new(self.current_seq(), now));
    }

    fn evict(&self, state: &mut State, now: Instant) {
        let ttl = self.options.idle_ttl;
        state.entries.retain(|id, entry| {
            let keep = !entry.is_idle(now, ttl) || now.duration_since(entry.last_access) < ttl;
            if !keep {
                debug!(id = %id, "Evicting idle cache entry");
            }
            keep
        });

        if state.entries.len() < self.options.capacity {
            return;
        }

        if let Some(oldest_id) = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_idle(now, ttl))
            .min_by_key(|(_, e)| e.last_access)
            .map(|(id, _)| id.clone())
        {
            debug!(id = %oldest_id, "Cache at capacity, evicting oldest idle entry");
            state.entries.remove(&oldest_id);
        }
    }

    fn complete<R: Resource>(
        &self,
        id: &str,
        seq: u64,
        origin: Option<&SubscriptionState>,
        result: Result<R::Value, ClientError>,
    ) -> Result<R::Value, ClientError> {
        let mut state = self.lock();
        let Some(slot) = R::slot(&mut state, id) else {
            debug!(id, seq, purpose = ?R::PURPOSE, "Entry removed, dropping response");
            return result;
        };

        if slot.inflight.as_ref().is_some_and(|f| f.seq == seq) {
            slot.inflight = None;
        }

        if origin.is_some_and(|o| !o.is_active()) {
            debug!(id, seq, purpose = ?R::PURPOSE, "Subscription ended, dropping response");
            return result;
        }

        if seq <= slot.floor_seq || seq <= slot.applied_seq {
            warn!(
                id,
                seq,
                applied = slot.applied_seq,
                floor = slot.floor_seq,
                purpose = ?R::PURPOSE,
                "Dropping superseded response"
            );
            // A late failure is still reported to its caller; only a late
            // success is swapped for the newer cached value.
            return match (&result, &slot.value) {
                (Ok(_), Some(value)) => Ok(value.clone()),
                _ => result,
            };
        }

        slot.applied_seq = seq;
        let event = match &result {
            Ok(value) => {
                slot.value = Some(value.clone());
                slot.error = None;
                slot.fetched_at = Some(Instant::now());
                slot.stale = false;
                R::event(id, value)
            }
            Err(e) => {
                slot.error = Some(e.clone());
                None
            }
        };
        drop(state);

        if let Some(event) = event {
            self.publish(event);
        }
        result
    }
}

/// Issue (or join) a fetch. The request is registered before this returns,
/// so issue order is call order.
fn fetch<R: Resource>(
    inner: &Arc<Inner>,
    id: &str,
    mode: FetchMode,
    origin: Option<Arc<SubscriptionState>>,
) -> BoxFuture<'static, Result<R::Value, ClientError>> {
    let now = Instant::now();
    let mut state = inner.lock();
    if R::PURPOSE != FetchPurpose::List {
        inner.ensure_entry(&mut state, id, now);
    }

    let Some(slot) = R::slot(&mut state, id) else {
        return future::ready(Err(ClientError::Internal(format!("no cache slot for {}", id)))).boxed();
    };

    if mode == FetchMode::IfStale && slot.is_fresh(now, inner.options.stale_after) {
        if let Some(value) = slot.value.clone() {
            return future::ready(Ok(value)).boxed();
        }
    }

    if let Some(inflight) = slot.inflight.as_ref().filter(|f| !f.is_orphaned()) {
        debug!(id, seq = inflight.seq, purpose = ?R::PURPOSE, "Joining in-flight fetch");
        return inflight.future.clone().boxed();
    }

    let seq = inner.next_seq();
    let api = inner.api.clone();
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let task_id = id.to_string();
    let task_origin = origin.clone();

    let pending = async move {
        let result = R::call(api, task_id.clone()).await;
        match weak.upgrade() {
            Some(inner) => inner.complete::<R>(&task_id, seq, task_origin.as_deref(), result),
            None => result,
        }
    }
    .boxed()
    .shared();

    slot.inflight = Some(InFlight {
        seq,
        origin,
        issued_at: now,
        future: pending.clone(),
    });
    debug!(id, seq, purpose = ?R::PURPOSE, "Issued fetch");

    pending.boxed()
}

/// Shared, cloneable handle to the deployment cache
#[derive(Clone)]
pub struct DeploymentCache {
    inner: Arc<Inner>,
}

impl DeploymentCache {
    pub fn new(api: Arc<dyn DeploymentApi>, options: CacheOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Inner {
            api,
            options,
            state: Mutex::new(State {
                entries: HashMap::new(),
                list: Slot::new(0),
            }),
            seq: AtomicU64::new(0),
            events,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Cached record if fresh, otherwise a (possibly joined) fetch
    pub fn get(&self, id: &str) -> BoxFuture<'static, Result<Deployment, ClientError>> {
        fetch::<Record>(&self.inner, id, FetchMode::IfStale, None)
    }

    /// Re-fetch the record regardless of age; joins a fetch already in flight
    pub fn refresh(&self, id: &str) -> BoxFuture<'static, Result<Deployment, ClientError>> {
        fetch::<Record>(&self.inner, id, FetchMode::Force, None)
    }

    /// Cached log tail if fresh, otherwise a fetch
    pub fn logs(&self, id: &str) -> BoxFuture<'static, Result<Vec<LogEntry>, ClientError>> {
        fetch::<Logs>(&self.inner, id, FetchMode::IfStale, None)
    }

    pub fn refresh_logs(&self, id: &str) -> BoxFuture<'static, Result<Vec<LogEntry>, ClientError>> {
        fetch::<Logs>(&self.inner, id, FetchMode::Force, None)
    }

    /// All deployments, newest first
    pub fn list(&self) -> BoxFuture<'static, Result<Vec<Deployment>, ClientError>> {
        fetch::<Listing>(&self.inner, "", FetchMode::IfStale, None)
    }

    pub fn refresh_list(&self) -> BoxFuture<'static, Result<Vec<Deployment>, ClientError>> {
        fetch::<Listing>(&self.inner, "", FetchMode::Force, None)
    }

    /// Mark the record stale without dropping it.
    pub fn invalidate(&self, id: &str) {
        let floor = self.inner.current_seq();
        {
            let mut state = self.inner.lock();
            let Some(entry) = state.entries.get_mut(id) else {
                return;
            };
            entry.record.invalidate(floor);
        }
        debug!(id, floor, "Invalidated deployment record");
        self.inner.publish(CacheEvent::Invalidated { id: id.to_string() });
    }

    /// Mark the log tail stale; the next log fetch starts a fresh stream.
    pub fn invalidate_logs(&self, id: &str) {
        let floor = self.inner.current_seq();
        let mut state = self.inner.lock();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.logs.invalidate(floor);
            debug!(id, floor, "Invalidated log tail");
        }
    }

    pub fn invalidate_list(&self) {
        let floor = self.inner.current_seq();
        self.inner.lock().list.invalidate(floor);
    }

    /// Drop everything known about `id` and tell its views it is gone.
    pub fn remove(&self, id: &str) {
        let floor = self.inner.current_seq();
        {
            let mut state = self.inner.lock();
            state.entries.remove(id);
            if let Some(list) = state.list.value.as_mut() {
                list.retain(|d| d.id != id);
            }
            state.list.invalidate(floor);
        }
        debug!(id, "Removed deployment from cache");
        self.inner.publish(CacheEvent::Removed { id: id.to_string() });
    }

    /// Forget every entry; responses still in flight are dropped.
    pub fn clear(&self) {
        let floor = self.inner.current_seq();
        let mut state = self.inner.lock();
        state.entries.clear();
        state.list = Slot::new(floor);
    }

    pub fn peek(&self, id: &str) -> Option<EntrySnapshot> {
        let state = self.inner.lock();
        state.entries.get(id).map(|e| EntrySnapshot {
            deployment: e.record.value.clone(),
            deployment_error: e.record.error.clone(),
            logs: e.logs.value.clone(),
            logs_error: e.logs.error.clone(),
            stale: e.record.stale,
            logs_stale: e.logs.stale,
            fetched_at: e.record.fetched_at,
            subscribers: e.subscribers,
            active_poll: e.active_poll,
        })
    }

    pub fn peek_list(&self) -> Option<Vec<Deployment>> {
        self.inner.lock().list.value.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Register a view of `id`. Fetches issued through the subscription are
    /// applied only while it is alive.
    pub fn subscribe(&self, id: &str) -> Subscription {
        {
            let mut state = self.inner.lock();
            self.inner.ensure_entry(&mut state, id, Instant::now());
            if let Some(entry) = state.entries.get_mut(id) {
                entry.subscribers += 1;
            }
        }
        Subscription {
            id: id.to_string(),
            token: Arc::new(SubscriptionState {
                active: AtomicBool::new(true),
            }),
            inner: self.inner.clone(),
        }
    }
}

#[derive(Debug)]
struct SubscriptionState {
    active: AtomicBool,
}

impl SubscriptionState {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// A view's hold on one deployment; dropping it ends the subscription.
pub struct Subscription {
    id: String,
    token: Arc<SubscriptionState>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.token.is_active()
    }

    pub fn refresh(&self) -> BoxFuture<'static, Result<Deployment, ClientError>> {
        fetch::<Record>(&self.inner, &self.id, FetchMode::Force, Some(self.token.clone()))
    }

    pub fn refresh_logs(&self) -> BoxFuture<'static, Result<Vec<LogEntry>, ClientError>> {
        fetch::<Logs>(&self.inner, &self.id, FetchMode::Force, Some(self.token.clone()))
    }

    /// Last record applied to the cache, fresh or not
    pub fn cached(&self) -> Option<Deployment> {
        self.inner
            .lock()
            .entries
            .get(&self.id)
            .and_then(|e| e.record.value.clone())
    }

    pub fn set_polling(&self, polling: bool) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&self.id) {
            entry.active_poll = polling;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.active.store(false, Ordering::SeqCst);
        if let Some(entry) = self.inner.lock().entries.get_mut(&self.id) {
            let owned = |origin: &Option<Arc<SubscriptionState>>| {
                origin.as_ref().is_some_and(|o| Arc::ptr_eq(o, &self.token))
            };
            if entry.record.inflight.as_ref().is_some_and(|f| owned(&f.origin)) {
                entry.record.inflight = None;
            }
            if entry.logs.inflight.as_ref().is_some_and(|f| owned(&f.origin)) {
                entry.logs.inflight = None;
            }
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.active_poll = false;
            }
            entry.last_access = Instant::now();
        }
    }
}
