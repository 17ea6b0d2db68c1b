//! Per-deployment status poller and log tail

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::deployment::{CacheEvent, DeploymentCache, Subscription};
use crate::errors::ClientError;
use crate::models::deployment::{Deployment, DeploymentStatus, LogEntry};
use crate::utils::Backoff;
use crate::workers::plan::{log_policy, LogCursor, LogPolicy};

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Log re-fetch interval while building
    pub log_interval: Duration,

    /// Record re-fetch interval while queued
    pub record_interval: Duration,

    /// Upper bound for the delay after repeated failures
    pub max_backoff: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_interval: Duration::from_millis(2000),
            record_interval: Duration::from_millis(2000),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// What a tail reports to its view
#[derive(Debug, Clone)]
pub enum TailEvent {
    /// First record, and every status change after it
    Status(Deployment),

    /// Lines not reported before, in arrival order
    Logs(Vec<LogEntry>),

    /// Terminal status reached. Nothing more is fetched unless the
    /// deployment is rebuilt, in which case the tail resumes with a new
    /// `Status` and a fresh log stream.
    Ended(DeploymentStatus),

    /// A fetch failed; the tail keeps going unless the session is gone
    Error(ClientError),

    /// The deployment no longer exists
    Removed,
}

/// Receiving end of one deployment's tail. Dropping it stops the tail.
pub struct LogTail {
    id: String,
    events: mpsc::UnboundedReceiver<TailEvent>,
}

impl LogTail {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `None` once the tail has finished
    pub async fn next(&mut self) -> Option<TailEvent> {
        self.events.recv().await
    }
}

struct TailHandle {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns at most one tail task per deployment id
pub struct StatusPoller {
    cache: DeploymentCache,
    options: Options,
    tails: Mutex<HashMap<String, TailHandle>>,
}

impl StatusPoller {
    pub fn new(cache: DeploymentCache, options: Options) -> Self {
        Self {
            cache,
            options,
            tails: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TailHandle>> {
        self.tails.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tailing `id`, stopping any tail already running for it.
    pub fn watch(&self, id: &str) -> LogTail {
        self.stop(id);

        let subscription = self.cache.subscribe(id);
        let events = self.cache.events();
        let (tail_tx, tail_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let options = self.options.clone();

        let handle = tokio::spawn(async move {
            run(
                &options,
                subscription,
                events,
                tail_tx,
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = stop_rx.await;
                }),
            )
            .await;
        });

        self.lock().insert(
            id.to_string(),
            TailHandle {
                stop: stop_tx,
                handle,
            },
        );

        LogTail {
            id: id.to_string(),
            events: tail_rx,
        }
    }

    /// Returns whether a tail was running for `id`.
    pub fn stop(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(tail) => {
                let _ = tail.stop.send(());
                debug!(id, "Stopping log tail");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for (id, tail) in self.lock().drain() {
            let _ = tail.stop.send(());
            debug!(id = %id, "Stopping log tail");
        }
    }

    /// A tail that reported `Ended` still counts while it waits for a rebuild.
    pub fn is_watching(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|tail| !tail.handle.is_finished())
    }

    /// Stop every tail and wait for the tasks to exit.
    pub async fn shutdown(&self) {
        let tails: Vec<(String, TailHandle)> = self.lock().drain().collect();
        for (id, tail) in tails {
            let _ = tail.stop.send(());
            if let Err(e) = tail.handle.await {
                error!(id = %id, "Log tail task failed: {}", e);
            }
        }
    }
}

/// Run the tail of one deployment until the view goes away or the shutdown
/// signal fires. A finished deployment keeps its tail waiting for a rebuild;
/// removal and session loss end it early.
pub async fn run<S, F>(
    options: &Options,
    subscription: Subscription,
    mut events: broadcast::Receiver<CacheEvent>,
    tail_tx: mpsc::UnboundedSender<TailEvent>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let id = subscription.id().to_string();
    info!(id = %id, "Log tail starting...");
    subscription.set_polling(true);

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!(id = %id, "Log tail shutting down...");
        }
        _ = tail_tx.closed() => {
            debug!(id = %id, "Log tail view dropped");
        }
        _ = tail(options, &subscription, &mut events, &tail_tx, &sleep_fn) => {}
    }

    subscription.set_polling(false);
}

enum Wake {
    Elapsed,
    Terminal(Deployment),
    Removed,
}

/// Where a tail left off; survives a deployment going back to work
struct Progress {
    cursor: LogCursor,
    last_status: Option<DeploymentStatus>,
    known: Option<Deployment>,
}

async fn tail<S, F>(
    options: &Options,
    subscription: &Subscription,
    events: &mut broadcast::Receiver<CacheEvent>,
    tail_tx: &mpsc::UnboundedSender<TailEvent>,
    sleep_fn: &S,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let send = |event: TailEvent| {
        let _ = tail_tx.send(event);
    };

    let mut progress = Progress {
        cursor: LogCursor::new(),
        last_status: None,
        known: None,
    };

    loop {
        let Some(status) = follow(options, subscription, events, &send, sleep_fn, &mut progress).await else {
            return;
        };
        send(TailEvent::Ended(status));

        subscription.set_polling(false);
        let Some(deployment) = resume(subscription, events, &send).await else {
            return;
        };
        subscription.set_polling(true);

        // A rebuild starts a new log stream.
        progress.cursor = LogCursor::new();
        progress.known = Some(deployment);
    }
}

/// Poll until the deployment reaches a terminal status, which is returned.
/// `None` means the tail is over for good.
async fn follow<S, F, E>(
    options: &Options,
    subscription: &Subscription,
    events: &mut broadcast::Receiver<CacheEvent>,
    send: &E,
    sleep_fn: &S,
    progress: &mut Progress,
) -> Option<DeploymentStatus>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
    E: Fn(TailEvent),
{
    let id = subscription.id().to_string();
    let mut failures: u32 = 0;

    loop {
        let fetched = match progress.known.take() {
            Some(deployment) => Ok(deployment),
            None => subscription.refresh().await,
        };

        let delay = match fetched {
            Ok(deployment) => {
                if progress.last_status.as_ref() != Some(&deployment.status) {
                    debug!(id = %id, status = %deployment.status, "Deployment status changed");
                    progress.last_status = Some(deployment.status.clone());
                    send(TailEvent::Status(deployment.clone()));
                }

                match log_policy(&deployment.status) {
                    LogPolicy::Skip => {
                        failures = 0;
                        options.record_interval
                    }
                    LogPolicy::Poll => match subscription.refresh_logs().await {
                        Ok(snapshot) => {
                            failures = 0;
                            emit_logs(&mut progress.cursor, snapshot, send);
                            options.log_interval
                        }
                        Err(e) if e.is_unauthorized() => {
                            send(TailEvent::Error(e));
                            return None;
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(id = %id, failures, "Log fetch failed: {}", e);
                            send(TailEvent::Error(e));
                            backoff_delay(options.log_interval, options, failures)
                        }
                    },
                    LogPolicy::FinalSnapshot => {
                        match subscription.refresh_logs().await {
                            Ok(snapshot) => emit_logs(&mut progress.cursor, snapshot, send),
                            Err(e) if e.is_unauthorized() => {
                                send(TailEvent::Error(e));
                                return None;
                            }
                            Err(e) => {
                                warn!(id = %id, "Final log fetch failed: {}", e);
                                send(TailEvent::Error(e));
                            }
                        }
                        info!(id = %id, status = %deployment.status, "Deployment finished, log tail ended");
                        return Some(deployment.status);
                    }
                }
            }
            Err(ClientError::NotFound(_)) => {
                info!(id = %id, "Deployment no longer exists");
                send(TailEvent::Removed);
                return None;
            }
            Err(e) if e.is_unauthorized() => {
                send(TailEvent::Error(e));
                return None;
            }
            Err(e) => {
                failures += 1;
                warn!(id = %id, failures, "Deployment fetch failed: {}", e);
                send(TailEvent::Error(e));
                backoff_delay(options.record_interval, options, failures)
            }
        };

        match wait(&id, delay, subscription, events, sleep_fn).await {
            Wake::Elapsed => {}
            Wake::Terminal(deployment) => progress.known = Some(deployment),
            Wake::Removed => {
                send(TailEvent::Removed);
                return None;
            }
        }
    }
}

/// After a tail ended, fetch nothing until the deployment is invalidated
/// (a rebuild does that) or another reader sees it active again. Returns the
/// record to resume with, or `None` when the tail is over for good.
async fn resume<E>(
    subscription: &Subscription,
    events: &mut broadcast::Receiver<CacheEvent>,
    send: &E,
) -> Option<Deployment>
where
    E: Fn(TailEvent),
{
    let id = subscription.id();

    loop {
        match events.recv().await {
            Ok(CacheEvent::Invalidated { id: changed }) if changed == id => match subscription.refresh().await {
                Ok(deployment) if !deployment.status.is_terminal() => {
                    info!(id, status = %deployment.status, "Deployment active again, resuming log tail");
                    return Some(deployment);
                }
                Ok(_) => debug!(id, "Deployment still finished"),
                Err(ClientError::NotFound(_)) => {
                    send(TailEvent::Removed);
                    return None;
                }
                Err(e) if e.is_unauthorized() => {
                    send(TailEvent::Error(e));
                    return None;
                }
                Err(e) => {
                    warn!(id, "Deployment fetch failed: {}", e);
                    send(TailEvent::Error(e));
                }
            },
            Ok(CacheEvent::Updated { id: changed, status }) if changed == id && !status.is_terminal() => {
                if let Some(deployment) = subscription.cached().filter(|d| !d.status.is_terminal()) {
                    info!(id, status = %deployment.status, "Deployment active again, resuming log tail");
                    return Some(deployment);
                }
            }
            Ok(CacheEvent::Removed { id: changed }) if changed == id => {
                send(TailEvent::Removed);
                return None;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(id, skipped, "Log tail lagged behind cache events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Sleep until the next tick, waking early when the cache learns something
/// about this deployment from elsewhere.
async fn wait<S, F>(
    id: &str,
    delay: Duration,
    subscription: &Subscription,
    events: &mut broadcast::Receiver<CacheEvent>,
    sleep_fn: &S,
) -> Wake
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let sleep = sleep_fn(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return Wake::Elapsed,
            event = events.recv() => match event {
                Ok(CacheEvent::Invalidated { id: changed }) if changed == id => {
                    debug!(id, "Deployment invalidated, polling now");
                    return Wake::Elapsed;
                }
                Ok(CacheEvent::Removed { id: changed }) if changed == id => {
                    return Wake::Removed;
                }
                Ok(CacheEvent::Updated { id: changed, status }) if changed == id && status.is_terminal() => {
                    if let Some(deployment) = subscription.cached().filter(|d| d.status.is_terminal()) {
                        debug!(id, status = %deployment.status, "Terminal status observed, skipping scheduled fetch");
                        return Wake::Terminal(deployment);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(id, skipped, "Log tail lagged behind cache events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    (&mut sleep).await;
                    return Wake::Elapsed;
                }
            }
        }
    }
}

fn emit_logs<E>(cursor: &mut LogCursor, snapshot: Vec<LogEntry>, send: &E)
where
    E: Fn(TailEvent),
{
    let fresh = cursor.advance(snapshot);
    if !fresh.is_empty() {
        send(TailEvent::Logs(fresh));
    }
}

fn backoff_delay(base: Duration, options: &Options, failures: u32) -> Duration {
    Backoff::new(base, options.max_backoff).delay(failures)
}
