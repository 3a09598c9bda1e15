//! The scheduler: one timer job per active automatic list, a bounded worker
//! pool, and a misfire grace window for late firings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::schedule::{next_fire, parse_schedule};
use listmill_ingest::{ImportStatus, Importer};
use listmill_store::{List, ListStore, UpdateType};

/// Default worker pool size.
pub const DEFAULT_MAX_WORKERS: usize = 20;

/// Firings later than this are dropped instead of executed.
pub const MISFIRE_GRACE: Duration = Duration::from_secs(3600);

struct Job {
    schedule_expr: String,
    timer: JoinHandle<()>,
}

struct Inner {
    store: Arc<ListStore>,
    importer: Arc<Importer>,
    jobs: Mutex<HashMap<i64, Job>>,
    workers: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

/// Process-wide refresh scheduler. Construct exactly one per application
/// root and share it behind the returned handle.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(store: Arc<ListStore>, importer: Arc<Importer>, max_workers: usize) -> Self {
        let max_workers = if max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            max_workers
        };
        Self {
            inner: Arc::new(Inner {
                store,
                importer,
                jobs: Mutex::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(max_workers)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                drained: Arc::new(Notify::new()),
            }),
        }
    }

    /// Rebuild the job table from storage: one job per list with
    /// `is_active` and automatic updates.
    pub async fn start(&self) -> Result<usize> {
        self.clear_jobs();
        let lists = self
            .inner
            .store
            .list_scheduled()
            .await
            .context("Failed to load scheduled lists")?;
        if lists.is_empty() {
            warn!("No active lists with automatic updates found");
            return Ok(0);
        }
        for list in &lists {
            self.schedule_list(list);
        }
        info!("Scheduled {} lists", lists.len());
        Ok(lists.len())
    }

    /// Add or atomically replace the job for a list (remove-then-add). An
    /// in-flight refresh is never interrupted; only the next firing moves.
    pub fn schedule_list(&self, list: &List) {
        let Some(expr) = list.update_schedule.as_deref().filter(|s| !s.trim().is_empty()) else {
            warn!("List {} ({}): no schedule defined", list.id, list.name);
            return;
        };
        let (schedule, used_fallback) = parse_schedule(expr);
        if used_fallback {
            warn!(
                "List {} ({}): schedule '{}' replaced by the safe default",
                list.id, list.name, expr
            );
        }

        self.unschedule(list.id);

        let timer = tokio::spawn(job_loop(Arc::clone(&self.inner), list.id, schedule.clone()));
        let mut jobs = self.inner.jobs.lock().expect("job map poisoned");
        jobs.insert(
            list.id,
            Job {
                schedule_expr: expr.to_string(),
                timer,
            },
        );
        if let Some(next) = next_fire(&schedule, Utc::now()) {
            info!(
                "List {} ({}) scheduled with '{}', next run {}",
                list.id, list.name, expr, next
            );
        }
    }

    /// Remove a list's job (deletion, deactivation, switch to manual).
    pub fn unschedule(&self, list_id: i64) -> bool {
        let mut jobs = self.inner.jobs.lock().expect("job map poisoned");
        if let Some(job) = jobs.remove(&list_id) {
            job.timer.abort();
            info!("Removed scheduled job for list {}", list_id);
            true
        } else {
            false
        }
    }

    /// Re-read a list from storage and bring its job in line with the
    /// current configuration.
    pub async fn reschedule(&self, list_id: i64) -> Result<()> {
        match self.inner.store.get_list(list_id).await? {
            Some(list)
                if list.is_active && list.update_type == UpdateType::Automatic =>
            {
                self.schedule_list(&list);
            }
            _ => {
                self.unschedule(list_id);
            }
        }
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.inner.jobs.lock().expect("job map poisoned").len()
    }

    pub fn scheduled_expression(&self, list_id: i64) -> Option<String> {
        let jobs = self.inner.jobs.lock().expect("job map poisoned");
        jobs.get(&list_id).map(|j| j.schedule_expr.clone())
    }

    /// Stop all timers, then wait up to `grace` for in-flight refreshes.
    pub async fn shutdown(&self, grace: Duration) {
        self.clear_jobs();
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    "Shutdown grace expired with {} refresh(es) still running",
                    self.inner.in_flight.load(Ordering::SeqCst)
                );
                return;
            }
        }
        info!("Scheduler stopped; no refreshes in flight");
    }

    fn clear_jobs(&self) {
        let mut jobs = self.inner.jobs.lock().expect("job map poisoned");
        for (_, job) in jobs.drain() {
            job.timer.abort();
        }
    }
}

/// Timer loop for one list: sleep until the next cron fire, then hand the
/// refresh to the worker pool. The import itself runs on a separate task so
/// that rescheduling (which aborts this loop) never cancels a run mid-way.
async fn job_loop(inner: Arc<Inner>, list_id: i64, schedule: Schedule) {
    loop {
        let Some(next) = next_fire(&schedule, Utc::now()) else {
            warn!("List {}: schedule has no future fire times", list_id);
            return;
        };
        let wait = (next.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        let lateness = Utc::now() - next.with_timezone(&Utc);
        if lateness.to_std().unwrap_or(Duration::ZERO) > MISFIRE_GRACE {
            warn!(
                "List {}: dropping misfired trigger {} ({}s late)",
                list_id,
                next,
                lateness.num_seconds()
            );
            continue;
        }

        let permit = match Arc::clone(&inner.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let importer = Arc::clone(&inner.importer);
        let in_flight = Arc::clone(&inner.in_flight);
        let drained = Arc::clone(&inner.drained);
        tokio::spawn(async move {
            let outcome = importer.import(list_id, false).await;
            match &outcome.status {
                ImportStatus::Success { rows } => {
                    info!("List {}: scheduled refresh imported {} rows", list_id, rows)
                }
                ImportStatus::Skipped => {
                    info!("List {}: scheduled refresh skipped (too recent)", list_id)
                }
                ImportStatus::Failed { kind, message } => {
                    error!(
                        "List {}: scheduled refresh failed ({}): {}",
                        list_id, kind, message
                    )
                }
            }
            drop(permit);
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
    }
}
