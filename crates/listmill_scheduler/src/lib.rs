//! Cron-driven refresh scheduler.
//!
//! Owns one timer job per active automatic list. Triggers are standard
//! 5-field cron expressions evaluated in Europe/Paris; firings run on a
//! bounded worker pool and per-list serialization is enforced by the
//! importer itself. The job table is rebuilt from storage at startup; there
//! is no persistent job store.

mod schedule;
mod scheduler;

pub use schedule::{next_fire, normalize_schedule, parse_schedule, FALLBACK_SCHEDULE};
pub use scheduler::{Scheduler, DEFAULT_MAX_WORKERS, MISFIRE_GRACE};
