//! Per-run atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`RunMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight atomic counters, owned by one run and shared by reference.
#[derive(Debug)]
pub struct RunMetrics {
    ous_created: AtomicU64,
    accounts_created: AtomicU64,
    stages_succeeded: AtomicU64,
    stages_failed: AtomicU64,
    retries: AtomicU64,
    throttle_waits: AtomicU64,
    state_saves: AtomicU64,
    state_loads: AtomicU64,
    backups_created: AtomicU64,
    cleanups_performed: AtomicU64,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl RunMetrics {
    pub const fn new() -> Self {
        Self {
            ous_created: AtomicU64::new(0),
            accounts_created: AtomicU64::new(0),
            stages_succeeded: AtomicU64::new(0),
            stages_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            throttle_waits: AtomicU64::new(0),
            state_saves: AtomicU64::new(0),
            state_loads: AtomicU64::new(0),
            backups_created: AtomicU64::new(0),
            cleanups_performed: AtomicU64::new(0),
        }
    }

    counter!(inc_ous_created, ous_created, ous_created);
    counter!(inc_accounts_created, accounts_created, accounts_created);
    counter!(inc_stages_succeeded, stages_succeeded, stages_succeeded);
    counter!(inc_stages_failed, stages_failed, stages_failed);
    counter!(inc_retries, retries, retries);
    counter!(inc_throttle_waits, throttle_waits, throttle_waits);
    counter!(inc_state_saves, state_saves, state_saves);
    counter!(inc_state_loads, state_loads, state_loads);
    counter!(inc_backups_created, backups_created, backups_created);
    counter!(inc_cleanups_performed, cleanups_performed, cleanups_performed);

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run) rather than on every
    /// increment.
    pub fn flush(&self, run_id: &str) {
        tracing::info!(
            metric = "flush",
            run_id = %run_id,
            ous_created = self.ous_created(),
            accounts_created = self.accounts_created(),
            stages_succeeded = self.stages_succeeded(),
            stages_failed = self.stages_failed(),
            retries = self.retries(),
            throttle_waits = self.throttle_waits(),
            state_saves = self.state_saves(),
            state_loads = self.state_loads(),
            backups_created = self.backups_created(),
            cleanups_performed = self.cleanups_performed(),
        );
    }
}
