//! Automatic backup scheduling
//!
//! `tick` is the whole policy: when automatic backups are enabled and the
//! configured interval has elapsed, take a backup, prune old ones, and record
//! the time. `spawn` calls it periodically from a background thread.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::error::KeeperResult;

use super::manager::{BackupManager, BackupReport};
use super::manifest::BackupType;

/// What a single scheduler tick did
#[derive(Debug)]
pub enum TickOutcome {
    /// Automatic backups are turned off
    Disabled,
    /// Enabled, but the interval has not elapsed
    NotDue { next_due: Option<DateTime<Utc>> },
    /// A backup was taken and retention applied
    BackedUp {
        report: BackupReport,
        pruned: usize,
    },
}

/// Runs automatic backups according to the persisted [`BackupConfig`](super::BackupConfig)
pub struct AutoBackupScheduler {
    manager: BackupManager,
}

impl AutoBackupScheduler {
    pub fn new(manager: BackupManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &BackupManager {
        &self.manager
    }

    /// Take an automatic backup if one is due at `now`
    ///
    /// The config is re-read on every tick so changes saved by another
    /// process take effect without a restart.
    pub fn tick(&self, now: DateTime<Utc>) -> KeeperResult<TickOutcome> {
        let mut config = self.manager.load_config()?;
        if !config.auto_backup_enabled {
            return Ok(TickOutcome::Disabled);
        }
        if !config.is_due(now) {
            debug!(next_due = ?config.next_due(), "automatic backup not due");
            return Ok(TickOutcome::NotDue {
                next_due: config.next_due(),
            });
        }

        let report = self.manager.create_backup(BackupType::Auto, None)?;
        let pruned = self.manager.enforce_retention(config.keep_last_n)?.len();

        config.last_auto_backup = Some(now);
        self.manager.save_config(&config)?;

        info!(
            path = %report.path.display(),
            pruned,
            keep_last_n = config.keep_last_n,
            "automatic backup finished"
        );
        Ok(TickOutcome::BackedUp { report, pruned })
    }

    /// Call [`tick`](Self::tick) every `interval` on a background thread
    ///
    /// Errors are logged and the loop continues.
    pub fn spawn(self, interval: Duration) -> SchedulerHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || loop {
            if let Err(e) = self.tick(Utc::now()) {
                error!(error = %e, "automatic backup tick failed");
            }
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        SchedulerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// Stops the background scheduler when dropped or stopped explicitly
pub struct SchedulerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal the thread and wait for the current tick to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("automatic backup thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
