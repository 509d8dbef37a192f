//! In-process hosts for exercising the protocol without a server.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use anyhow::anyhow;
use time::macros::datetime;

use super::host::{ControlFileLock, Host, StartedBackup};
use super::manifest::{build_label, BackupMethod, BackupState};
use crate::error::Result;
use crate::lsn::{Lsn, DEFAULT_WAL_SEGMENT_SIZE};

/// State shared by every session of one simulated server.
#[derive(Default)]
pub struct Server {
    pub in_recovery: AtomicBool,
    pub next_lsn: AtomicU64,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub aborts: AtomicUsize,
    pub tablespace_map: Mutex<String>,
    pub fail_stop: AtomicBool,
    /// Labels the stop primitive was handed, in call order.
    pub stopped_labels: Mutex<Vec<String>>,
    start_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Server {
            next_lsn: AtomicU64::new(0x0000_0000_0200_0028),
            ..Default::default()
        })
    }

    /// Makes every `backup_start` wait until `sessions` of them are running.
    pub fn rendezvous_in_start(&self, sessions: usize) {
        *self.start_barrier.lock().unwrap() = Some(Arc::new(Barrier::new(sessions)));
    }

    fn start(&self, label: &str, method: BackupMethod) -> StartedBackup {
        let barrier = self.start_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait();
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let start_lsn = Lsn(self.next_lsn.fetch_add(0x1000, Ordering::SeqCst));
        let state = BackupState {
            start_lsn,
            checkpoint_lsn: Lsn(start_lsn.0 + 0x38),
            method,
            started_in_recovery: false,
            start_time: datetime!(2024-05-06 07:08:09 UTC),
            name: label.to_owned(),
            start_timeline: 1,
            stop_lsn: Lsn::INVALID,
        };
        StartedBackup {
            label: build_label(&state, DEFAULT_WAL_SEGMENT_SIZE).unwrap(),
            tablespace_map: self.tablespace_map.lock().unwrap().clone(),
            start_lsn,
        }
    }

    fn stop(&self, label: String) -> Result<Lsn> {
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(anyhow!("WAL archiving failed").into());
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped_labels.lock().unwrap().push(label);
        Ok(Lsn(self.next_lsn.fetch_add(0x1000, Ordering::SeqCst)))
    }
}

/// Exchanges raw label text with the server.
pub struct TextHost {
    pub server: Arc<Server>,
    /// Where to take the control file lock instead of the data directory.
    pub lock_dir: Option<PathBuf>,
}

impl Host for TextHost {
    type StopInput = String;

    fn recovery_in_progress(&mut self) -> Result<bool> {
        Ok(self.server.in_recovery.load(Ordering::SeqCst))
    }

    fn backup_start(&mut self, label: &str, _fast: bool) -> Result<StartedBackup> {
        Ok(self.server.start(label, BackupMethod::Streamed))
    }

    fn backup_stop(&mut self, label: &mut String, _wait_for_archive: bool) -> Result<Lsn> {
        self.server.stop(label.clone())
    }

    fn backup_abort(&mut self) -> Result<()> {
        self.server.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn lock_control_file(&mut self, data_dir: &Path) -> Result<ControlFileLock> {
        ControlFileLock::acquire(self.lock_dir.as_deref().unwrap_or(data_dir))
    }
}

/// Exchanges a parsed backup state with the server.
pub struct StateHost {
    pub server: Arc<Server>,
    pub last_state: Option<BackupState>,
}

impl Host for StateHost {
    type StopInput = BackupState;

    fn recovery_in_progress(&mut self) -> Result<bool> {
        Ok(self.server.in_recovery.load(Ordering::SeqCst))
    }

    fn backup_start(&mut self, label: &str, _fast: bool) -> Result<StartedBackup> {
        Ok(self.server.start(label, BackupMethod::Streamed))
    }

    fn backup_stop(&mut self, state: &mut BackupState, _wait_for_archive: bool) -> Result<Lsn> {
        state.stop_lsn = self.server.stop(state.name.clone())?;
        self.last_state = Some(state.clone());
        Ok(state.stop_lsn)
    }

    fn backup_abort(&mut self) -> Result<()> {
        self.server.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
