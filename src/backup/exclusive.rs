use std::path::PathBuf;

use log::{info, warn};
use time::OffsetDateTime;

use super::durable::{DurableFs, Severity};
use super::gate;
use super::host::{Host, StartedBackup, StopInput};
use super::manifest::{self, MAX_LABEL_LEN};
use super::{LABEL_FILE, TABLESPACE_MAP_FILE};
use crate::error::{BackupError, Result};
use crate::lsn::Lsn;

/// The exclusive backup entry points for one session. A backup is in
/// progress exactly when `backup_label` exists in the data directory.
pub struct ExclusiveBackup<H> {
    data_dir: PathBuf,
    host: H,
    fs: DurableFs,
}

impl<H: Host> ExclusiveBackup<H> {
    pub fn new(data_dir: impl Into<PathBuf>, host: H) -> Self {
        Self {
            data_dir: data_dir.into(),
            host,
            fs: DurableFs::new(),
        }
    }

    pub fn with_durable_fs(mut self, fs: DurableFs) -> Self {
        self.fs = fs;
        self
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    fn label_path(&self) -> PathBuf {
        self.data_dir.join(LABEL_FILE)
    }

    fn tablespace_map_path(&self) -> PathBuf {
        self.data_dir.join(TABLESPACE_MAP_FILE)
    }

    /// Starts an exclusive backup and publishes its label. Returns the WAL
    /// location the backup starts at.
    pub fn start(&mut self, label: &str, fast: bool) -> Result<Lsn> {
        if label.len() >= MAX_LABEL_LEN {
            return Err(BackupError::precondition(format!(
                "backup label too long (max {} bytes)",
                MAX_LABEL_LEN
            )));
        }
        if label.contains(['\n', '\r']) {
            return Err(BackupError::precondition("backup label must not contain line breaks"));
        }
        if self.host.recovery_in_progress()? {
            return Err(BackupError::recovery_in_progress("pg_start_backup"));
        }
        if gate::backup_in_progress(&self.data_dir, true)? {
            return Err(already_in_progress());
        }

        let StartedBackup {
            label: mut label_text,
            tablespace_map,
            start_lsn,
        } = self.host.backup_start(label, fast)?;
        manifest::rewrite_method(&mut label_text);

        // The server call above may take long, so the lock only covers the
        // re-check and the writes.
        let lock = match self.host.lock_control_file(&self.data_dir) {
            Ok(lock) => lock,
            Err(e) => return Err(self.abort_start(e)),
        };
        match gate::backup_in_progress(&self.data_dir, true) {
            Ok(false) => {},
            Ok(true) => {
                drop(lock);
                return Err(self.abort_start(already_in_progress()));
            },
            Err(e) => {
                drop(lock);
                return Err(self.abort_start(e));
            },
        }

        let label_path = self.label_path();
        if let Err(e) = self.fs.write_all(&label_path, label_text.as_bytes()) {
            drop(lock);
            return Err(self.abort_start(e));
        }
        // The label is published now. A failure below keeps the server side
        // running, and stop still accepts a label without a map.
        if !tablespace_map.is_empty() {
            self.fs
                .write_all(&self.tablespace_map_path(), tablespace_map.as_bytes())?;
        }
        drop(lock);

        info!(
            "published {:?} for backup \"{}\" starting at {}",
            label_path, label, start_lsn
        );
        Ok(start_lsn)
    }

    fn abort_start(&mut self, err: BackupError) -> BackupError {
        if let Err(abort_err) = self.host.backup_abort() {
            warn!("could not abort server backup: {}", abort_err);
        }
        err
    }

    /// Finishes the exclusive backup. The label is removed before the server
    /// is told.
    pub fn stop(&mut self, wait_for_archive: bool) -> Result<Lsn> {
        if self.host.recovery_in_progress()? {
            return Err(BackupError::recovery_in_progress("pg_stop_backup"));
        }
        if !gate::backup_in_progress(&self.data_dir, true)? {
            return Err(not_in_progress());
        }

        let label_path = self.label_path();
        let Some(buf) = self.fs.read_all(&label_path, false)? else {
            return Err(not_in_progress());
        };
        let label = String::from_utf8(buf).map_err(|_| BackupError::invalid_data(LABEL_FILE))?;

        // Parsed before the unlink, so a malformed label stays on disk.
        let host = &mut self.host;
        let mut input =
            H::StopInput::from_label(label, &mut |ts: &str| host.parse_timestamptz(ts))?;

        self.fs.durable_unlink(&label_path, Severity::Fatal)?;
        self.fs
            .durable_unlink(&self.tablespace_map_path(), Severity::Advisory)?;
        info!("removed {:?}", label_path);

        let stop_lsn = self.host.backup_stop(&mut input, wait_for_archive)?;
        info!("backup stopped at {}", stop_lsn);
        Ok(stop_lsn)
    }

    pub fn is_in_backup(&self) -> bool {
        gate::backup_in_progress(&self.data_dir, false).unwrap_or(false)
    }

    /// Start time recorded in the label, or `None` when no backup is running.
    pub fn start_time(&mut self) -> Result<Option<OffsetDateTime>> {
        let Some(buf) = self.fs.read_all(&self.label_path(), true)? else {
            return Ok(None);
        };
        let label = String::from_utf8(buf).map_err(|_| BackupError::invalid_data(LABEL_FILE))?;
        let start_time = manifest::extract_start_time(&label)
            .ok_or_else(|| BackupError::invalid_data(LABEL_FILE))?;
        self.host.parse_timestamptz(start_time).map(Some)
    }
}

fn already_in_progress() -> BackupError {
    BackupError::precondition("exclusive backup is already in progress").with_hint(format!(
        "If you're sure there is no backup in progress, remove file \"{}\" and try again.",
        LABEL_FILE
    ))
}

fn not_in_progress() -> BackupError {
    BackupError::precondition("exclusive backup not in progress")
}
