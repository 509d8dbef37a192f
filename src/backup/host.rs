use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;
use time::OffsetDateTime;

use super::manifest::{self, BackupState};
use super::LOCK_FILE;
use crate::error::{BackupError, Result};
use crate::lsn::Lsn;
use crate::timestamp;

#[derive(Debug, Clone)]
pub struct StartedBackup {
    pub label: String,
    /// Empty when there are no tablespaces outside the data directory.
    pub tablespace_map: String,
    pub start_lsn: Lsn,
}

/// Form in which a host's stop primitive takes the backup label back.
pub trait StopInput: Sized {
    fn from_label(
        label: String,
        parse_ts: &mut dyn FnMut(&str) -> Result<OffsetDateTime>,
    ) -> Result<Self>;
}

impl StopInput for String {
    fn from_label(
        label: String,
        _parse_ts: &mut dyn FnMut(&str) -> Result<OffsetDateTime>,
    ) -> Result<Self> {
        Ok(label)
    }
}

impl StopInput for BackupState {
    fn from_label(
        label: String,
        parse_ts: &mut dyn FnMut(&str) -> Result<OffsetDateTime>,
    ) -> Result<Self> {
        manifest::parse(&label, parse_ts)
    }
}

/// Server side of the exclusive backup protocol.
pub trait Host {
    type StopInput: StopInput;

    fn recovery_in_progress(&mut self) -> Result<bool>;

    /// Starts a session backup. Neither this nor `backup_stop` is called with
    /// the control file lock held.
    fn backup_start(&mut self, label: &str, fast: bool) -> Result<StartedBackup>;

    fn backup_stop(&mut self, input: &mut Self::StopInput, wait_for_archive: bool) -> Result<Lsn>;

    /// Cancels a session backup whose label never got published.
    fn backup_abort(&mut self) -> Result<()> {
        Ok(())
    }

    fn parse_timestamptz(&mut self, text: &str) -> Result<OffsetDateTime> {
        Ok(timestamp::parse_timestamptz(text)?)
    }

    fn lock_control_file(&mut self, data_dir: &Path) -> Result<ControlFileLock> {
        ControlFileLock::acquire(data_dir)
    }
}

/// Exclusive lock serializing publication of the backup label across
/// sessions and processes. Released on drop.
#[derive(Debug)]
pub struct ControlFileLock {
    file: File,
    path: PathBuf,
}

impl ControlFileLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| BackupError::file_access("open", &path, e))?;
        file.lock_exclusive()
            .map_err(|e| BackupError::file_access("lock", &path, e))?;
        debug!("acquired lock {:?}", path);
        Ok(ControlFileLock { file, path })
    }
}

impl Drop for ControlFileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("could not unlock file {:?}: {}", self.path, e);
        }
        debug!("released lock {:?}", self.path);
    }
}
