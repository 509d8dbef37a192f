use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Advisory,
}

type SyncObserver = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DurableFs {
    on_sync: Option<SyncObserver>,
}

impl DurableFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `observer` with the path of every file or directory once its
    /// fsync has succeeded.
    pub fn with_sync_observer<F>(observer: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        Self {
            on_sync: Some(Arc::new(observer)),
        }
    }

    pub fn read_all(&self, path: &Path, missing_ok: bool) -> Result<Option<Vec<u8>>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound && missing_ok => return Ok(None),
            Err(e) => return Err(BackupError::file_access("stat", path, e)),
        };

        let mut file = File::open(path).map_err(|e| BackupError::file_access("open", path, e))?;
        let expected = metadata.len() as usize;
        let mut buf = Vec::with_capacity(expected);
        file.read_to_end(&mut buf)
            .map_err(|e| BackupError::file_access("read", path, e))?;
        if buf.len() < expected {
            return Err(BackupError::file_access(
                "read",
                path,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read {} of {} bytes", buf.len(), expected),
                ),
            ));
        }
        Ok(Some(buf))
    }

    /// Replaces the file's contents with `buf` and makes both the contents and
    /// the directory entry durable before returning.
    pub fn write_all(&self, path: &Path, buf: &[u8]) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| BackupError::file_access("create", path, e))?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(buf)
            .map_err(|e| BackupError::file_access("write", path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| BackupError::file_access("write", path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| BackupError::file_access("fsync", path, e))?;
        self.synced(path);
        drop(file);

        self.fsync_parent(path)
    }

    pub fn durable_unlink(&self, path: &Path, severity: Severity) -> Result<()> {
        let result = fs::remove_file(path)
            .map_err(|e| BackupError::file_access("remove", path, e))
            .and_then(|()| self.fsync_parent(path));

        match (result, severity) {
            (Ok(()), _) => Ok(()),
            (Err(e), Severity::Fatal) => Err(e),
            (Err(BackupError::FileAccess { source, .. }), Severity::Advisory)
                if source.kind() == io::ErrorKind::NotFound =>
            {
                debug!("file {:?} was already absent", path);
                Ok(())
            },
            (Err(e), Severity::Advisory) => {
                warn!("{}", e);
                Ok(())
            },
        }
    }

    fn fsync_parent(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| BackupError::file_access("fsync", parent, e))?;
        self.synced(parent);
        Ok(())
    }

    fn synced(&self, path: &Path) {
        debug!("fsynced {:?}", path);
        if let Some(observer) = &self.on_sync {
            observer(path);
        }
    }
}
