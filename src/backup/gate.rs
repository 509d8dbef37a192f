use std::fs;
use std::io;
use std::path::Path;

use log::warn;

use super::LABEL_FILE;
use crate::error::{BackupError, Result};

/// A failing stat other than "not found" is an error when `strict`, and
/// counts as "no backup" otherwise.
pub fn backup_in_progress(data_dir: &Path, strict: bool) -> Result<bool> {
    let path = data_dir.join(LABEL_FILE);
    match fs::metadata(&path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) if strict => Err(BackupError::file_access("stat", &path, e)),
        Err(e) => {
            warn!("could not stat file {:?}: {}", path, e);
            Ok(false)
        },
    }
}
