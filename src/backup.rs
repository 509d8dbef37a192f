//! Exclusive on-line backups anchored by a `backup_label` file in the data
//! directory.

pub mod durable;
pub mod exclusive;
pub mod gate;
pub mod host;
pub mod manifest;
pub mod postgres_host;

#[cfg(test)]
mod testing;

pub use exclusive::ExclusiveBackup;

pub const LABEL_FILE: &str = "backup_label";
pub const TABLESPACE_MAP_FILE: &str = "tablespace_map";
pub const LOCK_FILE: &str = "pg_exclusive_backup.lock";
