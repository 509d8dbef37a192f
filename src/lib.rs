pub mod backup;
pub mod error;
pub mod lsn;
pub mod timestamp;
