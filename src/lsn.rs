use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Default size of a WAL segment file, in bytes.
pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Length of a WAL segment file name.
pub const WAL_FILE_NAME_LEN: usize = 24;

/// A Postgres LSN (Log Sequence Number), also known as an XLogRecPtr
#[derive(Clone, Copy, Default, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct Lsn(pub u64);

impl Serialize for Lsn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

/// We tried to parse an LSN from a string, but failed
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("LsnParseError")]
pub struct LsnParseError;

impl Lsn {
    /// Invalid value for InvalidXLogRecPtr, as defined in xlogdefs.h
    pub const INVALID: Lsn = Lsn(0);

    /// Compute the segment number
    #[inline]
    pub fn segment_number(self, seg_sz: u64) -> u64 {
        self.0 / seg_sz
    }

    /// Name of the WAL segment file holding this LSN on the given timeline.
    pub fn wal_file_name(self, tli: u32, seg_sz: u64) -> String {
        let segs_per_xlogid = 0x1_0000_0000u64 / seg_sz;
        let segno = self.segment_number(seg_sz);
        format!(
            "{:>08X}{:>08X}{:>08X}",
            tli,
            segno / segs_per_xlogid,
            segno % segs_per_xlogid
        )
    }
}

pub fn is_wal_file_name(fname: &str) -> bool {
    fname.len() == WAL_FILE_NAME_LEN && fname.chars().all(|c| c.is_ascii_hexdigit())
}

impl FromStr for Lsn {
    type Err = LsnParseError;

    /// Parse an LSN from a string in the form `00000000/00000000`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut splitter = s.trim().split('/');
        if let (Some(left), Some(right), None) = (splitter.next(), splitter.next(), splitter.next())
        {
            let left_num = u32::from_str_radix(left, 16).map_err(|_| LsnParseError)?;
            let right_num = u32::from_str_radix(right, 16).map_err(|_| LsnParseError)?;
            Ok(Lsn(((left_num as u64) << 32) | right_num as u64))
        } else {
            Err(LsnParseError)
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xffffffff)
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xffffffff)
    }
}
