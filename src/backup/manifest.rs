use std::fmt;
use std::str::{FromStr, Lines};

use serde::{Serialize, Serializer};
use time::OffsetDateTime;

use super::LABEL_FILE;
use crate::error::{BackupError, Result};
use crate::lsn::{is_wal_file_name, Lsn};
use crate::timestamp::format_timestamptz;

const STREAMED_METHOD: &str = "BACKUP METHOD: streamed";
const EXCLUSIVE_METHOD: &str = "BACKUP METHOD: pg_start_backup";

const START_TIME_PREFIX: &str = "START TIME: ";
const START_TIME_MAX_LEN: usize = 25;

/// Longest label the server accepts, including the terminating NUL it reserves.
pub const MAX_LABEL_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMethod {
    Streamed,
    PgStartBackup,
}

impl BackupMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupMethod::Streamed => "streamed",
            BackupMethod::PgStartBackup => "pg_start_backup",
        }
    }
}

impl fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "streamed" => Ok(BackupMethod::Streamed),
            "pg_start_backup" => Ok(BackupMethod::PgStartBackup),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupState {
    pub start_lsn: Lsn,
    pub checkpoint_lsn: Lsn,
    pub method: BackupMethod,
    pub started_in_recovery: bool,
    #[serde(serialize_with = "serialize_timestamp")]
    pub start_time: OffsetDateTime,
    pub name: String,
    pub start_timeline: u32,
    pub stop_lsn: Lsn,
}

fn serialize_timestamp<S>(dt: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = format_timestamptz(*dt).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}

/// Turns the method the server emits for a session backup into the one an
/// exclusive backup label carries. Returns the number of replaced records.
pub fn rewrite_method(buf: &mut String) -> usize {
    let count = buf.matches(STREAMED_METHOD).count();
    if count == 0 {
        return 0;
    }
    *buf = buf.replace(STREAMED_METHOD, EXCLUSIVE_METHOD);
    count
}

pub fn build_label(state: &BackupState, wal_segment_size: u64) -> anyhow::Result<String> {
    let wal_file = state
        .start_lsn
        .wal_file_name(state.start_timeline, wal_segment_size);
    let backup_from = if state.started_in_recovery {
        "standby"
    } else {
        "primary"
    };

    Ok(format!(
        "START WAL LOCATION: {} (file {})\n\
         CHECKPOINT LOCATION: {}\n\
         BACKUP METHOD: {}\n\
         BACKUP FROM: {}\n\
         {}{}\n\
         LABEL: {}\n\
         START TIMELINE: {}\n",
        state.start_lsn,
        wal_file,
        state.checkpoint_lsn,
        state.method,
        backup_from,
        START_TIME_PREFIX,
        format_timestamptz(state.start_time)?,
        state.name,
        state.start_timeline,
    ))
}

/// Records must appear in canonical order. Anything after the last one is
/// ignored.
pub fn parse<F>(buf: &str, mut parse_ts: F) -> Result<BackupState>
where
    F: FnMut(&str) -> Result<OffsetDateTime>,
{
    let invalid = || BackupError::invalid_data(LABEL_FILE);
    let mut lines = buf.lines();

    let start_lsn = parse_start_location(next_record(&mut lines, "START WAL LOCATION: ")?)
        .ok_or_else(invalid)?;
    let checkpoint_lsn = next_record(&mut lines, "CHECKPOINT LOCATION: ")?
        .parse::<Lsn>()
        .map_err(|_| invalid())?;
    let method = next_record(&mut lines, "BACKUP METHOD: ")?
        .parse::<BackupMethod>()
        .map_err(|_| invalid())?;
    let backup_from =
        single_token(next_record(&mut lines, "BACKUP FROM: ")?).ok_or_else(invalid)?;
    let start_time = next_record(&mut lines, START_TIME_PREFIX)?;
    if start_time.is_empty() {
        return Err(invalid());
    }
    let name = next_record(&mut lines, "LABEL: ")?;
    if name.len() >= MAX_LABEL_LEN {
        return Err(invalid());
    }
    let name = name.to_owned();
    let start_timeline = single_token(next_record(&mut lines, "START TIMELINE: ")?)
        .and_then(|tli| tli.parse::<u32>().ok())
        .ok_or_else(invalid)?;

    Ok(BackupState {
        start_lsn,
        checkpoint_lsn,
        method,
        started_in_recovery: backup_from == "standby",
        start_time: parse_ts(start_time)?,
        name,
        start_timeline,
        stop_lsn: Lsn::INVALID,
    })
}

/// Finds the `START TIME` record and returns at most its first 25 characters.
pub fn extract_start_time(buf: &str) -> Option<&str> {
    let line = buf
        .lines()
        .find_map(|line| line.strip_prefix(START_TIME_PREFIX))?;
    let end = line
        .char_indices()
        .nth(START_TIME_MAX_LEN)
        .map_or(line.len(), |(idx, _)| idx);
    let value = &line[..end];
    (!value.is_empty()).then_some(value)
}

fn next_record<'a>(lines: &mut Lines<'a>, prefix: &str) -> Result<&'a str> {
    lines
        .next()
        .and_then(|line| line.strip_prefix(prefix))
        .ok_or_else(|| BackupError::invalid_data(LABEL_FILE))
}

// `H/L (file XXXXXXXXXXXXXXXXXXXXXXXX)`
fn parse_start_location(value: &str) -> Option<Lsn> {
    let (lsn, rest) = value.split_once(" (file ")?;
    let wal_file = rest.strip_suffix(')')?;
    if !is_wal_file_name(wal_file) {
        return None;
    }
    lsn.parse().ok()
}

fn single_token(value: &str) -> Option<&str> {
    let mut tokens = value.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(token), None) => Some(token),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::DEFAULT_WAL_SEGMENT_SIZE;
    use crate::timestamp::parse_timestamptz;
    use time::macros::datetime;

    fn local_ts(text: &str) -> Result<OffsetDateTime> {
        Ok(parse_timestamptz(text)?)
    }

    fn sample_state() -> BackupState {
        BackupState {
            start_lsn: Lsn(0x0000_0000_0200_0028),
            checkpoint_lsn: Lsn(0x0000_0000_0200_0060),
            method: BackupMethod::PgStartBackup,
            started_in_recovery: false,
            start_time: datetime!(2024-05-06 07:08:09 UTC),
            name: "nightly".to_owned(),
            start_timeline: 1,
            stop_lsn: Lsn::INVALID,
        }
    }

    const SAMPLE_LABEL: &str = "START WAL LOCATION: 0/2000028 (file 000000010000000000000002)\n\
                                CHECKPOINT LOCATION: 0/2000060\n\
                                BACKUP METHOD: pg_start_backup\n\
                                BACKUP FROM: primary\n\
                                START TIME: 2024-05-06 07:08:09 UTC\n\
                                LABEL: nightly\n\
                                START TIMELINE: 1\n";

    #[test]
    fn builds_canonical_label() {
        let label = build_label(&sample_state(), DEFAULT_WAL_SEGMENT_SIZE).unwrap();
        assert_eq!(label, SAMPLE_LABEL);
        assert!(label.ends_with('\n'));
    }

    #[test]
    fn parse_inverts_build() {
        let mut states = vec![sample_state()];
        states.push(BackupState {
            start_lsn: Lsn(0x0000_0001_2300_0000),
            checkpoint_lsn: Lsn(0x0000_0001_2300_0098),
            method: BackupMethod::Streamed,
            started_in_recovery: true,
            start_time: datetime!(2023-12-31 23:59:59 +05:30),
            name: "weekly with spaces".to_owned(),
            start_timeline: 42,
            stop_lsn: Lsn::INVALID,
        });
        states.push(BackupState {
            name: String::new(),
            ..sample_state()
        });

        for state in states {
            let label = build_label(&state, DEFAULT_WAL_SEGMENT_SIZE).unwrap();
            assert_eq!(parse(&label, local_ts).unwrap(), state, "label:\n{}", label);
        }
    }

    #[test]
    fn parse_reads_standby_origin() {
        let label = SAMPLE_LABEL.replace("BACKUP FROM: primary", "BACKUP FROM: standby");
        assert!(parse(&label, local_ts).unwrap().started_in_recovery);
    }

    #[test]
    fn parse_ignores_trailing_records() {
        let label = format!("{}INCREMENTAL FROM LSN: 0/1000028\n", SAMPLE_LABEL);
        assert_eq!(parse(&label, local_ts).unwrap(), sample_state());
    }

    #[test]
    fn parse_rejects_malformed_labels() {
        let lines: Vec<&str> = SAMPLE_LABEL.lines().collect();

        let mut swapped = lines.clone();
        swapped.swap(1, 2);
        let mut missing = lines.clone();
        missing.remove(3);

        let broken = [
            swapped.join("\n"),
            missing.join("\n"),
            lines[..6].join("\n"),
            SAMPLE_LABEL.replace("0/2000028", "0/20000Z8"),
            SAMPLE_LABEL.replace("(file 000000010000000000000002)", "(file 0001)"),
            SAMPLE_LABEL.replace("pg_start_backup", "rsync"),
            SAMPLE_LABEL.replace("START TIMELINE: 1", "START TIMELINE: one"),
            SAMPLE_LABEL.replace("BACKUP FROM: primary", "BACKUP FROM: "),
            String::new(),
        ];
        for label in broken {
            let err = parse(&label, local_ts).unwrap_err();
            assert_eq!(
                err.to_string(),
                "invalid data in file \"backup_label\"",
                "label:\n{}",
                label
            );
        }
    }

    #[test]
    fn parse_propagates_timestamp_errors() {
        let label = SAMPLE_LABEL.replace("07:08:09 UTC", "07:08:09 CEST");
        let err = parse(&label, local_ts).unwrap_err();
        assert!(matches!(err, BackupError::Host(_)));
    }

    #[test]
    fn rewrite_replaces_every_occurrence() {
        let mut buf = format!(
            "{}\nfoo\n{}\n{}\n",
            STREAMED_METHOD, STREAMED_METHOD, STREAMED_METHOD
        );
        assert_eq!(rewrite_method(&mut buf), 3);
        assert_eq!(buf.matches(EXCLUSIVE_METHOD).count(), 3);
        assert!(!buf.contains(STREAMED_METHOD));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut buf = SAMPLE_LABEL.replace("pg_start_backup", "streamed");
        assert_eq!(rewrite_method(&mut buf), 1);
        assert_eq!(buf, SAMPLE_LABEL);

        let once = buf.clone();
        assert_eq!(rewrite_method(&mut buf), 0);
        assert_eq!(buf, once);
    }

    #[test]
    fn extract_start_time_limits_length() {
        assert_eq!(
            extract_start_time(SAMPLE_LABEL),
            Some("2024-05-06 07:08:09 UTC")
        );

        let exact = SAMPLE_LABEL.replace("07:08:09 UTC", "07:08:09 +0530");
        assert_eq!(extract_start_time(&exact), Some("2024-05-06 07:08:09 +0530"));
        assert_eq!("2024-05-06 07:08:09 +0530".len(), 25);

        let long = SAMPLE_LABEL.replace("07:08:09 UTC", "07:08:09 +05:30 trailing");
        assert_eq!(extract_start_time(&long), Some("2024-05-06 07:08:09 +05:3"));

        assert_eq!(extract_start_time("LABEL: x\n"), None);
        assert_eq!(extract_start_time("START TIME: \n"), None);
    }
}
