use std::path::Path;

use anyhow::{bail, Context};
use log::{info, warn};
use postgres::{Client, NoTls};
use time::OffsetDateTime;

use super::host::{Host, StartedBackup};
use super::manifest::{self, BackupMethod, BackupState};
use crate::error::Result;
use crate::lsn::Lsn;

const START_ATTEMPTS: u32 = 3;

/// Start and stop must run on the same connection.
pub struct PostgresHost {
    client: Client,
}

impl PostgresHost {
    pub fn connect(conninfo: &str) -> anyhow::Result<Self> {
        let client = Client::connect(conninfo, NoTls)
            .with_context(|| format!("could not connect to server with \"{}\"", conninfo))?;
        Ok(Self { client })
    }

    fn wal_segment_size(&mut self) -> anyhow::Result<u64> {
        let row = self.client.query_one(
            "SELECT setting::int8 FROM pg_settings WHERE name = 'wal_segment_size'",
            &[],
        )?;
        let size: i64 = row.get(0);
        u64::try_from(size).context("negative wal_segment_size")
    }

    /// One `<oid> <path>` line per tablespace symlinked from `pg_tblspc`.
    fn tablespace_map(&mut self) -> anyhow::Result<String> {
        let rows = self.client.query(
            "SELECT oid::int8, pg_tablespace_location(oid) FROM pg_tablespace \
             WHERE spcname NOT IN ('pg_default', 'pg_global') ORDER BY oid",
            &[],
        )?;

        let mut map = String::new();
        for row in rows {
            let oid: i64 = row.get(0);
            let location: String = row.get(1);
            // in-place tablespaces live inside the data directory
            if !Path::new(&location).is_absolute() {
                continue;
            }
            map.push_str(&format!("{} {}\n", oid, escape_tablespace_path(&location)));
        }
        Ok(map)
    }
}

/// A later checkpoint can land between `pg_backup_start` and the control
/// data read. The checkpoint only belongs to this backup if its redo point
/// is where the backup starts.
fn checkpoint_for_start(start_lsn: Lsn, redo_lsn: Lsn, checkpoint_lsn: Lsn) -> anyhow::Result<Lsn> {
    if redo_lsn != start_lsn {
        bail!(
            "checkpoint at {} (redo {}) does not match backup start {}",
            checkpoint_lsn,
            redo_lsn,
            start_lsn
        );
    }
    Ok(checkpoint_lsn)
}

fn escape_tablespace_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '\n' | '\r' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Host for PostgresHost {
    type StopInput = BackupState;

    fn recovery_in_progress(&mut self) -> Result<bool> {
        let row = self
            .client
            .query_one("SELECT pg_is_in_recovery()", &[])
            .context("could not query recovery state")?;
        Ok(row.get(0))
    }

    fn backup_start(&mut self, label: &str, fast: bool) -> Result<StartedBackup> {
        info!("starting backup \"{}\" (fast checkpoint: {})", label, fast);
        let mut attempt = 1;
        let state = loop {
            let start_time: OffsetDateTime = self
                .client
                .query_one("SELECT date_trunc('second', clock_timestamp())", &[])
                .context("could not read server clock")?
                .get(0);
            let row = self
                .client
                .query_one("SELECT pg_backup_start($1, $2)::text", &[&label, &fast])
                .context("pg_backup_start failed")?;
            let start_lsn: Lsn = row
                .get::<_, String>(0)
                .parse()
                .context("server returned an invalid start location")?;

            let row = self
                .client
                .query_one(
                    "SELECT redo_lsn::text, checkpoint_lsn::text, timeline_id::int8, \
                     pg_is_in_recovery() FROM pg_control_checkpoint()",
                    &[],
                )
                .context("could not read control data")?;
            let redo_lsn: Lsn = row
                .get::<_, String>(0)
                .parse()
                .context("server returned an invalid redo location")?;
            let checkpoint_lsn: Lsn = row
                .get::<_, String>(1)
                .parse()
                .context("server returned an invalid checkpoint location")?;
            let start_timeline =
                u32::try_from(row.get::<_, i64>(2)).context("server returned an invalid timeline")?;

            match checkpoint_for_start(start_lsn, redo_lsn, checkpoint_lsn) {
                Ok(checkpoint_lsn) => {
                    break BackupState {
                        start_lsn,
                        checkpoint_lsn,
                        method: BackupMethod::Streamed,
                        started_in_recovery: row.get(3),
                        start_time,
                        name: label.to_owned(),
                        start_timeline,
                        stop_lsn: Lsn::INVALID,
                    };
                },
                Err(e) if attempt < START_ATTEMPTS => {
                    warn!("{}, restarting backup", e);
                    self.backup_abort()?;
                    attempt += 1;
                },
                Err(e) => {
                    self.backup_abort()?;
                    return Err(e.into());
                },
            }
        };

        let wal_segment_size = self.wal_segment_size()?;
        Ok(StartedBackup {
            label: manifest::build_label(&state, wal_segment_size)?,
            tablespace_map: self.tablespace_map()?,
            start_lsn: state.start_lsn,
        })
    }

    fn backup_stop(&mut self, state: &mut BackupState, wait_for_archive: bool) -> Result<Lsn> {
        info!(
            "stopping backup \"{}\" started at {}",
            state.name, state.start_lsn
        );
        let row = self
            .client
            .query_one("SELECT lsn::text FROM pg_backup_stop($1)", &[&wait_for_archive])
            .context("pg_backup_stop failed")?;
        state.stop_lsn = row
            .get::<_, String>(0)
            .parse()
            .context("server returned an invalid stop location")?;
        Ok(state.stop_lsn)
    }

    fn backup_abort(&mut self) -> Result<()> {
        self.client
            .batch_execute("SELECT pg_backup_stop(false)")
            .context("could not abort backup")?;
        Ok(())
    }

    fn parse_timestamptz(&mut self, text: &str) -> Result<OffsetDateTime> {
        let row = self
            .client
            .query_one("SELECT $1::text::timestamptz", &[&text])
            .with_context(|| format!("could not parse timestamp \"{}\"", text))?;
        Ok(row.get(0))
    }
}
