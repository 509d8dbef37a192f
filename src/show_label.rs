use crate::context::Context;
use anyhow::Result;
use log::info;
use pg_exclusive_backup::backup::durable::DurableFs;
use pg_exclusive_backup::backup::manifest::{self, BackupState};
use pg_exclusive_backup::backup::{LABEL_FILE, TABLESPACE_MAP_FILE};
use pg_exclusive_backup::error::BackupError;
use pg_exclusive_backup::timestamp::parse_timestamptz;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Report {
    label: BackupState,
    tablespaces: Vec<String>,
}

pub fn run(ctx: &Context) -> Result<()> {
    let fs = DurableFs::new();
    let Some(buf) = fs.read_all(&ctx.cluster_data.join(LABEL_FILE), true)? else {
        info!("no exclusive backup in progress");
        return Ok(());
    };
    let text = String::from_utf8(buf).map_err(|_| BackupError::invalid_data(LABEL_FILE))?;
    let label = manifest::parse(&text, |ts| Ok(parse_timestamptz(ts)?))?;

    let tablespaces = match fs.read_all(&ctx.cluster_data.join(TABLESPACE_MAP_FILE), true)? {
        Some(map) => String::from_utf8_lossy(&map).lines().map(str::to_owned).collect(),
        None => Vec::new(),
    };

    print!("{}", serde_yaml::to_string(&Report { label, tablespaces })?);
    Ok(())
}
