use crate::context::Context;
use anyhow::{bail, Context as _, Result};
use clap::Args;
use log::{error, info};
use pg_exclusive_backup::backup::postgres_host::PostgresHost;
use pg_exclusive_backup::backup::ExclusiveBackup;
use scopeguard::{guard, ScopeGuard};
use std::process::{Command, Stdio};

#[derive(Debug, Args)]
pub struct Options {
    #[arg(long)]
    pub label: String,

    /// Request an immediate checkpoint instead of a spread one.
    #[arg(long)]
    pub fast: bool,

    /// Return once the backup has stopped, without waiting for the required
    /// WAL to be archived.
    #[arg(long)]
    pub no_wait_for_archive: bool,

    /// Command that copies the data directory. `PGDATA` is set for it.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub fn run(ctx: &Context, opts: &Options) -> Result<()> {
    let (program, program_args) = opts
        .command
        .split_first()
        .context("no copy command given")?;

    let host = PostgresHost::connect(&ctx.conninfo)?;
    let mut backup = ExclusiveBackup::new(&ctx.cluster_data, host);
    let start_lsn = backup.start(&opts.label, opts.fast)?;
    info!("backup \"{}\" started at {}", opts.label, start_lsn);

    let wait_for_archive = !opts.no_wait_for_archive;
    let backup = guard(backup, |mut backup| {
        if let Err(e) = backup.stop(wait_for_archive) {
            error!("could not stop backup: {}", e);
        }
    });

    info!("running {:?}", opts.command);
    let status = Command::new(program)
        .args(program_args)
        .env("PGDATA", &ctx.cluster_data)
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("could not run {:?}", program))?;
    if !status.success() {
        bail!("copy command failed: {}", status);
    }

    let mut backup = ScopeGuard::into_inner(backup);
    let stop_lsn = backup.stop(wait_for_archive)?;
    info!(
        "backup \"{}\" finished, it needs WAL from {} to {}",
        opts.label, start_lsn, stop_lsn
    );
    Ok(())
}
