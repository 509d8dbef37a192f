mod context;
mod is_in_backup;
mod show_label;
mod start_time;
mod take_backup;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use context::Context;
use log::{error, LevelFilter};
use pg_exclusive_backup::error::BackupError;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Data directory of the server being backed up.
    #[arg(long, env = "PGDATA")]
    pgdata: PathBuf,

    #[arg(
        long,
        env = "PG_EXCLUSIVE_BACKUP_CONNINFO",
        default_value = "host=localhost user=postgres"
    )]
    conninfo: String,

    #[clap(subcommand)]
    subcommand: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an exclusive backup, run a copy command, then stop the backup.
    Backup(take_backup::Options),
    /// Print whether an exclusive backup is in progress.
    IsInBackup,
    /// Print the start time of the backup in progress.
    StartTime,
    /// Print the backup label in progress as YAML, without contacting the server.
    ShowLabel,
}

fn main() -> ExitCode {
    env_logger::Builder::new()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    let args = Args::parse();
    let ctx = Context::new(args.pgdata, args.conninfo);

    let result = match &args.subcommand {
        Command::Backup(opts) => take_backup::run(&ctx, opts),
        Command::IsInBackup => is_in_backup::run(&ctx),
        Command::StartTime => start_time::run(&ctx),
        Command::ShowLabel => show_label::run(&ctx),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<BackupError>() {
                Some(backup_err) => {
                    error!("{} (SQLSTATE {})", backup_err, backup_err.sqlstate());
                    if let Some(hint) = backup_err.hint() {
                        error!("hint: {}", hint);
                    }
                },
                None => error!("{:#}", e),
            }
            ExitCode::FAILURE
        },
    }
}
