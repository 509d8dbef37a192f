use crate::context::Context;
use anyhow::Result;
use log::info;
use pg_exclusive_backup::backup::postgres_host::PostgresHost;
use pg_exclusive_backup::backup::ExclusiveBackup;
use pg_exclusive_backup::timestamp::format_timestamptz;

pub fn run(ctx: &Context) -> Result<()> {
    let host = PostgresHost::connect(&ctx.conninfo)?;
    let mut backup = ExclusiveBackup::new(&ctx.cluster_data, host);
    match backup.start_time()? {
        Some(start_time) => println!("{}", format_timestamptz(start_time)?),
        None => info!("no exclusive backup in progress"),
    }
    Ok(())
}
