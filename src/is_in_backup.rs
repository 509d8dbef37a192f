use crate::context::Context;
use anyhow::Result;
use pg_exclusive_backup::backup::gate;

/// Looks at the data directory only, so it answers with the server down.
pub fn run(ctx: &Context) -> Result<()> {
    println!("{}", gate::backup_in_progress(&ctx.cluster_data, false)?);
    Ok(())
}
