//! `docgraph mappings`: show what a full sync would write.

use anyhow::Result;

use super::AppContext;
use crate::output;

pub fn execute(ctx: &AppContext) -> Result<()> {
    output::print_mappings(&ctx.config.sync);
    Ok(())
}
