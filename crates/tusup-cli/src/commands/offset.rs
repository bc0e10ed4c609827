//! Offset command - query how far an upload got

use anyhow::{Context, Result};
use tusup_client::Uploader;

use crate::output::{format_bytes, OutputContext};

pub async fn offset(uploader: &Uploader, url: &str, ctx: &OutputContext) -> Result<()> {
    let offset = uploader
        .resolve_offset(url)
        .await
        .with_context(|| format!("Failed to query offset of {}", url))?;

    if ctx.quiet {
        println!("{}", offset);
        return Ok(());
    }

    ctx.print_kv(&[
        ("URL", url.to_string()),
        ("Offset", offset.to_string()),
        ("Stored", format_bytes(offset)),
    ]);
    Ok(())
}
