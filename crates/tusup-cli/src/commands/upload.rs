//! Upload command - send or resume a file upload

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tusup_client::{ByteSource, FileSource, UploadRequest, Uploader};

use crate::output::{format_bytes, OutputContext, UploadRow};

/// Upload `file_path` to `url`, resuming from `offset` when given
pub async fn upload(
    uploader: &mut Uploader,
    url: &str,
    file_path: &Path,
    offset: Option<u64>,
    ctx: &OutputContext,
) -> Result<()> {
    let source = FileSource::open(file_path)
        .await
        .with_context(|| format!("Failed to open file: {}", file_path.display()))?;
    let size = source.len();

    ctx.info(&format!(
        "Uploading {} ({}) to {}",
        file_path.display(),
        format_bytes(size),
        url
    ));

    let pb = if ctx.interactive() {
        let pb = ProgressBar::new(size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}")?
                .progress_chars("=>-"),
        );
        pb.set_position(offset.unwrap_or(0));
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut request = UploadRequest::new(url, source);
    if let Some(offset) = offset {
        request = request.offset(offset);
    }
    let bar = pb.clone();
    request = request.on_progress(move |event| bar.set_position(event.offset));

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let result = {
        let transfer = uploader.upload(request);
        tokio::pin!(transfer);

        loop {
            tokio::select! {
                result = &mut transfer => break Some(result),
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                    if !running.load(Ordering::SeqCst) {
                        break None;
                    }
                }
            }
        }
    };

    let Some(result) = result else {
        pb.abandon_with_message("Interrupted");
        ctx.warn(&format!(
            "Upload interrupted. Run `tusup offset {}` to see how far it got, then resume with --offset.",
            url
        ));
        return Err(anyhow::anyhow!("Upload interrupted"));
    };

    match result {
        Ok(report) => {
            pb.finish_with_message("Complete!");
            ctx.success(&format!("\nUploaded {} to {}", file_path.display(), url));
            if !ctx.quiet {
                ctx.print_one(&UploadRow::from(&report));
            }
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("Failed!");
            if let Some(reached) = uploader.current_offset() {
                ctx.warn(&format!(
                    "Server acknowledged {} of {} bytes. Resume with --offset {}.",
                    reached, size, reached
                ));
            }
            Err(anyhow::Error::new(e).context("Upload failed"))
        }
    }
}
