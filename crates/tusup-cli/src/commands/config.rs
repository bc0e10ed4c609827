//! Config command - print the configuration tusup would use

use anyhow::Result;
use std::path::Path;
use tusup_client::ClientConfig;

use crate::config::config_path;
use crate::output::{OutputContext, OutputFormat};

pub fn show_config(config: &ClientConfig, path: Option<&Path>, ctx: &OutputContext) -> Result<()> {
    match ctx.format {
        OutputFormat::Json => println!("{}", config.to_json()?),
        OutputFormat::Table => {
            let source = match path {
                Some(p) => p.display().to_string(),
                None => match config_path() {
                    Ok(p) if p.exists() => p.display().to_string(),
                    _ => "built-in defaults".to_string(),
                },
            };
            ctx.info(&format!("# source: {}", source));
            print!("{}", config.to_yaml()?);
        }
    }
    Ok(())
}
