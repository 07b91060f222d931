//! Config command - show the effective configuration.

use anyhow::Result;
use warden_config::ResolvedConfig;

use crate::formatter::{OutputFormat, print_json};
use crate::theme::Theme;

/// Print the merged configuration and the layers it came from.
pub(crate) fn show_config(resolved: &ResolvedConfig, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&resolved.config);
    }

    println!("\n{}", Theme::header("Effective Configuration"));
    if resolved.loaded_files.is_empty() {
        println!("{}", Theme::info("No config files found; using defaults"));
    }
    for file in &resolved.loaded_files {
        println!("{}", Theme::kv("file", file));
    }
    for field in &resolved.env_overrides {
        println!("{}", Theme::kv("env override", field));
    }
    println!("{}", Theme::separator());
    print!("{}", resolved.config.to_toml()?);
    Ok(())
}
