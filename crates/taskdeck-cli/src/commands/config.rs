//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use taskdeck_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "remote_url": config.remote_url,
                    "collection": config.collection,
                    "bind_addr": config.bind_addr,
                    "reconnect_initial_ms": config.reconnect_initial_ms,
                    "reconnect_max_ms": config.reconnect_max_ms,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!(
                "  remote_url:           {}",
                config.remote_url.as_deref().unwrap_or("(not set)")
            );
            println!("  collection:           {}", config.collection);
            println!("  bind_addr:            {}", config.bind_addr);
            println!("  reconnect_initial_ms: {}", config.reconnect_initial_ms);
            println!("  reconnect_max_ms:     {}", config.reconnect_max_ms);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;
    config.validate()?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "remote_url" => {
            config.remote_url = if unset {
                None
            } else {
                if !value.starts_with("ws://") && !value.starts_with("wss://") {
                    bail!("remote_url must start with ws:// or wss://");
                }
                Some(value.to_string())
            };
        }
        "collection" => {
            if value.trim().is_empty() {
                bail!("collection must not be empty");
            }
            config.collection = value.to_string();
        }
        "bind_addr" => {
            config.bind_addr = value.to_string();
        }
        "reconnect_initial_ms" => {
            config.reconnect_initial_ms = value
                .parse()
                .context("Invalid value for reconnect_initial_ms. Use a number of milliseconds.")?;
        }
        "reconnect_max_ms" => {
            config.reconnect_max_ms = value
                .parse()
                .context("Invalid value for reconnect_max_ms. Use a number of milliseconds.")?;
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, remote_url, collection, bind_addr, \
                 reconnect_initial_ms, reconnect_max_ms, log_file",
                key
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();

        apply(&mut config, "remote_url", "ws://localhost:3040").unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("ws://localhost:3040"));
        apply(&mut config, "remote_url", "none").unwrap();
        assert!(config.remote_url.is_none());

        apply(&mut config, "collection", "chores").unwrap();
        assert_eq!(config.collection, "chores");

        apply(&mut config, "reconnect_max_ms", "5000").unwrap();
        assert_eq!(config.reconnect_max_ms, 5000);
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "remote_url", "http://example.com").is_err());
        assert!(apply(&mut config, "collection", " ").is_err());
        assert!(apply(&mut config, "reconnect_initial_ms", "soon").is_err());
        assert!(apply(&mut config, "favorite_color", "blue").is_err());
    }
}
