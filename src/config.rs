//! Configuration loading from `.env` files.

use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result};

use crate::records::DEFAULT_RELAYS;

/// Per-relay read timeout used when `QUERY_TIMEOUT_SECS` is unset or invalid.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relays to read from and publish to.
    pub relays: Vec<String>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// Upper bound for connecting to, and each read from, one relay.
    pub query_timeout: Duration,
    /// Identity of the profile edited last, if any.
    pub last_profile: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let mut relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        if relays.is_empty() {
            relays = DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect();
        }
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        let query_timeout = env::var("QUERY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);
        let last_profile = env::var("LAST_PROFILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Self {
            relays,
            tor_socks,
            query_timeout: Duration::from_secs(query_timeout),
            last_profile,
        })
    }
}

/// Create a default `.env` file if one is not already present at `path`.
pub fn ensure_env_file(path: &str) -> Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str(&format!("RELAYS={}\n", DEFAULT_RELAYS.join(",")));
    content.push_str("TOR_SOCKS=\n");
    content.push_str(&format!("QUERY_TIMEOUT_SECS={DEFAULT_QUERY_TIMEOUT_SECS}\n"));
    content.push_str("LAST_PROFILE=\n");
    fs::write(env_path, content).with_context(|| format!("writing {path}"))?;
    Ok(())
}

/// Replace the `KEY=` line in the env file at `path` (appending it if absent)
/// and update the process environment to match.
pub fn write_env_value(path: &str, key: &str, value: &str) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let prefix = format!("{key}=");
    let mut new_content = String::new();
    let mut replaced = false;
    for line in content.lines() {
        if line.starts_with(&prefix) {
            new_content.push_str(&format!("{key}={value}\n"));
            replaced = true;
        } else {
            new_content.push_str(line);
            new_content.push('\n');
        }
    }
    if !replaced {
        new_content.push_str(&format!("{key}={value}\n"));
    }
    fs::write(path, new_content).with_context(|| format!("writing {path}"))?;
    env::set_var(key, value);
    Ok(())
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
