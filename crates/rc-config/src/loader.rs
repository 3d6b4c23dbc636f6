//! Layered config loading: compiled defaults, overridable by a TOML file,
//! overridable again by environment variables — the same shape
//! `hooteconf::HootConfig::load` uses, scoped down to `SyncConfig` since
//! `ConnectionPolicy`'s backoff function isn't a serializable value.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::sync_config::SyncConfig;

/// Which files and env vars actually contributed to the loaded config —
/// surfaced for diagnostics/logging, not consulted by the caller.
#[derive(Debug, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<&'static str>,
}

/// Load `SyncConfig` from `./realtime-client.toml` (if present) then
/// `RC_*` environment variables, reporting what contributed.
pub fn load_sync_config() -> Result<(SyncConfig, ConfigSources), ConfigError> {
    load_sync_config_from(None)
}

pub fn load_sync_config_from(
    path_override: Option<&Path>,
) -> Result<(SyncConfig, ConfigSources), ConfigError> {
    let mut sources = ConfigSources::default();
    let mut config = SyncConfig::default();

    let candidate = path_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("realtime-client.toml"));

    if candidate.exists() {
        let text = std::fs::read_to_string(&candidate).map_err(|source| ConfigError::FileRead {
            path: candidate.clone(),
            source,
        })?;
        config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: candidate.clone(),
            source,
        })?;
        sources.files.push(candidate);
    }

    apply_env_overrides(&mut config, &mut sources)?;

    Ok((config, sources))
}

fn apply_env_overrides(config: &mut SyncConfig, sources: &mut ConfigSources) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var("RC_ENABLE_MESSAGE_UPDATES") {
        config.enable_message_updates = parse_bool("RC_ENABLE_MESSAGE_UPDATES", &raw)?;
        sources.env_overrides.push("RC_ENABLE_MESSAGE_UPDATES");
    }
    if let Ok(raw) = std::env::var("RC_LAST_SYNC_SAFETY_GAP_SECONDS") {
        config.last_sync_safety_gap_seconds = raw.parse().map_err(|_| ConfigError::BadEnvValue {
            var: "RC_LAST_SYNC_SAFETY_GAP_SECONDS",
            value: raw.clone(),
        })?;
        sources.env_overrides.push("RC_LAST_SYNC_SAFETY_GAP_SECONDS");
    }
    Ok(())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "true" | "TRUE" | "yes" => Ok(true),
        "0" | "false" | "FALSE" | "no" => Ok(false),
        other => Err(ConfigError::BadEnvValue {
            var,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_with_no_file_and_no_env() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let (config, sources) = load_sync_config_from(Some(&missing)).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert!(sources.files.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime-client.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "enable_message_updates = true").unwrap();
        writeln!(file, "last_sync_safety_gap_seconds = 30").unwrap();

        let (config, sources) = load_sync_config_from(Some(&path)).unwrap();
        assert!(config.enable_message_updates);
        assert_eq!(config.last_sync_safety_gap_seconds, 30);
        assert_eq!(sources.files, vec![path]);
    }
}
