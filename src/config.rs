use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputMode {
    #[default]
    None,
    Token,
    Stream,
}

/// Machine run configuration. Every file is optional; a missing key
/// disables the corresponding output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    pub input_file: Option<PathBuf>,
    pub input_mode: InputMode,
    pub schedule_start: Option<u64>,
    pub schedule_offset: Option<u64>,
    pub output_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub binary_repr_file: Option<PathBuf>,
    pub log_hash_file: Option<PathBuf>,
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Line-oriented `key: value` parser. `#` lines and lines without a
/// colon are ignored; an unknown key is an error.
pub fn parse_config(text: &str) -> Result<MachineConfig> {
    let mut cfg = MachineConfig::default();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = unquote(value);

        let err = |what: &str| format!("config line {}: {what}", lineno + 1);
        match key {
            "input_file" => cfg.input_file = Some(PathBuf::from(value)),
            "input_mode" => {
                cfg.input_mode = match value {
                    "token" => InputMode::Token,
                    "stream" => InputMode::Stream,
                    other => anyhow::bail!(err(&format!("invalid input_mode: {other}"))),
                }
            }
            "schedule_start" => {
                cfg.schedule_start = Some(value.parse().with_context(|| err("bad schedule_start"))?)
            }
            "schedule_offset" => {
                cfg.schedule_offset =
                    Some(value.parse().with_context(|| err("bad schedule_offset"))?)
            }
            "output_file" => cfg.output_file = Some(PathBuf::from(value)),
            "log_file" => cfg.log_file = Some(PathBuf::from(value)),
            "binary_repr_file" => cfg.binary_repr_file = Some(PathBuf::from(value)),
            "log_hash_file" => cfg.log_hash_file = Some(PathBuf::from(value)),
            other => anyhow::bail!(err(&format!("unknown config key: {other}"))),
        }
    }

    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<MachineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to open config file {}", path.display()))?;
    parse_config(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_comments_and_quotes() {
        let cfg = parse_config(
            "# machine run\n\
             input_file: \"input.txt\"\n\
             input_mode: token\n\
             log_file: trace.log\n\
             \n\
             schedule_start: 10\n",
        )
        .unwrap();
        assert_eq!(cfg.input_file, Some(PathBuf::from("input.txt")));
        assert_eq!(cfg.input_mode, InputMode::Token);
        assert_eq!(cfg.log_file, Some(PathBuf::from("trace.log")));
        assert_eq!(cfg.schedule_start, Some(10));
        assert_eq!(cfg.output_file, None);
    }

    #[test]
    fn unknown_key_fails() {
        assert!(parse_config("frequency: 42\n").is_err());
    }

    #[test]
    fn invalid_mode_fails() {
        assert!(parse_config("input_mode: radio\n").is_err());
    }
}
