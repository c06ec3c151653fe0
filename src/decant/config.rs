use crate::decant::paths::DecantPaths;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

include!(concat!(env!("OUT_DIR"), "/decant_env_allowlist.rs"));

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub summary_max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: "haiku".to_string(),
            timeout_secs: 90,
            max_retries: 3,
            backoff_ms: 500,
            summary_max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub boundary_max_chars: usize,
    pub summary_max_chars: usize,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            boundary_max_chars: 100_000,
            summary_max_chars: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    pub backup: bool,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self { backup: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DecantConfig {
    pub oracle: OracleConfig,
    pub transcript: TranscriptConfig,
    pub write: WriteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDecantConfig {
    oracle: Option<OracleConfig>,
    transcript: Option<TranscriptConfig>,
    write: Option<WriteConfig>,
}

const MIN_TRANSCRIPT_CHARS: usize = 1_000;

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &DecantConfig) -> Result<()> {
    if cfg.oracle.model.trim().is_empty() {
        return Err(anyhow!("invalid oracle model: cannot be empty"));
    }
    if cfg.oracle.timeout_secs == 0 {
        return Err(anyhow!("invalid oracle timeout: must be >= 1 second"));
    }
    if cfg.oracle.summary_max_tokens == 0 {
        return Err(anyhow!("invalid summary max tokens: must be >= 1"));
    }
    if cfg.transcript.boundary_max_chars < MIN_TRANSCRIPT_CHARS {
        return Err(anyhow!(
            "invalid boundary transcript limit: must be >= {MIN_TRANSCRIPT_CHARS} chars"
        ));
    }
    if cfg.transcript.summary_max_chars < MIN_TRANSCRIPT_CHARS {
        return Err(anyhow!(
            "invalid summary transcript limit: must be >= {MIN_TRANSCRIPT_CHARS} chars"
        ));
    }
    Ok(())
}

fn merge_file_config(base: &mut DecantConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialDecantConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse decant config {}: {err}", path.display()))?;
    if let Some(oracle) = parsed.oracle {
        base.oracle = oracle;
    }
    if let Some(transcript) = parsed.transcript {
        base.transcript = transcript;
    }
    if let Some(write) = parsed.write {
        base.write = write;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut DecantConfig) {
    cfg.oracle.model = env_or_string("DECANT_MODEL", &cfg.oracle.model);
    cfg.oracle.timeout_secs = env_or_u64("DECANT_TIMEOUT_SECS", cfg.oracle.timeout_secs);
    cfg.oracle.max_retries = env_or_u32("DECANT_MAX_RETRIES", cfg.oracle.max_retries);
    cfg.oracle.backoff_ms = env_or_u64("DECANT_BACKOFF_MS", cfg.oracle.backoff_ms);
    cfg.oracle.summary_max_tokens =
        env_or_u32("DECANT_SUMMARY_MAX_TOKENS", cfg.oracle.summary_max_tokens);
    cfg.transcript.boundary_max_chars = env_or_usize(
        "DECANT_BOUNDARY_MAX_CHARS",
        cfg.transcript.boundary_max_chars,
    );
    cfg.transcript.summary_max_chars =
        env_or_usize("DECANT_SUMMARY_MAX_CHARS", cfg.transcript.summary_max_chars);
    cfg.write.backup = env_or_bool("DECANT_BACKUP", cfg.write.backup);
}

pub fn load_config(paths: &DecantPaths) -> Result<DecantConfig> {
    let mut cfg = DecantConfig::default();
    merge_file_config(&mut cfg, &paths.config_file)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

fn unknown_keys<'a>(keys: impl Iterator<Item = &'a str>, allowlist: &[&str]) -> Vec<String> {
    let mut out = keys
        .filter(|key| key.starts_with("DECANT_") && !allowlist.contains(key))
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    out.sort();
    out
}

/// `DECANT_*` variables set in the environment that no code path reads.
pub fn unknown_env_keys() -> Vec<String> {
    let keys = env::vars().map(|(key, _)| key).collect::<Vec<_>>();
    unknown_keys(
        keys.iter().map(String::as_str),
        GENERATED_DECANT_ENV_ALLOWLIST,
    )
}
