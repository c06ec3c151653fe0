use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DecantPaths {
    pub decant_home: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
    pub projects_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    env_path(var).unwrap_or(fallback)
}

pub fn resolve_paths() -> Result<DecantPaths> {
    let home = required_home_dir()?;
    let decant_home = env_or_default_path("DECANT_HOME", home.join(".decant"));
    let logs_dir = env_or_default_path("DECANT_LOGS_DIR", decant_home.join("logs"));
    let config_file = env_or_default_path("DECANT_CONFIG_PATH", decant_home.join("decant.toml"));

    let host_dir = env_or_default_path("CLAUDE_CONFIG_DIR", home.join(".claude"));
    let projects_dir = env_or_default_path("DECANT_PROJECTS_DIR", host_dir.join("projects"));

    Ok(DecantPaths {
        decant_home,
        logs_dir,
        config_file,
        projects_dir,
    })
}
