use crate::decant::warn::{self, WarnEvent};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "sessions-index.json";
const MIN_PREFIX_CHARS: usize = 6;
const MAX_AMBIGUOUS_SHOWN: usize = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub path: PathBuf,
    /// Project directory name under the projects root.
    pub project: String,
    pub summary: String,
    pub first_prompt: String,
    pub created: String,
    pub modified: String,
    pub git_branch: String,
    pub project_path: String,
    pub message_count: u64,
    pub size_bytes: u64,
}

impl SessionInfo {
    fn sort_key(&self) -> &str {
        if self.modified.is_empty() {
            &self.created
        } else {
            &self.modified
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IndexEntry {
    session_id: String,
    summary: String,
    first_prompt: String,
    created: String,
    modified: String,
    git_branch: String,
    project_path: String,
    message_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexFile {
    Wrapped { entries: Vec<IndexEntry> },
    Bare(Vec<IndexEntry>),
}

impl IndexFile {
    fn into_entries(self) -> Vec<IndexEntry> {
        match self {
            IndexFile::Wrapped { entries } => entries,
            IndexFile::Bare(entries) => entries,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProjectFilter<'a> {
    All,
    /// Exact project directory name.
    Dir(&'a str),
    /// Case-insensitive substring of the project directory name.
    Contains(&'a str),
}

impl ProjectFilter<'_> {
    fn accepts(&self, dir_name: &str) -> bool {
        match self {
            ProjectFilter::All => true,
            ProjectFilter::Dir(name) => dir_name == *name,
            ProjectFilter::Contains(needle) => dir_name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

/// Host's project directory name for a working directory: `/a/b` → `-a-b`.
pub fn cwd_project_dir_name(cwd: &Path) -> String {
    cwd.to_string_lossy().replace(['/', '\\'], "-")
}

fn rfc3339(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn project_dirs(projects_dir: &Path) -> Result<Vec<PathBuf>> {
    if !projects_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = fs::read_dir(projects_dir)
        .with_context(|| format!("failed to read {}", projects_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    dirs.sort();
    Ok(dirs)
}

fn jsonl_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn read_index(path: &Path) -> Option<Vec<IndexEntry>> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<IndexFile>(&raw) {
        Ok(index) => Some(index.into_entries()),
        Err(err) => {
            warn::emit(WarnEvent {
                code: "SESSION_INDEX_INVALID",
                stage: "list",
                action: "scan-jsonl",
                session: "na",
                reason: &path.display().to_string(),
                err: &err.to_string(),
            });
            None
        }
    }
}

fn scan_project(dir: &Path) -> Result<Vec<SessionInfo>> {
    let project = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index_path = dir.join(INDEX_FILE);
    if index_path.exists()
        && let Some(entries) = read_index(&index_path)
    {
        let sessions = entries
            .into_iter()
            .filter(|entry| !entry.session_id.is_empty())
            .filter_map(|entry| {
                let path = dir.join(format!("{}.jsonl", entry.session_id));
                let size_bytes = fs::metadata(&path).ok()?.len();
                Some(SessionInfo {
                    session_id: entry.session_id,
                    path,
                    project: project.clone(),
                    summary: entry.summary,
                    first_prompt: entry.first_prompt,
                    created: entry.created,
                    modified: entry.modified,
                    git_branch: entry.git_branch,
                    project_path: entry.project_path,
                    message_count: entry.message_count,
                    size_bytes,
                })
            })
            .collect();
        return Ok(sessions);
    }

    let mut sessions = Vec::new();
    for path in jsonl_files(dir)? {
        let meta = fs::metadata(&path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        sessions.push(SessionInfo {
            session_id,
            project: project.clone(),
            modified: meta.modified().map(rfc3339).unwrap_or_default(),
            size_bytes: meta.len(),
            path,
            ..SessionInfo::default()
        });
    }
    Ok(sessions)
}

/// Sessions under `projects_dir`, most recent first.
pub fn list_sessions(projects_dir: &Path, filter: ProjectFilter<'_>) -> Result<Vec<SessionInfo>> {
    let mut sessions = Vec::new();
    for dir in project_dirs(projects_dir)? {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !filter.accepts(&name) {
            continue;
        }
        sessions.extend(scan_project(&dir)?);
    }
    sessions.sort_by(|a, b| b.sort_key().cmp(a.sort_key()));
    Ok(sessions)
}

/// Resolve a session argument: a `.jsonl` path, an exact session id, or a
/// unique id prefix.
pub fn find_session(projects_dir: &Path, query: &str) -> Result<PathBuf> {
    let query = query.trim();
    let as_path = Path::new(query);
    if as_path.is_file() && as_path.extension().is_some_and(|ext| ext == "jsonl") {
        return Ok(as_path.to_path_buf());
    }

    let dirs = project_dirs(projects_dir)?;
    for dir in &dirs {
        let exact = dir.join(format!("{query}.jsonl"));
        if exact.is_file() {
            return Ok(exact);
        }
    }

    let mut matches = Vec::new();
    if query.chars().count() >= MIN_PREFIX_CHARS {
        for dir in &dirs {
            for path in jsonl_files(dir)? {
                let stem_matches = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| stem.starts_with(query));
                if stem_matches {
                    matches.push(path);
                }
            }
        }
    }

    match matches.len() {
        0 => Err(anyhow!(
            "session `{query}` not found under {}; use `decant list` to see available sessions",
            projects_dir.display()
        )),
        1 => Ok(matches.remove(0)),
        n => {
            let shown = matches
                .iter()
                .take(MAX_AMBIGUOUS_SHOWN)
                .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(anyhow!(
                "ambiguous session prefix `{query}` matches {n} sessions: {shown}"
            ))
        }
    }
}
