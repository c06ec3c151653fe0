pub mod compact;
pub mod list;
pub mod show;
pub mod status;

use serde::Serialize;

use crate::decant::config::unknown_env_keys;
use crate::decant::warn::{self, WarnEvent};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Warn once per misspelled or retired `DECANT_*` variable.
pub fn report_unknown_env() -> Vec<String> {
    let unknown = unknown_env_keys();
    for key in &unknown {
        warn::emit(WarnEvent {
            code: "UNKNOWN_ENV",
            stage: "config",
            action: "ignore",
            session: "na",
            reason: key,
            err: "not read by decant",
        });
    }
    unknown
}
