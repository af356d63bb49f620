//! Session-scoped journal of research activity.
//!
//! A [`SessionJournal`] is opened when a research session starts and closed
//! when it ends. Every record is mirrored to `tracing` and, when a journal
//! directory is configured, appended as a JSON line to
//! `<dir>/<session_id>.jsonl` after secrets are redacted.

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

use crate::config::LoggingConfig;

const JOURNAL_EXTENSION: &str = "jsonl";

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
        (
            "tavily_token",
            Regex::new(r"(tvly-[A-Za-z0-9]{16,})").expect("invalid tavily_token regex"),
        ),
    ]
});

static SESSION_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("invalid session id regex"));

/// Session ids double as file names, so only a safe alphabet is accepted.
pub fn is_valid_session_id(session_id: &str) -> bool {
    SESSION_ID_PATTERN.is_match(session_id)
}

/// Where and how long journals are kept.
#[derive(Debug, Clone, Default)]
pub struct JournalSettings {
    pub dir: Option<PathBuf>,
    /// Journals older than this many days are pruned on open; `0` keeps everything.
    pub retention_days: u64,
}

impl JournalSettings {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            retention_days: 0,
        }
    }
}

impl From<&LoggingConfig> for JournalSettings {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            retention_days: config.retention_days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalLevel {
    Info,
    Warn,
    Error,
}

#[derive(Serialize)]
struct JournalRecord<'a> {
    timestamp: String,
    session_id: &'a str,
    level: JournalLevel,
    message: String,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    redactions: BTreeSet<&'static str>,
}

pub struct SessionJournal {
    session_id: String,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl SessionJournal {
    /// Open the journal for `session_id`.
    ///
    /// Never fails: if the file cannot be created the journal keeps mirroring
    /// to `tracing` only.
    pub fn open(session_id: &str, settings: &JournalSettings) -> Self {
        let Some(dir) = settings.dir.as_deref() else {
            return Self::disabled(session_id);
        };

        if !is_valid_session_id(session_id) {
            warn!(%session_id, "session id is not a safe file name; journal file disabled");
            return Self::disabled(session_id);
        }

        if let Err(err) = enforce_retention(dir, settings.retention_days) {
            warn!(error = %err, dir = %dir.display(), "journal retention sweep failed");
        }

        let path = journal_path(dir, session_id);
        match open_append(&path) {
            Ok(file) => Self {
                session_id: session_id.to_string(),
                path: Some(path),
                writer: Some(BufWriter::new(file)),
            },
            Err(err) => {
                warn!(error = %err, path = %path.display(), "unable to open session journal");
                Self::disabled(session_id)
            }
        }
    }

    pub fn disabled(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            path: None,
            writer: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.record(JournalLevel::Info, message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.record(JournalLevel::Warn, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.record(JournalLevel::Error, message.as_ref());
    }

    pub fn record(&mut self, level: JournalLevel, message: &str) {
        let mut redactions = BTreeSet::new();
        let message = sanitize_text(message, &mut redactions);

        match level {
            JournalLevel::Info => info!(session_id = %self.session_id, "{message}"),
            JournalLevel::Warn => warn!(session_id = %self.session_id, "{message}"),
            JournalLevel::Error => error!(session_id = %self.session_id, "{message}"),
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let record = JournalRecord {
            timestamp: Utc::now().to_rfc3339(),
            session_id: &self.session_id,
            level,
            message,
            redactions,
        };

        let written = serde_json::to_string(&record)
            .map_err(anyhow::Error::from)
            .and_then(|line| writeln!(writer, "{line}").map_err(anyhow::Error::from));
        if let Err(err) = written {
            warn!(session_id = %self.session_id, error = %err, "journal write failed; disabling file output");
            self.writer = None;
        }
    }

    /// Write a closing record and flush the file.
    pub fn close(mut self, outcome: &str) {
        self.info(format!("Session closed: {outcome}"));
        self.flush();
    }

    fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                warn!(session_id = %self.session_id, error = %err, "journal flush failed");
            }
        }
    }
}

impl Drop for SessionJournal {
    fn drop(&mut self) {
        self.flush();
    }
}

fn journal_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.{JOURNAL_EXTENSION}"))
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create journal directory {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open journal file {}", path.display()))
}

fn sanitize_text(input: &str, redactions: &mut BTreeSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(*name);
        }
    }
    output
}

fn enforce_retention(dir: &Path, retention_days: u64) -> Result<()> {
    if retention_days == 0 || !dir.exists() {
        return Ok(());
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(JOURNAL_EXTENSION) {
            continue;
        }
        let metadata = entry.metadata()?;
        if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

/// Read a session's journal, if one exists.
pub fn read_session_log(dir: &Path, session_id: &str) -> Result<Option<String>> {
    if !is_valid_session_id(session_id) {
        return Ok(None);
    }
    let path = journal_path(dir, session_id);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read journal {}", path.display()))?;
    Ok(Some(contents))
}

/// Delete a session's journal. Returns whether a file was removed.
pub fn remove_session_log(dir: &Path, session_id: &str) -> Result<bool> {
    if !is_valid_session_id(session_id) {
        return Ok(false);
    }
    let path = journal_path(dir, session_id);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path).with_context(|| format!("failed to remove journal {}", path.display()))?;
    Ok(true)
}
