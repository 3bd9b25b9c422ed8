// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Structured audit logging (spec.md §4.1).
//!
//! Every auth attempt, and every agent register/disconnect/dispatch/
//! follow-up/rate-deny/cost-deny/path-violation, funnels through
//! `AuditSink::record` so the on-disk format stays uniform. Writes never
//! block request processing: a failing sink logs one warning and drops the
//! record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord<'a> {
    pub timestamp: chrono::DateTime<Utc>,
    pub event: &'a str,
    pub outcome: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Short, non-reversible fingerprint of a token for audit records. Never
/// logs the raw token.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for b in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(chars);
    s
}

struct RollingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
    file: File,
    written: u64,
}

impl RollingFile {
    fn open(path: PathBuf, max_bytes: u64, backups: u32) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if self.max_bytes > 0 && self.written + line.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        for i in (1..self.backups).rev() {
            let from = backup_path(&self.path, i);
            let to = backup_path(&self.path, i + 1);
            if from.exists() {
                let _ = std::fs::rename(from, to);
            }
        }
        if self.backups > 0 {
            let _ = std::fs::rename(&self.path, backup_path(&self.path, 1));
        } else {
            let _ = std::fs::remove_file(&self.path);
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .truncate(false)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Append-only audit sink with size-based rollover.
pub struct AuditSink {
    file: Option<Mutex<RollingFile>>,
}

impl AuditSink {
    /// A sink that writes to `path`, rotating once it exceeds `max_bytes`
    /// and keeping up to `backups` rotated files.
    pub fn to_file(path: impl Into<PathBuf>, max_bytes: u64, backups: u32) -> Self {
        match RollingFile::open(path.into(), max_bytes, backups) {
            Ok(f) => Self {
                file: Some(Mutex::new(f)),
            },
            Err(e) => {
                tracing::warn!(error = %e, "audit sink: failed to open log file, audit records will be logged only");
                Self { file: None }
            }
        }
    }

    /// A sink that only emits through `tracing` (used when `AUDIT_LOG_PATH`
    /// is unset); still non-blocking and never fails request processing.
    pub fn tracing_only() -> Self {
        Self { file: None }
    }

    pub fn record(&self, record: &AuditRecord<'_>) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "audit sink: failed to serialize record, dropping");
                return;
            }
        };
        tracing::info!(target: "audit", "{line}");
        if let Some(file) = &self.file {
            let mut guard = file.lock();
            if let Err(e) = guard.write_line(&line) {
                tracing::warn!(error = %e, "audit sink: write failed, dropping record");
            }
        }
    }
}
