// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Env File Store
//!
//! Snapshot, rewrite and restore of a target's dotenv file.
//!
//! - The snapshot is a byte-for-byte copy at `<file>.<attack_id>.backup`;
//!   a missing file is remembered as "did not exist".
//! - Writes go to an attack-scoped sibling temporary file and are renamed
//!   into place, so the target never observes a partially written file.
//! - Restore copies the backup back the same way (or removes a file that did
//!   not exist before) and then drops the backup.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::attack::AttackId;

#[derive(Debug, Clone, Error)]
pub enum EnvFileError {
    #[error("{operation} {path}: {message}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        message: String,
    },
}

impl EnvFileError {
    fn io(operation: &'static str, path: &Path, err: std::io::Error) -> Self {
        EnvFileError::Io {
            operation,
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub attack_id: AttackId,
    /// `None` when the file did not exist.
    pub backup_path: Option<PathBuf>,
}

impl EnvSnapshot {
    pub fn existed(&self) -> bool {
        self.backup_path.is_some()
    }
}

/// Result of rewriting one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvRewrite {
    pub content: String,
    /// Unquoted value of the first matching line, if any.
    pub original_value: Option<String>,
    pub found: bool,
}

fn is_assignment_of(line: &str, name: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return false;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    match trimmed.strip_prefix(name) {
        Some(rest) => rest.trim_start().starts_with('='),
        None => false,
    }
}

fn assignment_value(line: &str) -> String {
    let value = line
        .split_once('=')
        .map(|(_, v)| v)
        .unwrap_or_default()
        .trim();
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    unquoted.unwrap_or(value).to_string()
}

/// Rewrite `name` in dotenv `content`: replace every assignment with
/// `name=value`, or drop them when `value` is `None`. A missing variable is
/// appended when a value is given. Comments and unrelated lines keep their
/// exact bytes.
pub fn rewrite_env(content: &str, name: &str, value: Option<&str>) -> EnvRewrite {
    let mut out = String::with_capacity(content.len() + 32);
    let mut original_value = None;
    let mut found = false;

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if !is_assignment_of(body, name) {
            out.push_str(line);
            continue;
        }
        if !found {
            original_value = Some(assignment_value(body));
            found = true;
        }
        if let Some(value) = value {
            out.push_str(name);
            out.push('=');
            out.push_str(value);
            out.push_str(&line[body.len()..]);
        }
    }

    if !found {
        if let Some(value) = value {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(name);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
    }

    EnvRewrite {
        content: out,
        original_value,
        found,
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvFileStore;

impl EnvFileStore {
    pub fn new() -> Self {
        Self
    }

    pub fn backup_path_for(path: &Path, attack_id: AttackId) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| ".env".into());
        name.push(format!(".{}.backup", attack_id));
        path.with_file_name(name)
    }

    fn temp_path_for(path: &Path, attack_id: AttackId) -> PathBuf {
        let mut name = std::ffi::OsString::from(".");
        name.push(path.file_name().unwrap_or_else(|| ".env".as_ref()));
        name.push(format!(".{}.aegis-chaos.tmp", attack_id));
        path.with_file_name(name)
    }

    pub async fn snapshot(&self, path: &Path, attack_id: AttackId) -> Result<EnvSnapshot, EnvFileError> {
        match tokio::fs::metadata(path).await {
            Ok(_) => {
                let backup = Self::backup_path_for(path, attack_id);
                tokio::fs::copy(path, &backup)
                    .await
                    .map_err(|e| EnvFileError::io("backup", path, e))?;
                Ok(EnvSnapshot {
                    attack_id,
                    backup_path: Some(backup),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(EnvSnapshot {
                attack_id,
                backup_path: None,
            }),
            Err(e) => Err(EnvFileError::io("stat", path, e)),
        }
    }

    /// Rewrite one variable in place. A missing file is treated as empty.
    pub async fn rewrite(
        &self,
        path: &Path,
        attack_id: AttackId,
        name: &str,
        value: Option<&str>,
    ) -> Result<EnvRewrite, EnvFileError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(EnvFileError::io("read", path, e)),
        };
        let rewrite = rewrite_env(&content, name, value);
        self.write_atomic(path, attack_id, rewrite.content.as_bytes()).await?;
        Ok(rewrite)
    }

    pub async fn restore(&self, path: &Path, snapshot: &EnvSnapshot) -> Result<(), EnvFileError> {
        match &snapshot.backup_path {
            Some(backup) => {
                let tmp = Self::temp_path_for(path, snapshot.attack_id);
                tokio::fs::copy(backup, &tmp)
                    .await
                    .map_err(|e| EnvFileError::io("restore", backup, e))?;
                tokio::fs::rename(&tmp, path)
                    .await
                    .map_err(|e| EnvFileError::io("rename", path, e))?;
                if let Err(e) = tokio::fs::remove_file(backup).await {
                    tracing::warn!(backup = %backup.display(), error = %e, "Failed to remove env backup");
                }
                Ok(())
            }
            None => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(EnvFileError::io("remove", path, e)),
            },
        }
    }

    async fn write_atomic(&self, path: &Path, attack_id: AttackId, bytes: &[u8]) -> Result<(), EnvFileError> {
        let tmp = Self::temp_path_for(path, attack_id);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| EnvFileError::io("write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| EnvFileError::io("rename", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "# target settings\nDATABASE_URL=postgres://db/app\nEXTERNAL_API_KEY=\"sk-123\"\nDEBUG=true";

    #[test]
    fn test_remove_variable_keeps_other_bytes() {
        let rewrite = rewrite_env(SAMPLE, "EXTERNAL_API_KEY", None);
        assert!(rewrite.found);
        assert_eq!(rewrite.original_value.as_deref(), Some("sk-123"));
        assert_eq!(
            rewrite.content,
            "# target settings\nDATABASE_URL=postgres://db/app\nDEBUG=true"
        );
    }

    #[test]
    fn test_replace_variable_with_spaces_around_equals() {
        let content = "EXTERNAL_API_KEY = 'abc'\r\nOTHER=1\r\n";
        let rewrite = rewrite_env(content, "EXTERNAL_API_KEY", Some("INVALID_VALUE_12345"));
        assert_eq!(rewrite.original_value.as_deref(), Some("abc"));
        assert_eq!(rewrite.content, "EXTERNAL_API_KEY=INVALID_VALUE_12345\r\nOTHER=1\r\n");
    }

    #[test]
    fn test_missing_variable_is_appended() {
        let rewrite = rewrite_env("DEBUG=true", "EXTERNAL_API_KEY", Some("x"));
        assert!(!rewrite.found);
        assert!(rewrite.original_value.is_none());
        assert_eq!(rewrite.content, "DEBUG=true\nEXTERNAL_API_KEY=x\n");
    }

    #[test]
    fn test_comments_and_prefixes_are_not_matched() {
        let content = "# EXTERNAL_API_KEY=old\nEXTERNAL_API_KEY_2=keep\n";
        let rewrite = rewrite_env(content, "EXTERNAL_API_KEY", None);
        assert!(!rewrite.found);
        assert_eq!(rewrite.content, content);
    }

    #[tokio::test]
    async fn test_snapshot_rewrite_restore_is_byte_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, SAMPLE).unwrap();
        let store = EnvFileStore::new();
        let id = AttackId::new();

        let snapshot = store.snapshot(&path, id).await.unwrap();
        assert!(snapshot.existed());
        store.rewrite(&path, id, "EXTERNAL_API_KEY", None).await.unwrap();
        assert!(!std::fs::read_to_string(&path).unwrap().contains("EXTERNAL_API_KEY"));

        store.restore(&path, &snapshot).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), SAMPLE.as_bytes());
        assert!(!snapshot.backup_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_restore_removes_file_that_did_not_exist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let store = EnvFileStore::new();

        let id = AttackId::new();
        let snapshot = store.snapshot(&path, id).await.unwrap();
        assert!(!snapshot.existed());
        store.rewrite(&path, id, "EXTERNAL_API_KEY", Some("x")).await.unwrap();
        assert!(path.exists());

        store.restore(&path, &snapshot).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_backup_and_temp_paths_are_attack_scoped() {
        let id = AttackId::new();
        let path = Path::new("/srv/app/.env");
        let backup = EnvFileStore::backup_path_for(path, id);
        assert_eq!(backup, PathBuf::from(format!("/srv/app/.env.{}.backup", id)));

        let tmp = EnvFileStore::temp_path_for(path, id);
        assert_eq!(tmp, PathBuf::from(format!("/srv/app/..env.{}.aegis-chaos.tmp", id)));
        assert_ne!(tmp, EnvFileStore::temp_path_for(path, AttackId::new()));
    }

    #[tokio::test]
    async fn test_concurrent_attacks_on_one_file_leave_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, SAMPLE).unwrap();
        let store = EnvFileStore::new();

        let (first, second) = (AttackId::new(), AttackId::new());
        let (a, b) = tokio::join!(
            store.rewrite(&path, first, "DEBUG", Some("false")),
            store.rewrite(&path, second, "EXTERNAL_API_KEY", None),
        );
        a.unwrap();
        b.unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".env".to_string()]);
    }
}
