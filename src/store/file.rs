use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use super::{RecordRef, SecretStore};
use crate::error::StoreError;
use crate::fs_util;

/// Stores each record as a JSON object at `<root>/<namespace>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    #[must_use]
    pub fn path_for(&self, record: &RecordRef) -> PathBuf {
        self.root
            .join(&record.namespace)
            .join(format!("{}.json", record.name))
    }
}

impl SecretStore for FileSecretStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn create(
        &self,
        record: &RecordRef,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let path = self.path_for(record);
        let contents =
            serde_json::to_vec_pretty(fields).context("Failed to serialize bootstrap record")?;
        if fs_util::write_new_private_file(&path, &contents).await? {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists {
                record: record.to_string(),
            })
        }
    }

    async fn get(&self, record: &RecordRef) -> Result<Option<BTreeMap<String, String>>> {
        let path = self.path_for(record);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let fields = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(fields))
    }

    async fn delete(&self, record: &RecordRef) -> Result<bool> {
        let path = self.path_for(record);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}
