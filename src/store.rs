pub mod file;
pub mod kube;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;

use crate::error::StoreError;

pub use file::FileSecretStore;
pub use kube::KubeSecretStore;

/// Where a bootstrap record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub name: String,
    pub namespace: String,
}

impl RecordRef {
    #[must_use]
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// A sibling record name, used when the primary one is unexpectedly taken.
    #[must_use]
    pub fn sibling(&self, suffix: &str) -> Self {
        Self {
            name: format!("{}-{suffix}", self.name),
            namespace: self.namespace.clone(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Durable key/value storage for the bootstrap record.
#[allow(async_fn_in_trait)]
pub trait SecretStore {
    /// Short label of the backend, for reports.
    fn kind(&self) -> &'static str;

    /// Creates the record; never overwrites.
    ///
    /// # Errors
    /// Returns [`StoreError::AlreadyExists`] if the record exists.
    async fn create(
        &self,
        record: &RecordRef,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// # Errors
    /// Returns an error if the backend cannot be read; a missing record is `Ok(None)`.
    async fn get(&self, record: &RecordRef) -> Result<Option<BTreeMap<String, String>>>;

    /// Deletes the record; returns whether one existed.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be modified.
    async fn delete(&self, record: &RecordRef) -> Result<bool>;
}
