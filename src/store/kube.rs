use std::collections::BTreeMap;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;

use super::{RecordRef, SecretStore};
use crate::error::StoreError;
use crate::kubectl::Kubectl;

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "bao-bootstrap";

/// Stores records as Kubernetes `Secret` objects.
#[derive(Debug, Clone)]
pub struct KubeSecretStore {
    kubectl: Kubectl,
}

#[derive(Debug, Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl KubeSecretStore {
    #[must_use]
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }
}

impl SecretStore for KubeSecretStore {
    fn kind(&self) -> &'static str {
        "kubernetes"
    }

    async fn create(
        &self,
        record: &RecordRef,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        // The manifest goes through stdin so secret values never show up in argv.
        let manifest = secret_manifest(record, fields);
        let body = serde_json::to_vec(&manifest).context("Failed to serialize secret manifest")?;
        let args = vec!["create".to_string(), "-f".to_string(), "-".to_string()];
        let output = self
            .kubectl
            .run(&args, Some(&body), self.kubectl.timeout())
            .await?;
        if output.success() {
            return Ok(());
        }
        if is_already_exists(&output.stderr) {
            return Err(StoreError::AlreadyExists {
                record: record.to_string(),
            });
        }
        Err(anyhow::anyhow!(
            "kubectl create secret {record} failed: {}",
            output.stderr.trim()
        )
        .into())
    }

    async fn get(&self, record: &RecordRef) -> Result<Option<BTreeMap<String, String>>> {
        let args = record_args("get", record, &["-o", "json"]);
        let output = self
            .kubectl
            .run(&args, None, self.kubectl.timeout())
            .await?;
        if !output.success() {
            if is_not_found(&output.stderr) {
                return Ok(None);
            }
            anyhow::bail!(
                "kubectl get secret {record} failed: {}",
                output.stderr.trim()
            );
        }
        decode_secret(&output.stdout).map(Some)
    }

    async fn delete(&self, record: &RecordRef) -> Result<bool> {
        let args = record_args("delete", record, &[]);
        let output = self
            .kubectl
            .run(&args, None, self.kubectl.timeout())
            .await?;
        if output.success() {
            return Ok(true);
        }
        if is_not_found(&output.stderr) {
            return Ok(false);
        }
        anyhow::bail!(
            "kubectl delete secret {record} failed: {}",
            output.stderr.trim()
        )
    }
}

fn record_args(verb: &str, record: &RecordRef, extra: &[&str]) -> Vec<String> {
    let mut args = vec![
        verb.to_string(),
        "secret".to_string(),
        record.name.clone(),
        "-n".to_string(),
        record.namespace.clone(),
    ];
    args.extend(extra.iter().map(ToString::to_string));
    args
}

fn secret_manifest(record: &RecordRef, fields: &BTreeMap<String, String>) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": {
            "name": record.name,
            "namespace": record.namespace,
            "labels": { MANAGED_BY_LABEL: MANAGED_BY_VALUE },
        },
        "stringData": fields,
    })
}

fn decode_secret(raw: &str) -> Result<BTreeMap<String, String>> {
    let secret: SecretObject = serde_json::from_str(raw).context("Failed to parse secret JSON")?;
    secret
        .data
        .into_iter()
        .map(|(key, encoded)| {
            let bytes = STANDARD
                .decode(encoded.trim())
                .with_context(|| format!("Secret field {key} is not valid base64"))?;
            let value = String::from_utf8(bytes)
                .with_context(|| format!("Secret field {key} is not UTF-8"))?;
            Ok((key, value))
        })
        .collect()
}

fn is_already_exists(stderr: &str) -> bool {
    stderr.contains("AlreadyExists") || stderr.contains("already exists")
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_uses_string_data_and_label() {
        let record = RecordRef::new("openbao-bootstrap", "vault");
        let fields = BTreeMap::from([("root_token".to_string(), "s.root".to_string())]);
        let manifest = secret_manifest(&record, &fields);
        assert_eq!(manifest["metadata"]["name"], "openbao-bootstrap");
        assert_eq!(manifest["metadata"]["namespace"], "vault");
        assert_eq!(
            manifest["metadata"]["labels"]["app.kubernetes.io/managed-by"],
            "bao-bootstrap"
        );
        assert_eq!(manifest["stringData"]["root_token"], "s.root");
    }

    #[test]
    fn test_decode_secret_base64_fields() {
        let raw = r#"{"apiVersion":"v1","kind":"Secret","data":{"root_token":"cy5yb290","key_shares":"NQ=="}}"#;
        let fields = decode_secret(raw).unwrap();
        assert_eq!(fields["root_token"], "s.root");
        assert_eq!(fields["key_shares"], "5");
    }

    #[test]
    fn test_decode_secret_rejects_bad_base64() {
        let raw = r#"{"data":{"root_token":"***"}}"#;
        let err = decode_secret(raw).unwrap_err();
        assert!(err.to_string().contains("root_token"));
    }

    #[test]
    fn test_record_args() {
        let record = RecordRef::new("openbao-bootstrap", "vault");
        assert_eq!(
            record_args("get", &record, &["-o", "json"]),
            vec!["get", "secret", "openbao-bootstrap", "-n", "vault", "-o", "json"]
        );
    }

    #[test]
    fn test_error_markers() {
        assert!(is_already_exists(
            "Error from server (AlreadyExists): secrets \"openbao-bootstrap\" already exists"
        ));
        assert!(is_not_found(
            "Error from server (NotFound): secrets \"openbao-bootstrap\" not found"
        ));
        assert!(!is_not_found("Unable to connect to the server"));
    }
}
