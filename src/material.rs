use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

pub const FIELD_ROOT_TOKEN: &str = "root_token";
pub const FIELD_KEY_SHARES: &str = "key_shares";
pub const FIELD_KEY_THRESHOLD: &str = "key_threshold";
pub const FIELD_CREATED_AT: &str = "created_at";
const FIELD_UNSEAL_KEY_PREFIX: &str = "unseal_key_";

/// One-time output of cluster initialization.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapMaterial {
    pub root_token: String,
    pub key_shares: Vec<String>,
    pub key_share_count: u8,
    pub key_threshold: u8,
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for BootstrapMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapMaterial")
            .field("root_token", &"<redacted>")
            .field("key_shares", &format_args!("<{} redacted>", self.key_shares.len()))
            .field("key_share_count", &self.key_share_count)
            .field("key_threshold", &self.key_threshold)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl BootstrapMaterial {
    /// # Errors
    /// Returns an error unless `1 <= threshold <= share_count`.
    pub fn new(
        root_token: String,
        key_shares: Vec<String>,
        key_share_count: u8,
        key_threshold: u8,
        created_at: OffsetDateTime,
    ) -> Result<Self> {
        if key_threshold == 0 || key_threshold > key_share_count {
            anyhow::bail!(
                "key threshold {key_threshold} must be between 1 and the share count {key_share_count}"
            );
        }
        Ok(Self {
            root_token,
            key_shares,
            key_share_count,
            key_threshold,
            created_at: created_at.replace_nanosecond(0).unwrap_or(created_at),
        })
    }

    /// The deterministic share subset used for unsealing: the first
    /// `threshold` entries, or fewer if the record lost some.
    #[must_use]
    pub fn unseal_subset(&self) -> &[String] {
        let count = usize::from(self.key_threshold).min(self.key_shares.len());
        &self.key_shares[..count]
    }

    /// Encodes the material as flat string fields for a secret record.
    ///
    /// # Errors
    /// Returns an error if the timestamp cannot be formatted.
    pub fn to_fields(&self) -> Result<BTreeMap<String, String>> {
        let mut fields = BTreeMap::new();
        fields.insert(FIELD_ROOT_TOKEN.to_string(), self.root_token.clone());
        fields.insert(
            FIELD_KEY_SHARES.to_string(),
            self.key_share_count.to_string(),
        );
        fields.insert(
            FIELD_KEY_THRESHOLD.to_string(),
            self.key_threshold.to_string(),
        );
        fields.insert(
            FIELD_CREATED_AT.to_string(),
            self.created_at
                .format(&Rfc3339)
                .context("Failed to format created_at")?,
        );
        for (index, share) in self.key_shares.iter().enumerate() {
            fields.insert(format!("{FIELD_UNSEAL_KEY_PREFIX}{index}"), share.clone());
        }
        Ok(fields)
    }

    /// Decodes a secret record. Missing share fields are tolerated so a
    /// damaged record still yields whatever shares survived.
    ///
    /// # Errors
    /// Returns an error if a required field is missing or malformed.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let root_token = required(fields, FIELD_ROOT_TOKEN)?.to_string();
        if root_token.trim().is_empty() {
            anyhow::bail!("record field {FIELD_ROOT_TOKEN} is empty");
        }
        let key_share_count: u8 = required(fields, FIELD_KEY_SHARES)?
            .trim()
            .parse()
            .with_context(|| format!("record field {FIELD_KEY_SHARES} is not a number"))?;
        let key_threshold: u8 = required(fields, FIELD_KEY_THRESHOLD)?
            .trim()
            .parse()
            .with_context(|| format!("record field {FIELD_KEY_THRESHOLD} is not a number"))?;
        let created_at = OffsetDateTime::parse(required(fields, FIELD_CREATED_AT)?.trim(), &Rfc3339)
            .with_context(|| format!("record field {FIELD_CREATED_AT} is not RFC 3339"))?;

        let key_shares: Vec<String> = (0..key_share_count)
            .filter_map(|index| fields.get(&format!("{FIELD_UNSEAL_KEY_PREFIX}{index}")))
            .filter(|share| !share.trim().is_empty())
            .cloned()
            .collect();
        if key_shares.len() < usize::from(key_share_count) {
            warn!(
                "Bootstrap record holds {} of {} key shares",
                key_shares.len(),
                key_share_count
            );
        }

        Self::new(
            root_token,
            key_shares,
            key_share_count,
            key_threshold,
            created_at,
        )
    }
}

fn required<'a>(fields: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .with_context(|| format!("record field {key} is missing"))
}
