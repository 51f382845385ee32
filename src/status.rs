//! Parsing of replica status replies.
//!
//! A sealed server answers status queries differently across versions: some
//! print the full JSON document, some print the key/value table even when
//! asked for JSON, and some only print an error sentence. The parser accepts
//! all three and keeps what it could not determine as [`TriState::Unknown`].

use serde::Deserialize;
use serde_json::Value;

const EXIT_OK: i32 = 0;
const EXIT_SEALED: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    True,
    False,
    #[default]
    Unknown,
}

impl TriState {
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }

    #[must_use]
    pub fn is_true(self) -> bool {
        self == Self::True
    }

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    fn or(self, other: Self) -> Self {
        if self.is_known() { self } else { other }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaMode {
    Active,
    Standby,
    #[default]
    Unknown,
}

impl HaMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "standby" | "perfstandby" => Self::Standby,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusReport {
    pub initialized: TriState,
    pub sealed: TriState,
    pub ha_mode: HaMode,
    pub threshold: Option<u32>,
    pub shares: Option<u32>,
    pub progress: Option<u32>,
}

impl StatusReport {
    /// Whether the reply carried enough information to act on.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.sealed.is_known()
    }

    fn merge(self, other: Self) -> Self {
        Self {
            initialized: self.initialized.or(other.initialized),
            sealed: self.sealed.or(other.sealed),
            ha_mode: if self.ha_mode == HaMode::Unknown {
                other.ha_mode
            } else {
                self.ha_mode
            },
            threshold: self.threshold.or(other.threshold),
            shares: self.shares.or(other.shares),
            progress: self.progress.or(other.progress),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    initialized: Option<bool>,
    #[serde(default)]
    sealed: Option<bool>,
    #[serde(default)]
    ha_mode: Option<String>,
    #[serde(default)]
    is_self: Option<bool>,
    #[serde(default)]
    t: Option<u32>,
    #[serde(default)]
    n: Option<u32>,
    #[serde(default)]
    progress: Option<u32>,
}

impl From<StatusDocument> for StatusReport {
    fn from(doc: StatusDocument) -> Self {
        let ha_mode = match (doc.ha_mode.as_deref(), doc.is_self) {
            (Some(mode), _) => HaMode::parse(mode),
            (None, Some(true)) => HaMode::Active,
            (None, Some(false)) => HaMode::Standby,
            (None, None) => HaMode::Unknown,
        };
        Self {
            initialized: doc.initialized.map_or(TriState::Unknown, TriState::from_bool),
            sealed: doc.sealed.map_or(TriState::Unknown, TriState::from_bool),
            ha_mode,
            threshold: doc.t,
            shares: doc.n,
            progress: doc.progress,
        }
    }
}

/// Parses the output of a status (or unseal) command.
///
/// Returns `None` when neither the structured nor the text form carried a
/// recognizable marker.
#[must_use]
pub fn parse_status(stdout: &str, stderr: &str, exit_code: Option<i32>) -> Option<StatusReport> {
    let structured = parse_json_status(stdout).unwrap_or_default();
    let mut report = structured
        .merge(parse_text_status(stdout))
        .merge(parse_text_status(stderr));

    // `status` exits 2 exactly when the server is sealed.
    if !report.sealed.is_known() {
        report.sealed = match exit_code {
            Some(EXIT_SEALED) => TriState::True,
            Some(EXIT_OK) if report.initialized.is_known() => TriState::False,
            _ => TriState::Unknown,
        };
    }

    if report == StatusReport::default() {
        None
    } else {
        Some(report)
    }
}

/// Parses a JSON status document, tolerating text around the object.
#[must_use]
pub fn parse_json_status(raw: &str) -> Option<StatusReport> {
    let value = extract_json(raw)?;
    let doc: StatusDocument = serde_json::from_value(value).ok()?;
    Some(doc.into())
}

pub(crate) fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && value.is_object()
    {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Parses the key/value table and the free-text markers of a status reply.
#[must_use]
pub fn parse_text_status(raw: &str) -> StatusReport {
    let mut report = StatusReport::default();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = row_value(line, "Initialized") {
            report.initialized = report.initialized.or(parse_flag(value));
        } else if let Some(value) = row_value(line, "Sealed") {
            report.sealed = report.sealed.or(parse_flag(value));
        } else if let Some(value) = row_value(line, "HA Mode") {
            if report.ha_mode == HaMode::Unknown {
                report.ha_mode = HaMode::parse(value);
            }
        } else if let Some(value) = row_value(line, "Total Shares") {
            report.shares = report.shares.or_else(|| value.parse().ok());
        } else if let Some(value) = row_value(line, "Threshold") {
            report.threshold = report.threshold.or_else(|| value.parse().ok());
        } else if let Some(value) = row_value(line, "Unseal Progress") {
            let (done, total) = value.split_once('/').unwrap_or((value, ""));
            report.progress = report.progress.or_else(|| done.trim().parse().ok());
            report.threshold = report.threshold.or_else(|| total.trim().parse().ok());
        } else if lower.contains("not yet initialized") || lower.contains("not initialized") {
            report.initialized = report.initialized.or(TriState::False);
        } else if lower.contains("is sealed") {
            report.sealed = report.sealed.or(TriState::True);
        } else if lower.contains("is unsealed") {
            report.sealed = report.sealed.or(TriState::False);
        }
    }
    report
}

fn row_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let value = rest.trim();
    (!value.is_empty()).then_some(value)
}

fn parse_flag(value: &str) -> TriState {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" => TriState::True,
        "false" | "no" => TriState::False,
        _ => TriState::Unknown,
    }
}
