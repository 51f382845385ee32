use config::{ConfigBuilder, ConfigError, builder::DefaultState};

pub const DEFAULT_CONFIG_PATH: &str = "bao-bootstrap.toml";
pub(crate) const ENV_PREFIX: &str = "BAO_BOOTSTRAP";

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_STATEFULSET: &str = "openbao";
const DEFAULT_HEADLESS_SERVICE: &str = "openbao-internal";
const DEFAULT_API_SCHEME: &str = "http";
const DEFAULT_API_PORT: u16 = 8200;
const DEFAULT_FALLBACK_REPLICAS: u32 = 3;
const DEFAULT_TRANSPORT: &str = "exec";
const DEFAULT_CLI_BINARY: &str = "bao";
const DEFAULT_KUBECTL: &str = "kubectl";
const DEFAULT_KEY_SHARES: u8 = 5;
const DEFAULT_KEY_THRESHOLD: u8 = 3;
const DEFAULT_RECORD_NAME: &str = "openbao-bootstrap";
const DEFAULT_RECORD_BACKEND: &str = "kubernetes";
const DEFAULT_RECORD_FILE_DIR: &str = "/var/lib/bao-bootstrap";
const DEFAULT_FLEET_WAIT_SECS: u64 = 300;
const DEFAULT_POD_WAIT_SECS: u64 = 120;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_JOIN_SETTLE_SECS: u64 = 2;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_INITIAL_DELAY_SECS: u64 = 2;

pub(crate) fn apply_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("cluster.namespace", DEFAULT_NAMESPACE)?
        .set_default("cluster.statefulset", DEFAULT_STATEFULSET)?
        .set_default("cluster.headless_service", DEFAULT_HEADLESS_SERVICE)?
        .set_default("cluster.api_scheme", DEFAULT_API_SCHEME)?
        .set_default("cluster.api_port", DEFAULT_API_PORT)?
        .set_default("cluster.fallback_replicas", u64::from(DEFAULT_FALLBACK_REPLICAS))?
        .set_default("cluster.transport", DEFAULT_TRANSPORT)?
        .set_default("cluster.cli_binary", DEFAULT_CLI_BINARY)?
        .set_default("cluster.kubectl", DEFAULT_KUBECTL)?
        .set_default("init.key_shares", u64::from(DEFAULT_KEY_SHARES))?
        .set_default("init.key_threshold", u64::from(DEFAULT_KEY_THRESHOLD))?
        .set_default("record.name", DEFAULT_RECORD_NAME)?
        .set_default("record.backend", DEFAULT_RECORD_BACKEND)?
        .set_default("record.file_dir", DEFAULT_RECORD_FILE_DIR)?
        .set_default("timeouts.fleet_wait_secs", DEFAULT_FLEET_WAIT_SECS)?
        .set_default("timeouts.pod_wait_secs", DEFAULT_POD_WAIT_SECS)?
        .set_default("timeouts.poll_interval_secs", DEFAULT_POLL_INTERVAL_SECS)?
        .set_default(
            "timeouts.command_timeout_secs",
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?
        .set_default("timeouts.join_settle_secs", DEFAULT_JOIN_SETTLE_SECS)?
        .set_default("retry.max_attempts", u64::from(DEFAULT_RETRY_MAX_ATTEMPTS))?
        .set_default(
            "retry.initial_delay_secs",
            DEFAULT_RETRY_INITIAL_DELAY_SECS,
        )?
        .set_default("debug", false)
}
