use anyhow::Result;

use super::{Settings, StoreBackend};

pub(crate) fn validate_settings(settings: &Settings) -> Result<()> {
    validate_name(&settings.cluster.namespace, "cluster.namespace")?;
    validate_name(&settings.cluster.statefulset, "cluster.statefulset")?;
    validate_name(&settings.cluster.headless_service, "cluster.headless_service")?;
    if !matches!(settings.cluster.api_scheme.as_str(), "http" | "https") {
        anyhow::bail!("cluster.api_scheme must be http or https");
    }
    if settings.cluster.api_port == 0 {
        anyhow::bail!("cluster.api_port must be greater than 0");
    }
    if settings.cluster.replicas == Some(0) {
        anyhow::bail!("cluster.replicas must be greater than 0");
    }
    if settings.cluster.fallback_replicas == 0 {
        anyhow::bail!("cluster.fallback_replicas must be greater than 0");
    }
    if settings.cluster.cli_binary.trim().is_empty() {
        anyhow::bail!("cluster.cli_binary must not be empty");
    }
    if settings.cluster.kubectl.trim().is_empty() {
        anyhow::bail!("cluster.kubectl must not be empty");
    }

    if settings.init.key_shares == 0 {
        anyhow::bail!("init.key_shares must be greater than 0");
    }
    if settings.init.key_threshold == 0 {
        anyhow::bail!("init.key_threshold must be greater than 0");
    }
    if settings.init.key_threshold > settings.init.key_shares {
        anyhow::bail!(
            "init.key_threshold ({}) must be <= init.key_shares ({})",
            settings.init.key_threshold,
            settings.init.key_shares
        );
    }

    validate_name(&settings.record.name, "record.name")?;
    if let Some(namespace) = &settings.record.namespace {
        validate_name(namespace, "record.namespace")?;
    }
    if settings.record.backend == StoreBackend::File
        && settings.record.file_dir.as_os_str().is_empty()
    {
        anyhow::bail!("record.file_dir must not be empty for the file backend");
    }

    if settings.timeouts.command_timeout_secs == 0 {
        anyhow::bail!("timeouts.command_timeout_secs must be greater than 0");
    }
    if settings.timeouts.poll_interval_secs == 0 {
        anyhow::bail!("timeouts.poll_interval_secs must be greater than 0");
    }
    if settings.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be greater than 0");
    }
    Ok(())
}

/// Names end up in pod names, secret names and file names.
fn validate_name(value: &str, label: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{label} must not be empty");
    }
    if !value
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '.')
    {
        anyhow::bail!("{label} must contain only lowercase letters, digits, '-' or '.'");
    }
    if value.chars().all(|ch| ch == '.') {
        anyhow::bail!("{label} must not consist of dots only");
    }
    Ok(())
}
