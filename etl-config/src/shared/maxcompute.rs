use std::collections::{BTreeMap, BTreeSet};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{RetryConfig, ValidationError};

/// Configuration of the MaxCompute bulk output.
///
/// Contains credentials and therefore intentionally does not implement [`Serialize`]. Use
/// [`MaxComputeConfigWithoutSecrets`] when the configuration has to be logged or stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MaxComputeConfig {
    #[serde(default)]
    pub access_key_id: String,
    pub access_key_secret: SecretString,
    /// Endpoint of the metadata and statement service.
    #[serde(default = "default_odps_url")]
    pub odps_url: Option<String>,
    /// Endpoint of the upload tunnel.
    #[serde(default = "default_tunnel_url")]
    pub tunnel_url: Option<String>,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub table_name: String,
    /// Partition spec such as `pt='20240101',region='cn'`.
    #[serde(default)]
    pub partition: Option<String>,
    /// Whether to truncate the table, or drop the partition, before writing.
    #[serde(default)]
    pub overwrite: bool,
    /// Source column name to destination column name. Unmapped columns keep their name.
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,
    /// Size of the upload buffer. A block is flushed whenever it is reached.
    #[serde(default = "default_buffer_size_bytes")]
    pub buffer_size_bytes: usize,
    #[serde(default = "RetryConfig::statement_default")]
    pub statement_retry: RetryConfig,
    #[serde(default = "RetryConfig::write_default")]
    pub write_retry: RetryConfig,
    /// Interval between two status polls of a running statement.
    #[serde(default = "default_statement_poll_interval_ms")]
    pub statement_poll_interval_ms: u64,
}

impl MaxComputeConfig {
    pub const DEFAULT_ODPS_URL: &'static str =
        "http://service.ap-northeast-1.maxcompute.aliyun.com/api";

    pub const DEFAULT_TUNNEL_URL: &'static str = "http://dt.ap-northeast-1.maxcompute.aliyun.com";

    /// 64 MiB.
    pub const DEFAULT_BUFFER_SIZE_BYTES: usize = 64 * 1024 * 1024;

    pub const DEFAULT_STATEMENT_POLL_INTERVAL_MS: u64 = 1_000;

    /// Validates connection parameters and tuning knobs.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("access_key_id", &self.access_key_id)?;
        require_non_blank("access_key_secret", self.access_key_secret.expose_secret())?;
        require_non_blank("project_name", &self.project_name)?;
        require_non_blank("table_name", &self.table_name)?;
        require_non_blank("odps_url", self.odps_url.as_deref().unwrap_or_default())?;
        require_non_blank("tunnel_url", self.tunnel_url.as_deref().unwrap_or_default())?;

        if let Some(partition) = &self.partition
            && partition.trim().is_empty()
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "partition".to_string(),
                constraint: "must not be blank when set".to_string(),
            });
        }

        if self.buffer_size_bytes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "buffer_size_bytes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.statement_poll_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "statement_poll_interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.statement_retry.validate("statement_retry")?;
        self.write_retry.validate("write_retry")?;

        let mut destinations = BTreeSet::new();
        for (source, destination) in &self.column_mapping {
            if source.trim().is_empty() || destination.trim().is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: "column_mapping".to_string(),
                    constraint: "column names must not be blank".to_string(),
                });
            }

            if !destinations.insert(destination.to_lowercase()) {
                return Err(ValidationError::InvalidFieldValue {
                    field: "column_mapping".to_string(),
                    constraint: format!("destination column `{destination}` is mapped twice"),
                });
            }
        }

        Ok(())
    }

    /// Returns `project.table`.
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.project_name, self.table_name)
    }
}

impl Config for MaxComputeConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn require_non_blank(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }

    Ok(())
}

fn default_odps_url() -> Option<String> {
    Some(MaxComputeConfig::DEFAULT_ODPS_URL.to_string())
}

fn default_tunnel_url() -> Option<String> {
    Some(MaxComputeConfig::DEFAULT_TUNNEL_URL.to_string())
}

fn default_buffer_size_bytes() -> usize {
    MaxComputeConfig::DEFAULT_BUFFER_SIZE_BYTES
}

fn default_statement_poll_interval_ms() -> u64 {
    MaxComputeConfig::DEFAULT_STATEMENT_POLL_INTERVAL_MS
}

/// Same as [`MaxComputeConfig`] but without secrets. This type implements [`Serialize`] because
/// it does not contain secrets so is safe to serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MaxComputeConfigWithoutSecrets {
    pub access_key_id: String,
    pub odps_url: Option<String>,
    pub tunnel_url: Option<String>,
    pub project_name: String,
    pub table_name: String,
    pub partition: Option<String>,
    pub overwrite: bool,
    pub column_mapping: BTreeMap<String, String>,
    pub buffer_size_bytes: usize,
    pub statement_retry: RetryConfig,
    pub write_retry: RetryConfig,
    pub statement_poll_interval_ms: u64,
}

impl From<MaxComputeConfig> for MaxComputeConfigWithoutSecrets {
    fn from(value: MaxComputeConfig) -> Self {
        let MaxComputeConfig {
            access_key_id,
            access_key_secret: _,
            odps_url,
            tunnel_url,
            project_name,
            table_name,
            partition,
            overwrite,
            column_mapping,
            buffer_size_bytes,
            statement_retry,
            write_retry,
            statement_poll_interval_ms,
        } = value;

        Self {
            access_key_id,
            odps_url,
            tunnel_url,
            project_name,
            table_name,
            partition,
            overwrite,
            column_mapping,
            buffer_size_bytes,
            statement_retry,
            write_retry,
            statement_poll_interval_ms,
        }
    }
}
