use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Spaces configuration: endpoint plus credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacesConfig {
    /// Space endpoint URL, e.g. https://my-space.nyc3.digitaloceanspaces.com
    pub endpoint: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Region the Space lives in (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Optional STS security token, signed along with the request when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_token: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl SpacesConfig {
    /// Create a configuration from its parts
    pub fn new(endpoint: impl Into<String>, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint.into()),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            security_token: None,
        }
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the security token
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(token.into());
        self
    }
}

/// Endpoints are stored without a trailing slash so URL building can
/// concatenate unconditionally.
fn normalize_endpoint(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<SpacesConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let mut config: SpacesConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    config.endpoint = normalize_endpoint(config.endpoint);
    Ok(config)
}

/// Load configuration from environment variables
///
/// Supports both Spaces-specific variables and AWS standard names:
/// - SPACES_ENDPOINT (required)
/// - SPACES_KEY / AWS_ACCESS_KEY_ID
/// - SPACES_SECRET / AWS_SECRET_ACCESS_KEY
/// - SPACES_REGION / AWS_REGION (optional, defaults to us-east-1)
/// - SPACES_SECURITY_TOKEN (optional)
pub fn load_from_env() -> Result<SpacesConfig> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let endpoint = std::env::var("SPACES_ENDPOINT")
        .context("SPACES_ENDPOINT environment variable not set")?;

    let access_key = std::env::var("SPACES_KEY")
        .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
        .context("Neither SPACES_KEY nor AWS_ACCESS_KEY_ID environment variable is set")?;

    let secret_key = std::env::var("SPACES_SECRET")
        .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
        .context("Neither SPACES_SECRET nor AWS_SECRET_ACCESS_KEY environment variable is set")?;

    let region = std::env::var("SPACES_REGION")
        .or_else(|_| std::env::var("AWS_REGION"))
        .unwrap_or_else(|_| default_region());

    let security_token = std::env::var("SPACES_SECURITY_TOKEN").ok();

    Ok(SpacesConfig {
        endpoint: normalize_endpoint(endpoint),
        access_key,
        secret_key,
        region,
        security_token,
    })
}

/// Load configuration from file or environment
///
/// Tries the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<SpacesConfig> {
    if let Some(path) = config_path {
        load_from_yaml(path)
    } else {
        load_from_env()
    }
}
