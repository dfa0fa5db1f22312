//! Configuration for RPC endpoints.
//!
//! This module provides the endpoint descriptor used by the connection pool,
//! including URLs, weights for load balancing and optional labels for health
//! reports.

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

use crate::constants::DEFAULT_RPC_WEIGHT;
use crate::models::SenderError;

/// Descriptor for a single RPC endpoint.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RpcConfig {
    /// The RPC endpoint URL.
    pub url: String,
    /// The weight of this endpoint in the weighted round-robin selection.
    /// If not specified, a default weight of 1 is used.
    pub weight: Option<u32>,
    /// Human-readable label used as the key in health reports. Falls back
    /// to the URL when absent.
    pub label: Option<String>,
    /// WebSocket endpoint for signature subscriptions. Derived from `url`
    /// (`http` -> `ws`, `https` -> `wss`) when not provided.
    pub ws_url: Option<String>,
}

impl RpcConfig {
    /// Creates a new endpoint descriptor with the default weight (1).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: None,
            label: None,
            ws_url: None,
        }
    }

    /// Creates a new endpoint descriptor with the given weight.
    pub fn with_weight(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight: Some(weight),
            label: None,
            ws_url: None,
        }
    }

    /// Gets the weight of this endpoint, defaulting to 1 if not specified.
    pub fn get_weight(&self) -> u32 {
        self.weight.unwrap_or(DEFAULT_RPC_WEIGHT)
    }

    /// Gets the reporting label of this endpoint, falling back to its URL.
    pub fn get_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }

    /// Gets the WebSocket URL, deriving one from the HTTP URL when absent.
    pub fn get_ws_url(&self) -> Option<String> {
        if let Some(ws_url) = &self.ws_url {
            return Some(ws_url.clone());
        }
        if let Some(rest) = self.url.strip_prefix("https://") {
            return Some(format!("wss://{rest}"));
        }
        if let Some(rest) = self.url.strip_prefix("http://") {
            return Some(format!("ws://{rest}"));
        }
        None
    }

    /// Validates that a URL has an HTTP or HTTPS scheme.
    fn validate_url_scheme(url: &str) -> Result<(), SenderError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SenderError::Config(format!(
                "invalid URL scheme for {url}: only HTTP and HTTPS are supported"
            )));
        }
        Ok(())
    }

    /// Validates all URLs and weights in a slice of endpoint descriptors.
    ///
    /// Fails on the first invalid URL, on a zero weight, and on an empty
    /// list (the pool needs at least one endpoint).
    pub fn validate_list(configs: &[RpcConfig]) -> Result<(), SenderError> {
        if configs.is_empty() {
            return Err(SenderError::Config(
                "at least one RPC endpoint must be configured".to_string(),
            ));
        }
        for config in configs {
            Self::validate_url_scheme(&config.url)?;
            if config.get_weight() == 0 {
                return Err(SenderError::Config(format!(
                    "endpoint {} has zero weight",
                    config.url
                )));
            }
        }
        Ok(())
    }
}

impl From<&str> for RpcConfig {
    fn from(url: &str) -> Self {
        RpcConfig::new(url)
    }
}

impl<'de> Deserialize<'de> for RpcConfig {
    /// Accepts either a bare URL string or a full endpoint object, so
    /// configuration files can mix `"https://rpc.example.com"` with
    /// `{"url": "...", "weight": 3}`. Unknown keys are rejected.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RpcConfigHelper {
            url: String,
            weight: Option<u32>,
            label: Option<String>,
            ws_url: Option<String>,
        }

        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(url) => Ok(RpcConfig::new(url)),
            serde_json::Value::Object(_) => {
                let helper: RpcConfigHelper =
                    serde_json::from_value(value).map_err(DeError::custom)?;
                Ok(RpcConfig {
                    url: helper.url,
                    weight: helper.weight,
                    label: helper.label,
                    ws_url: helper.ws_url,
                })
            }
            _ => Err(DeError::custom(
                "endpoint must be a URL string or an RpcConfig object",
            )),
        }
    }
}
