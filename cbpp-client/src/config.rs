//! # Client Configuration
//!
//! Connection strings have the form
//! `scheme://host1[:port],host2/bucket?key=value&key=value`.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cbpp_engine::{CreateOptions, DEFAULT_BUCKET, MAX_REPLICAS};

use crate::error::ClientError;

pub const DEFAULT_CONNSTR: &str = "couchbase://localhost/default";
pub const ENV_CONNSTR: &str = "CBPP_CONNSTR";
pub const ENV_PASSWORD: &str = "CBPP_PASSWORD";

const SCHEMES: [&str; 2] = ["couchbase", "mem"];

/// Parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnSpec {
    pub scheme: String,
    pub hosts: Vec<String>,
    pub bucket: String,
    pub options: BTreeMap<String, String>,
}

impl ConnSpec {
    pub fn parse(connstr: &str) -> Result<Self, ClientError> {
        let invalid = |reason: &str| ClientError::InvalidConnstr {
            connstr: connstr.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = connstr.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if !SCHEMES.contains(&scheme) {
            return Err(invalid("unsupported scheme"));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let (hosts, bucket) = match location.split_once('/') {
            Some((hosts, bucket)) => (hosts, bucket),
            None => (location, ""),
        };
        if bucket.contains('/') {
            return Err(invalid("bucket name contains '/'"));
        }

        let mut parsed_hosts = Vec::new();
        for host in hosts.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            if let Some((_, port)) = host.rsplit_once(':') {
                port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
            }
            parsed_hosts.push(host.to_string());
        }
        if parsed_hosts.is_empty() {
            parsed_hosts.push("localhost".to_string());
        }

        let mut options = BTreeMap::new();
        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| invalid("option without value"))?;
            options.insert(key.to_string(), value.to_string());
        }

        Ok(ConnSpec {
            scheme: scheme.to_string(),
            hosts: parsed_hosts,
            bucket: if bucket.is_empty() { DEFAULT_BUCKET.to_string() } else { bucket.to_string() },
            options,
        })
    }

    fn numeric_option(&self, connstr: &str, key: &str) -> Result<Option<usize>, ClientError> {
        match self.options.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ClientError::InvalidConnstr {
                connstr: connstr.to_string(),
                reason: format!("option `{key}` must be a number"),
            }),
        }
    }
}

/// Settings used to open a `Client`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connstr: String,
    pub password: Option<String>,
    /// Overrides the `pool_threshold` connection-string option.
    pub pool_threshold: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connstr: DEFAULT_CONNSTR.to_string(),
            password: None,
            pool_threshold: None,
        }
    }
}

impl ClientConfig {
    pub fn new(connstr: impl Into<String>) -> Self {
        ClientConfig { connstr: connstr.into(), ..ClientConfig::default() }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Reads `CBPP_CONNSTR` and `CBPP_PASSWORD`.
    pub fn from_env() -> Self {
        ClientConfig {
            connstr: env::var(ENV_CONNSTR).unwrap_or_else(|_| DEFAULT_CONNSTR.to_string()),
            password: env::var(ENV_PASSWORD).ok().filter(|p| !p.is_empty()),
            pool_threshold: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn connspec(&self) -> Result<ConnSpec, ClientError> {
        ConnSpec::parse(&self.connstr)
    }

    /// Options for the in-memory instance described by this configuration.
    pub fn create_options(&self) -> Result<CreateOptions, ClientError> {
        let spec = self.connspec()?;
        let replicas = spec.numeric_option(&self.connstr, "replicas")?.unwrap_or(0);
        if replicas > MAX_REPLICAS {
            return Err(ClientError::InvalidConnstr {
                connstr: self.connstr.clone(),
                reason: format!("at most {MAX_REPLICAS} replicas are supported"),
            });
        }
        let defaults = CreateOptions::default();
        let pool_threshold = match self.pool_threshold {
            Some(threshold) => Some(threshold),
            None => spec
                .numeric_option(&self.connstr, "pool_threshold")?
                .or(defaults.pool_threshold),
        };
        Ok(CreateOptions {
            hosts: spec.hosts,
            bucket: spec.bucket,
            password: self.password.clone(),
            replicas,
            pool_threshold,
        })
    }
}
