//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` and can be changed with `-f` or the `FILEDROP_CONFIG` environment
//! variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - variables prefixed with `FILEDROP_` override YAML values
//!
//! Nested values use double underscores, e.g. `FILEDROP_AUTH__SECRET=...` or
//! `FILEDROP_TLS__MODE=disabled`.
//!
//! ## Example
//!
//! ```yaml
//! public_base_url: https://files.example.com
//! auth:
//!   secret: change-me
//! uploads:
//!   max_file_size: 52428800
//!   name_length: 5
//!   extension_policy: sanitized
//! storage:
//!   root: ./public
//! tls:
//!   mode: acme
//!   domains: [files.example.com, www.files.example.com]
//!   cache_dir: /var/www/.cache
//!   production: true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use url::Url;

use crate::sniff::{AllowList, DEFAULT_ALLOWED_TYPES, DEFAULT_SNIFF_LEN};

/// Longest identifier the generator may be asked for.
pub const MAX_NAME_LENGTH: usize = 64;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FILEDROP_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address to bind both listeners to
    pub host: String,
    /// Plaintext listener port. Redirects to HTTPS when TLS is enabled.
    pub http_port: u16,
    /// TLS listener port (ignored when `tls.mode` is `disabled`)
    pub https_port: u16,
    /// Prefix of the link returned for every upload, e.g. `https://files.example.com`
    pub public_base_url: String,
    /// Fixed seed for the identifier generator. Seeded from the clock when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
    pub auth: AuthConfig,
    pub uploads: UploadConfig,
    pub storage: StorageConfig,
    pub tls: TlsConfig,
    /// Serve a permanent redirect to HTTPS on the plaintext listener when TLS is enabled
    pub redirect_http: bool,
}

/// Shared-secret authentication for uploads.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// The value clients must send verbatim. Required.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// Header carrying the secret
    pub header_name: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("header_name", &self.header_name)
            .finish()
    }
}

/// How the stored name's extension is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionPolicy {
    /// Client filename's extension, unchanged
    Verbatim,
    /// Client filename's extension when it is short and alphanumeric, otherwise none
    Sanitized,
    /// Extension implied by the sniffed content type
    Detected,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Maximum upload size in bytes
    pub max_file_size: u64,
    /// Length of the random part of stored names
    pub name_length: usize,
    /// Number of leading bytes inspected to detect the content type
    pub sniff_len: usize,
    /// MIME types accepted for upload (compared without parameters)
    pub allowed_types: Vec<String>,
    pub extension_policy: ExtensionPolicy,
    /// Refuse to overwrite an existing file with a freshly generated name and draw a new one
    /// instead. Off by default: a colliding upload replaces the older file.
    pub reject_collisions: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Flat directory holding every uploaded file
    pub root: PathBuf,
}

/// TLS termination.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum TlsConfig {
    /// Plaintext only
    Disabled,
    /// Certificate and key read from PEM files
    Files { cert_path: PathBuf, key_path: PathBuf },
    /// Certificates provisioned automatically over ACME (TLS-ALPN-01)
    Acme {
        /// Host names certificates may be issued for
        domains: Vec<String>,
        /// Directory caching account keys and certificates across restarts
        #[serde(default = "default_acme_cache_dir")]
        cache_dir: PathBuf,
        /// Contact addresses registered with the ACME account (without `mailto:`)
        #[serde(default)]
        contact: Vec<String>,
        /// Use the Let's Encrypt production directory instead of staging
        #[serde(default = "default_acme_production")]
        production: bool,
    },
}

fn default_acme_cache_dir() -> PathBuf {
    PathBuf::from("/var/www/.cache")
}

fn default_acme_production() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 80,
            https_port: 443,
            public_base_url: "https://domain.com".to_string(),
            rng_seed: None,
            auth: AuthConfig::default(),
            uploads: UploadConfig::default(),
            storage: StorageConfig::default(),
            tls: TlsConfig::default(),
            redirect_http: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            header_name: "authorization".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            name_length: 5,
            sniff_len: DEFAULT_SNIFF_LEN,
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(|s| s.to_string()).collect(),
            extension_policy: ExtensionPolicy::Sanitized,
            reject_collisions: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./public"),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::Acme {
            domains: vec!["domain.com".to_string(), "www.domain.com".to_string()],
            cache_dir: default_acme_cache_dir(),
            contact: Vec::new(),
            production: default_acme_production(),
        }
    }
}

impl TlsConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TlsConfig::Disabled)
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.parse::<IpAddr>().is_err() {
            anyhow::bail!("Config validation: host '{}' is not an IP address", self.host);
        }

        match self.auth.secret.as_deref() {
            None | Some("") => anyhow::bail!(
                "Config validation: auth.secret is not configured. \
                 Set FILEDROP_AUTH__SECRET or add auth.secret to the config file."
            ),
            Some(_) => {}
        }

        if self.auth.header_name.parse::<axum::http::HeaderName>().is_err() {
            anyhow::bail!("Config validation: auth.header_name '{}' is not a valid header name", self.auth.header_name);
        }

        if self.uploads.max_file_size == 0 {
            anyhow::bail!("Config validation: uploads.max_file_size must be positive");
        }

        if self.uploads.name_length == 0 || self.uploads.name_length > MAX_NAME_LENGTH {
            anyhow::bail!(
                "Config validation: uploads.name_length ({}) must be between 1 and {MAX_NAME_LENGTH}",
                self.uploads.name_length
            );
        }

        if self.uploads.sniff_len == 0 {
            anyhow::bail!("Config validation: uploads.sniff_len must be positive (default: {DEFAULT_SNIFF_LEN})");
        }

        self.allow_list()
            .map_err(|e| anyhow::anyhow!("Config validation: invalid entry in uploads.allowed_types: {e}"))?;

        Url::parse(&self.public_base_url)
            .map_err(|e| anyhow::anyhow!("Config validation: public_base_url '{}' is not a URL: {e}", self.public_base_url))?;

        if let TlsConfig::Acme { domains, .. } = &self.tls
            && domains.is_empty()
        {
            anyhow::bail!("Config validation: tls.domains cannot be empty in acme mode");
        }

        if self.tls.is_enabled() && self.http_port == self.https_port {
            anyhow::bail!(
                "Config validation: http_port and https_port are both {} but TLS is enabled",
                self.http_port
            );
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // FILEDROP_CONFIG names the file itself
            .merge(Env::prefixed("FILEDROP_").ignore(&["config"]).split("__"))
    }

    /// The upload allow-list, failing on the first malformed entry.
    pub fn allow_list(&self) -> Result<AllowList, mime::FromStrError> {
        AllowList::parse(&self.uploads.allowed_types)
    }

    /// The link handed back for a stored file.
    pub fn public_url(&self, name: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), name)
    }

    pub fn http_bind_address(&self) -> anyhow::Result<SocketAddr> {
        Ok(SocketAddr::new(self.host.parse::<IpAddr>()?, self.http_port))
    }

    pub fn https_bind_address(&self) -> anyhow::Result<SocketAddr> {
        Ok(SocketAddr::new(self.host.parse::<IpAddr>()?, self.https_port))
    }
}
