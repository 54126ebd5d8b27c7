//! TLS termination for the HTTPS listener.
//!
//! Two sources of certificates are supported: PEM files on disk, reloaded only on restart, and
//! ACME (Let's Encrypt) with the TLS-ALPN-01 challenge answered on the HTTPS listener itself.
//! ACME account keys and issued certificates are cached in a directory so restarts do not hit
//! the issuance rate limits.

use std::path::{Path, PathBuf};

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use futures::StreamExt;
use rustls_acme::{AcmeConfig, axum::AxumAcceptor, caches::DirCache};
use tracing::{error, info};

/// Load a certificate chain and private key from PEM files.
pub async fn load_pem_files(cert_path: &Path, key_path: &Path) -> anyhow::Result<RustlsConfig> {
    info!(cert = ?cert_path, key = ?key_path, "Using TLS certificate from disk");
    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .with_context(|| format!("Failed to load TLS certificate {} / key {}", cert_path.display(), key_path.display()))
}

/// ACME provisioning parameters.
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    pub domains: Vec<String>,
    pub cache_dir: PathBuf,
    pub contact: Vec<String>,
    pub production: bool,
}

impl AcmeSettings {
    /// `mailto:` URIs registered with the ACME account.
    pub fn contact_uris(&self) -> Vec<String> {
        self.contact
            .iter()
            .map(|email| {
                if email.starts_with("mailto:") {
                    email.clone()
                } else {
                    format!("mailto:{email}")
                }
            })
            .collect()
    }
}

/// Build an acceptor that obtains and renews certificates for `settings.domains`.
///
/// Spawns the task driving the ACME state machine; it runs for the life of the process and
/// logs every issuance event.
pub async fn acme_acceptor(settings: &AcmeSettings) -> anyhow::Result<AxumAcceptor> {
    tokio::fs::create_dir_all(&settings.cache_dir)
        .await
        .with_context(|| format!("Failed to create ACME cache directory {}", settings.cache_dir.display()))?;

    info!(
        domains = ?settings.domains,
        cache_dir = ?settings.cache_dir,
        production = settings.production,
        "Provisioning TLS certificates over ACME"
    );

    let mut state = AcmeConfig::new(settings.domains.clone())
        .contact(settings.contact_uris())
        .cache(DirCache::new(settings.cache_dir.clone()))
        .directory_lets_encrypt(settings.production)
        .state();
    let acceptor = state.axum_acceptor(state.default_rustls_config());

    tokio::spawn(async move {
        while let Some(event) = state.next().await {
            match event {
                Ok(ok) => info!("ACME event: {:?}", ok),
                Err(err) => error!("ACME error: {:?}", err),
            }
        }
    });

    Ok(acceptor)
}
