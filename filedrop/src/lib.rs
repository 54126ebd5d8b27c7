//! # filedrop: a small self-hosted file drop
//!
//! `filedrop` accepts authenticated multipart uploads, classifies each upload from its leading
//! bytes, stores it under a short random name in a flat directory and hands back a public link.
//! Stored files are served back to anyone who knows the name.
//!
//! ## Routes
//!
//! | Route               | Handler                                   |
//! |---------------------|-------------------------------------------|
//! | `GET /`             | embedded landing page                     |
//! | `GET /favicon.ico`  | embedded icon                             |
//! | `POST /upload`      | [`api::handlers::uploads::upload`]        |
//! | `GET /{id}`         | [`api::handlers::files::serve_file`]      |
//!
//! With TLS enabled the plaintext listener only redirects to HTTPS (see [`filters`]), and
//! certificates come from disk or from ACME (see [`tls`]).
//!
//! ## Components
//!
//! - [`ids`]: random names from a 62-symbol alphabet
//! - [`sniff`]: content type detection and the upload allow-list
//! - [`storage`]: the storage directory
//! - [`auth`]: shared-secret check for uploads
//! - [`config`]: YAML + environment configuration
//!
//! ## Example
//!
//! ```no_run
//! use filedrop::{Application, Config};
//!
//! # async fn example(config: Config) -> anyhow::Result<()> {
//! let app = Application::new(config).await?;
//! app.serve(async {
//!     tokio::signal::ctrl_c().await.ok();
//! })
//! .await
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod filters;
pub mod ids;
pub mod sniff;
mod static_assets;
pub mod storage;
pub mod telemetry;
pub mod tls;

#[cfg(test)]
mod test;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use axum_server::Handle;
use bon::Builder;
pub use config::Config;
use tracing::{debug, info, instrument};

use crate::{
    api::handlers::{files, static_assets as assets, uploads},
    config::TlsConfig,
    ids::{IdGenerator, SeededGenerator},
    sniff::AllowList,
    storage::LocalStore,
    tls::AcmeSettings,
};

/// Time in-flight requests get to finish after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(Arc::new(config))
///     .ids(Arc::new(SeededGenerator::from_time()))
///     .store(LocalStore::new("./public"))
///     .allow_list(Arc::new(AllowList::default()))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ids: Arc<dyn IdGenerator>,
    pub store: LocalStore,
    pub allow_list: Arc<AllowList>,
}

/// Build the application router: the route table wrapped in the request filters.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> Router {
    let upload_limit = uploads::body_limit(state.config.uploads.max_file_size);
    debug!(upload_limit, "Upload body limit");

    let router = Router::new()
        .route("/", get(assets::index))
        .route("/favicon.ico", get(assets::favicon))
        .route("/upload", post(uploads::upload).layer(DefaultBodyLimit::max(upload_limit)))
        .route("/{id}", get(files::serve_file))
        .with_state(state);

    filters::apply(router)
}

/// Main application struct that owns the router and configuration.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] prepares the storage directory, seeds the identifier
///    generator and builds the router
/// 2. **Serve**: [`Application::serve`] binds the listeners the TLS mode calls for
/// 3. **Shutdown**: when the shutdown future resolves, listeners stop accepting and in-flight
///    requests get [`SHUTDOWN_GRACE`] to complete
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting filedrop with configuration: {:#?}", config);

        let store = LocalStore::new(&config.storage.root);
        store
            .ensure_root()
            .await
            .with_context(|| format!("Failed to create storage root {}", config.storage.root.display()))?;

        let allow_list = config.allow_list().context("Invalid uploads.allowed_types")?;

        if config.rng_seed.is_some() {
            info!("Identifier generator uses a fixed seed; generated names are predictable");
        }
        let ids: Arc<dyn IdGenerator> = Arc::new(SeededGenerator::from_optional_seed(config.rng_seed));

        let state = AppState::builder()
            .config(Arc::new(config.clone()))
            .ids(ids)
            .store(store)
            .allow_list(Arc::new(allow_list))
            .build();

        let router = build_router(state);

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown.await;
                info!("Draining connections...");
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            }
        });

        let http_addr = self.config.http_bind_address()?;

        match &self.config.tls {
            TlsConfig::Disabled => {
                info!("filedrop listening on http://{} (TLS disabled)", http_addr);
                axum_server::bind(http_addr)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
            TlsConfig::Files { cert_path, key_path } => {
                let https_addr = self.config.https_bind_address()?;
                let rustls = tls::load_pem_files(cert_path, key_path).await?;
                info!("filedrop listening on https://{}", https_addr);

                let https = axum_server::bind_rustls(https_addr, rustls)
                    .handle(handle.clone())
                    .serve(self.router.clone().into_make_service());
                let http = self.serve_plaintext(http_addr, handle);
                tokio::try_join!(https, http)?;
            }
            TlsConfig::Acme {
                domains,
                cache_dir,
                contact,
                production,
            } => {
                let https_addr = self.config.https_bind_address()?;
                let settings = AcmeSettings {
                    domains: domains.clone(),
                    cache_dir: cache_dir.clone(),
                    contact: contact.clone(),
                    production: *production,
                };
                let acceptor = tls::acme_acceptor(&settings).await?;
                info!("filedrop listening on https://{} for {:?}", https_addr, domains);

                let https = axum_server::bind(https_addr)
                    .acceptor(acceptor)
                    .handle(handle.clone())
                    .serve(self.router.clone().into_make_service());
                let http = self.serve_plaintext(http_addr, handle);
                tokio::try_join!(https, http)?;
            }
        }

        info!("filedrop stopped");
        Ok(())
    }

    /// The plaintext listener next to an HTTPS one: a redirect, or the application itself when
    /// `redirect_http` is off.
    async fn serve_plaintext(&self, addr: SocketAddr, handle: Handle) -> std::io::Result<()> {
        let router = if self.config.redirect_http {
            info!("Redirecting http://{} to HTTPS port {}", addr, self.config.https_port);
            filters::https_redirect_router(self.config.https_port)
        } else {
            info!("Also serving plaintext on http://{}", addr);
            self.router.clone()
        };

        axum_server::bind(addr).handle(handle).serve(router.into_make_service()).await
    }
}
