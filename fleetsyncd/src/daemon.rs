use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use fleetsync_core::FirebaseClient;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::http_api;
use crate::logging::LogFormat;
use crate::sync::backoff::Backoff;
use crate::sync::engine::{PassReport, SyncEngine};
use crate::sync::entities::{EntityKind, SyncConfigs};
use crate::sync::firebase_feed::{FirebaseFeed, MAX_RECONNECT_DELAY};
use crate::sync::image::ImageUrlValidator;
use crate::sync::store::{SqliteStore, default_database_url};

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_IMAGE_CHECK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_STREAM_RETRY_MS: u64 = 1000;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub firebase_url: String,
    pub firebase_auth: Option<String>,
    pub database_url: String,
    pub http_addr: SocketAddr,
    pub image_check_timeout: Duration,
    pub enable_realtime: bool,
    pub sync_on_start: bool,
    pub stream_retry: Duration,
    pub eligibility_fields: Vec<(EntityKind, String)>,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&|name: &str| std::env::var(name).ok())
    }

    fn from_lookup(env: EnvLookup<'_>) -> anyhow::Result<Self> {
        let firebase_url = read_string_env(env, "FIREBASE_DATABASE_URL")
            .context("FIREBASE_DATABASE_URL is not set")?;
        let firebase_auth = read_string_env(env, "FIREBASE_AUTH_TOKEN");
        let database_url = match read_string_env(env, "FLEETSYNC_DATABASE_URL") {
            Some(url) => url,
            None => default_database_url().context("failed to resolve default database path")?,
        };
        let http_addr = read_string_env(env, "FLEETSYNC_HTTP_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr = http_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid FLEETSYNC_HTTP_ADDR: {http_addr}"))?;
        let image_check_timeout = Duration::from_secs(read_u64_env(
            env,
            "FLEETSYNC_IMAGE_CHECK_TIMEOUT_SECS",
            DEFAULT_IMAGE_CHECK_TIMEOUT_SECS,
        ));
        let stream_retry = Duration::from_millis(read_u64_env(
            env,
            "FLEETSYNC_STREAM_RETRY_MS",
            DEFAULT_STREAM_RETRY_MS,
        ));
        let log_format = match read_string_env(env, "FLEETSYNC_LOG_FORMAT") {
            Some(value) => LogFormat::parse(&value)
                .with_context(|| format!("invalid FLEETSYNC_LOG_FORMAT: {value}"))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            firebase_url,
            firebase_auth,
            database_url,
            http_addr,
            image_check_timeout,
            enable_realtime: read_bool_env(env, "FLEETSYNC_ENABLE_REALTIME", true),
            sync_on_start: read_bool_env(env, "FLEETSYNC_SYNC_ON_START", true),
            stream_retry,
            eligibility_fields: eligibility_overrides(env),
            log_format,
        })
    }

    fn sync_configs(&self) -> SyncConfigs {
        let mut configs = SyncConfigs::default();
        for (kind, field) in &self.eligibility_fields {
            configs.set_eligibility_field(*kind, field);
        }
        configs
    }
}

type Engine = SyncEngine<FirebaseFeed, SqliteStore>;

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<Engine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let mut client =
            FirebaseClient::new(&config.firebase_url).context("invalid FIREBASE_DATABASE_URL")?;
        if let Some(token) = &config.firebase_auth {
            client = client.with_auth(token.clone());
        }
        let feed = FirebaseFeed::new(client).with_backoff(Backoff::new(
            config.stream_retry,
            MAX_RECONNECT_DELAY,
            true,
        ));
        let store = SqliteStore::new(&config.database_url)
            .await
            .with_context(|| format!("failed to open store at {}", config.database_url))?;

        let engine = SyncEngine::new(Arc::new(feed), Arc::new(store))
            .with_configs(config.sync_configs())
            .with_image_validator(ImageUrlValidator::with_timeout(config.image_check_timeout));

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            firebase = %self.config.firebase_url,
            database = %self.config.database_url,
            realtime = self.config.enable_realtime,
            "fleetsyncd started"
        );

        if self.config.sync_on_start {
            match self.engine.sync_all().await {
                Ok(reports) => log_reports(&reports),
                Err(err) => warn!(error = %err, "initial sync failed; continuing"),
            }
        }

        let mut realtime = if self.config.enable_realtime {
            let handle = self
                .engine
                .start_realtime_sync()
                .await
                .context("failed to start realtime sync")?;
            info!(kinds = ?handle.kinds(), "realtime sync started");
            Some(handle)
        } else {
            None
        };

        let listener = TcpListener::bind(self.config.http_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.http_addr))?;
        info!(addr = %self.config.http_addr, "sync trigger listening");

        let server = axum::serve(listener, http_api::router(Arc::clone(&self.engine)))
            .with_graceful_shutdown(shutdown_signal())
            .into_future();
        let served = match realtime.as_mut() {
            Some(handle) => tokio::select! {
                served = server => served.context("http server failed"),
                kind = handle.closed() => Err(anyhow!("realtime listener for {kind} stopped")),
            },
            None => server.await.context("http server failed"),
        };

        if let Some(handle) = realtime {
            handle.shutdown();
        }
        if let Err(err) = &served {
            error!(error = %err, "fleetsyncd stopped with error");
        } else {
            info!("fleetsyncd stopped");
        }
        served
    }

    pub async fn run_once(self) -> anyhow::Result<Vec<PassReport>> {
        let reports = self.engine.sync_all().await.context("sync failed")?;
        log_reports(&reports);
        Ok(reports)
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
