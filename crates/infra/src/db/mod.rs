use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use obrolan_domain::ports::BoxFuture;
use obrolan_domain::ports::db::{StoreError, StoreProbe};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

pub async fn connect(config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&config.endpoint)
        .await
        .with_context(|| format!("connect surrealdb endpoint {}", config.endpoint))?;
    db.signin(Root {
        username: config.username.clone(),
        password: config.password.clone(),
    })
    .await
    .context("surreal root signin")?;
    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .with_context(|| format!("select {}/{}", config.namespace, config.database))?;
    tracing::info!(
        endpoint = %config.endpoint,
        namespace = %config.namespace,
        database = %config.database,
        "connected to surrealdb"
    );
    Ok(Arc::new(db))
}

#[derive(Debug, Clone)]
pub struct SurrealProbe {
    config: DbConfig,
}

impl SurrealProbe {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl StoreProbe for SurrealProbe {
    fn backend(&self) -> &'static str {
        "surrealdb"
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        let endpoint = self.config.endpoint.clone();
        Box::pin(async move {
            let address = socket_address(&endpoint)?;
            timeout(PROBE_TIMEOUT, TcpStream::connect(&address))
                .await
                .map_err(|_| StoreError::Unreachable(format!("connect to {address} timed out")))?
                .map_err(|err| StoreError::Unreachable(format!("connect to {address}: {err}")))?;
            tracing::debug!(%address, "surreal probe succeeded");
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryProbe;

impl StoreProbe for MemoryProbe {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }
}

fn socket_address(endpoint: &str) -> Result<String, StoreError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let parsed = Url::parse(&normalized)
        .map_err(|err| StoreError::Rejected(format!("invalid endpoint '{endpoint}': {err}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| StoreError::Rejected(format!("endpoint '{endpoint}' has no host")))?;
    let port = match parsed.port() {
        Some(port) => port,
        None if matches!(parsed.scheme(), "wss" | "https") => 443,
        None => 8000,
    };
    Ok(format!("{host}:{port}"))
}
