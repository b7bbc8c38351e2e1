/*
 *  Copyright 2025-2026 Mercato Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use mercato::handler::InMemoryLinkStore;
use mercato::transport::{DirectTransport, RelayTransport, StaticTokenProvider, TransportRegistry};
use mercato::{ActionRegistry, Database, Marketplace, Processor, TenantContext, DAL};

use mercato_server::config::ServerConfig;
use mercato_server::relay::HttpRelayChannel;
use mercato_server::routes::router;
use mercato_server::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "mercato-server", about = "Marketplace orchestration API server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database URL, overriding the config file.
    #[arg(long)]
    database_url: Option<String>,

    /// Listen address, overriding the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let database = Database::new(
        &config.database.url,
        &config.database.name,
        config.database.max_connections,
    );
    database
        .run_migrations()
        .await
        .map_err(anyhow::Error::msg)
        .context("running database migrations")?;
    let dal = DAL::new(database);

    let core_config = config.core_config();
    let transports = build_transports(&config)?;
    let registry = Arc::new(ActionRegistry::builtin().clone());
    let processor = Processor::new(
        dal.clone(),
        registry.clone(),
        transports,
        Arc::new(InMemoryLinkStore::new()),
        core_config.clone(),
    );

    let tenants = worker_tenants(&config)?;
    if tenants.is_empty() {
        warn!("no worker tenants configured, jobs will queue but never run");
    }
    tokio::spawn(worker_loop(processor, tenants));

    let state = AppState::new(dal, registry, core_config);
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(bind = %config.server.bind, "mercato-server listening");
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}

fn build_transports(config: &ServerConfig) -> anyhow::Result<TransportRegistry> {
    let core = config.core_config();
    let channel = HttpRelayChannel::new(&config.relay.url)
        .map_err(|e| anyhow::anyhow!("relay configuration: {}", e))?;

    let mut tokens = StaticTokenProvider::new();
    for entry in &config.credentials {
        tokens = tokens.with_token(entry.tenant.clone(), entry.marketplace, entry.token.clone());
    }
    let tokens: Arc<StaticTokenProvider> = Arc::new(tokens);

    let ebay_base = Url::parse(&config.marketplaces.ebay_base_url)
        .context("parsing marketplaces.ebay_base_url")?;
    let etsy_base = Url::parse(&config.marketplaces.etsy_base_url)
        .context("parsing marketplaces.etsy_base_url")?;

    Ok(TransportRegistry::new()
        .with(
            Marketplace::Vinted,
            Arc::new(RelayTransport::new(Arc::new(channel), core.relay_timeout)),
        )
        .with(
            Marketplace::Ebay,
            Arc::new(DirectTransport::new(
                Marketplace::Ebay,
                ebay_base,
                tokens.clone(),
                core.direct_timeout,
            )),
        )
        .with(
            Marketplace::Etsy,
            Arc::new(DirectTransport::new(
                Marketplace::Etsy,
                etsy_base,
                tokens,
                core.direct_timeout,
            )),
        ))
}

fn worker_tenants(config: &ServerConfig) -> anyhow::Result<Vec<TenantContext>> {
    config
        .worker
        .tenants
        .iter()
        .map(|id| {
            TenantContext::new(id.as_str())
                .with_context(|| format!("invalid worker tenant '{}'", id))
        })
        .collect()
}

/// Claims and runs Jobs for every configured tenant, interleaved with
/// expiry and stall maintenance.
async fn worker_loop(processor: Processor, tenants: Vec<TenantContext>) {
    let poll_interval = processor.config().poll_interval;
    info!(tenants = tenants.len(), ?poll_interval, "worker loop started");
    loop {
        for tenant in &tenants {
            if let Err(e) = processor.run_maintenance(tenant).await {
                error!(tenant = %tenant, error = %e, "maintenance pass failed");
            }
            match processor.drain(tenant).await {
                Ok(reports) if !reports.is_empty() => {
                    info!(tenant = %tenant, processed = reports.len(), "drained pending jobs");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(tenant = %tenant, error = %e, "drain failed");
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}
