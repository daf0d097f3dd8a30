use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use komerci_gateway::config::load_settings;
use komerci_gateway::mailer::{LogMailer, Mailer, WebhookMailer};
use komerci_gateway::observe::GatewayMetrics;
use komerci_gateway::store::{HttpOrderStore, InMemoryOrderStore, OrderStore};
use komerci_gateway::{build_router, AppState, KomerciGateway};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    let http_client = reqwest::Client::builder()
        .timeout(settings.host_timeout)
        .build()
        .context("failed to build host HTTP client")?;

    let store: Arc<dyn OrderStore> = match &settings.host_store_url {
        Some(url) => {
            info!(host_store_url = %url, "Using host order store");
            Arc::new(HttpOrderStore::new(http_client.clone(), url.clone()))
        }
        None => {
            warn!("HOST_STORE_URL not set; using in-memory order store (development only)");
            Arc::new(InMemoryOrderStore::new())
        }
    };
    let mailer: Arc<dyn Mailer> = match &settings.mail.webhook_url {
        Some(url) => Arc::new(WebhookMailer::new(
            http_client.clone(),
            url.clone(),
            settings.mail.webhook_bearer.clone(),
            settings.mail.admin_address.clone(),
        )),
        None => Arc::new(LogMailer),
    };

    let metrics = GatewayMetrics::new().context("failed to register gateway metrics")?;
    let gateway = KomerciGateway::from_settings(&settings, store.clone(), mailer, metrics)
        .context("failed to initialise Komerci gateway")?;
    info!(
        enabled = gateway.config().enabled,
        debug = gateway.config().debug,
        prefix = %gateway.config().invoice_prefix,
        "Komerci gateway initialised"
    );

    let state = AppState {
        gateway: Arc::new(gateway),
        store,
        store_currency: settings.store_currency.clone(),
    };
    let app = build_router(state, &settings.allowed_origins);

    let addr = SocketAddr::new(settings.host.parse()?, settings.port);
    info!(%addr, "starting komerci-gateway");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
