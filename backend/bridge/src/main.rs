//! Oracle deployment bridge: entry point.
//!
//! Serves a small Axum API that takes oracle deployment requests, runs
//! them as chained transactions against the network and relays the
//! outcome.  `bridge deploy-factory <path>` instead deploys the oracle
//! factory contract once and exits.

mod api;
mod config;
mod errors;
mod oracle;
mod orchestrator;
mod plan;
mod poller;
mod rpc;
mod signer;
mod status;
mod validation;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use oracle::{DeployThenRegister, RegisterViaFactory};
use orchestrator::{DeploymentOrchestrator, PlanOutcome};
use rpc::{ChainClient, JsonRpcChainClient};
use signer::{LocalKey, SigningIdentity};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    let orchestrator = connect(&config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => serve(config, orchestrator, shutdown).await,
        [command, path] if command == "deploy-factory" => {
            deploy_factory(&orchestrator, &config, Path::new(path), &shutdown).await
        }
        _ => anyhow::bail!("usage: bridge [deploy-factory <contract-path>]"),
    }
}

/// Build the signer and the network client the orchestrator runs on.
fn connect(config: &Config) -> errors::Result<DeploymentOrchestrator<dyn ChainClient>> {
    let signer: Arc<dyn SigningIdentity> = Arc::new(LocalKey::from_hex(&config.signing_key)?);
    info!("Signing as {}", signer.address());

    // Every RPC call carries this transport timeout, independent of polling.
    let http = Client::builder().timeout(config.rpc_timeout).build()?;
    let client: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(http, &config.rpc_url));
    Ok(DeploymentOrchestrator::new(client, signer, config.polling))
}

async fn read_contract(path: &Path) -> errors::Result<Vec<u8>> {
    Ok(tokio::fs::read(path).await?)
}

async fn serve(
    config: Config,
    orchestrator: DeploymentOrchestrator<dyn ChainClient>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let deploy_then_register = match &config.oracle_contract_path {
        Some(path) => Some(DeployThenRegister {
            registry: config.registry_address.clone(),
            oracle_code: read_contract(path).await?,
        }),
        None => None,
    };

    let state = Arc::new(api::ApiState {
        orchestrator,
        register_via_factory: RegisterViaFactory {
            registry: config.registry_address.clone(),
        },
        deploy_then_register,
        registry_address: config.registry_address.clone(),
        run_deadline: config.run_deadline,
        shutdown: shutdown.clone(),
    });

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn deploy_factory(
    orchestrator: &DeploymentOrchestrator<dyn ChainClient>,
    config: &Config,
    path: &Path,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let code = read_contract(path).await?;
    let plan = oracle::factory_deployment(code, config.polling);

    match orchestrator.execute(&plan, shutdown).await {
        PlanOutcome::Done {
            output, receipts, ..
        } => {
            for record in &receipts {
                info!(hash = %record.transaction_hash, status = %record.receipt.status, "transaction receipt");
            }
            match output {
                Some(address) => info!("Deployed contract to address: {address}"),
                None => info!("Contract deployed"),
            }
            Ok(())
        }
        PlanOutcome::Failed { message, .. } => {
            error!("{message}");
            anyhow::bail!(message)
        }
    }
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
        shutdown.cancel();
    }
}
