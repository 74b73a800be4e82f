use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use siacoin_promoter::accounts::AccountsClient;
use siacoin_promoter::api::{self, ApiState};
use siacoin_promoter::billing::HttpBillingClient;
use siacoin_promoter::config::Config;
use siacoin_promoter::promoter::Promoter;
use siacoin_promoter::skyd::{SkydClient, WalletClient};
use siacoin_promoter::store::{Store, DB_NAME};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How long the shutdown path waits for background tasks to drain before
/// killing them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("caught stop signal, shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Parse env vars.
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(profile = ?config.profile, "starting siacoin-promoter");

    // Connect to the database.
    let store = Store::connect(
        &config.db_uri,
        &config.db_user,
        &config.db_password,
        DB_NAME,
    )
    .await?;
    info!("connected to database");

    // Connect to skyd and make sure it is usable before serving anything.
    let skyd = Arc::new(SkydClient::new(
        &config.skyd_addr,
        &config.skyd_user_agent,
        &config.skyd_password,
    ));
    skyd.ready().await?;
    info!(addr = %config.skyd_addr, "connected to skyd");

    let billing = Arc::new(HttpBillingClient::new(&config.billing_addr));
    let accounts = Arc::new(AccountsClient::new(&config.accounts_addr));

    // Root cancellation scope of the process. The promoter's tasks run under
    // a child scope so cancelling the root tears everything down.
    let shutdown = CancellationToken::new();
    let promoter = Promoter::new(
        store,
        skyd,
        billing,
        config.server_domain.clone(),
        config.profile,
        shutdown.child_token(),
    );

    let state = ApiState {
        promoter: promoter.clone(),
        accounts,
    };
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "API listening");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    // Serve until the shutdown signal arrives.
    if let Err(err) = api::serve(listener, state, shutdown.clone()).await {
        warn!(error = %err, "API server returned an error");
    }

    // Drain the background tasks before dropping the database handle.
    info!("API stopped, draining background tasks");
    promoter.close(SHUTDOWN_TIMEOUT).await;
    Ok(())
}
