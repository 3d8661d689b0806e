use dotenvy::dotenv;
use tracing::info;

use billing_reconciler::infra::{
    app::create_app,
    config::AppConfig,
    distribution_worker::run_distribution_loop,
    setup::{init_app_state, init_tracing},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);

    let app_state = init_app_state(config).await?;

    // Read bind address from config before moving app_state
    let bind_addr = app_state.config.bind_addr;

    tokio::spawn(run_distribution_loop(
        app_state.reconciler.clone(),
        app_state.config.distribution_poll_secs,
    ));

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Billing reconciler listening at {}", &listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
