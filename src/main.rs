use dotenvy::dotenv;
use tracing::info;

use sanluisway_billing::infra::{
    app::create_app,
    config::LogFormat,
    error::InfraError,
    setup::{init_app_state, init_tracing},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing(LogFormat::from_env());

    let app_state = init_app_state().await.inspect_err(|e| {
        tracing::error!(error = %e, "Startup failed");
    })?;

    let bind_addr = app_state.config.bind_addr;

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(InfraError::TcpBind)?;

    info!("Backend listening at {}", &listener.local_addr()?);

    axum::serve(listener, app)
        .await
        .map_err(InfraError::Server)?;

    Ok(())
}
