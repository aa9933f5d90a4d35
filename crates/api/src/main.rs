use anyhow::Context;
use kvsignals_api::app::{build_app, services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kvsignals_observability::init();

    let settings = services::ApiSettings::from_env().context("invalid KVSIGNALS_* configuration")?;
    let services = services::build_services(&settings).context("failed to wire signal services")?;
    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
