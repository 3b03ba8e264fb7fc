use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vantage_edge::config::{LoggingSettings, Settings};
use vantage_edge::Application;

fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    init_tracing(&settings.logging);

    info!(
        gateway_port = %settings.application.gateway_port,
        management_port = %settings.application.management_port,
        "Starting VantageEdge"
    );

    let app = Application::with_settings(settings)?;
    app.run().await?;

    Ok(())
}
