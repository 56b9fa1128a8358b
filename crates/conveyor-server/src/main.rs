use anyhow::Context;
use conveyor_server::config::Settings;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    conveyor_server::observability::init();

    let settings = Settings::load().context("failed to load configuration")?;
    info!(?settings, "configuration loaded");

    let report = conveyor_server::app::run(settings).await?;
    info!(
        trigger = %report.trigger,
        drain = ?report.drain,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "exiting"
    );
    Ok(())
}
