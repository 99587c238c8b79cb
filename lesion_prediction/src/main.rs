use lesion_core::{config, telemetry};
use lesion_prediction::start_app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    telemetry::init_subscriber(&config.log_level);

    start_app(config).await?;

    Ok(())
}
