use lesion_core::{config, telemetry};
use lesion_training::start_training;

fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    telemetry::init_subscriber(&config.log_level);

    start_training(&config)?;

    Ok(())
}
