use lesion_core::{config, telemetry};
use lesion_evaluation::start_evaluation;

fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    telemetry::init_subscriber(&config.log_level);

    let report = start_evaluation(&config)?;
    println!("{}", report);

    Ok(())
}
