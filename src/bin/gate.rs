use anyhow::Context as _;
use clap::Parser;
use gatekeeper::{
    common::{setup_logging, Config, Paths},
    events::SocketSubscriber,
    gate::{spawn_gate, MockActuator, SysfsGpioActuator},
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gatekeeper-gate")]
#[command(about = "GateKeeper gate controller: opens the gate on recognition events")]
struct Args {
    /// Run in development mode
    #[arg(long)]
    dev: bool,

    /// Override the config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subscriber name inside the event topic
    #[arg(long, default_value = "gate")]
    name: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging(args.dev);

    let paths = Paths::for_mode(args.dev);
    let config_path = args.config.unwrap_or_else(|| paths.config_file.clone());
    let config = Config::load_from_path(&config_path)?;

    let subscriber = SocketSubscriber::bind(&paths.topic_dir(), &args.name)
        .context("Failed to subscribe to the event topic")?;
    tracing::info!(
        "Gate controller subscribed (dwell {:.1}s, reentry {:?})",
        config.gate.dwell_secs,
        config.gate.reentry
    );

    let handle = if config.gate.mock {
        spawn_gate(subscriber, MockActuator::new(config.gate.pin), &config.gate)?
    } else {
        let actuator = SysfsGpioActuator::new(config.gate.pin)
            .with_context(|| format!("Failed to initialise GPIO {}", config.gate.pin))?;
        spawn_gate(subscriber, actuator, &config.gate)?
    };

    handle.wait()?;
    Ok(())
}
