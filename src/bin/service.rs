use anyhow::Context as _;
use clap::Parser;
use gatekeeper::{
    common::{setup_logging, Config, Paths},
    core::{CommandExtractor, EmbeddingExtractor, Gatekeeper, NullExtractor},
    events::SocketPublisher,
    service::ServiceServer,
    storage::{FileAuditLog, FileEmbeddingStore},
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gatekeeper-service")]
#[command(about = "GateKeeper face service: enrollment, detection and fallback grants")]
struct Args {
    /// Run in development mode
    #[arg(long)]
    dev: bool,

    /// Override the service socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Override the config file path
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging(args.dev);

    tracing::info!("Starting GateKeeper face service (dev_mode: {})", args.dev);

    let mut paths = Paths::for_mode(args.dev);
    if let Some(socket) = args.socket {
        paths.socket_path = socket;
    }
    paths.ensure_dirs().context("Failed to create data directories")?;

    let config_path = args.config.unwrap_or_else(|| paths.config_file.clone());
    let config = Config::load_from_path(&config_path)?;

    let store = Arc::new(FileEmbeddingStore::open(paths.users_dir(), config.matcher.dimensions)?);
    let audit = Arc::new(FileAuditLog::open(paths.audit_log())?);
    let publisher = Arc::new(SocketPublisher::new(paths.topic_dir())?);
    let extractor: Arc<dyn EmbeddingExtractor> = match &config.extractor.command {
        Some(command) => {
            tracing::info!("Using extractor command {:?}", command);
            Arc::new(CommandExtractor::new(command, config.extractor.args.clone()))
        }
        None => {
            tracing::warn!("No extractor configured; detections will report no_face");
            Arc::new(NullExtractor)
        }
    };

    let gatekeeper = Arc::new(Gatekeeper::new(&config, store, audit, publisher, extractor));
    tracing::info!(
        "Match threshold {:.3}, {} dimensions",
        config.matcher.threshold,
        config.matcher.dimensions
    );

    let server = ServiceServer::bind(&paths.socket_path, gatekeeper, config.service.clone())
        .context("Failed to bind service socket")?;
    server.serve()?;

    Ok(())
}
