use gatekeeper::{
    common::{setup_logging, Config, Paths},
    core::{sign_qr_token, QrClaims},
    ServiceClient,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatekeeper")]
#[command(about = "Biometric access-control gate")]
struct Cli {
    /// Enable development mode (local data, auto-started service)
    #[arg(long, global = true)]
    dev: bool,

    /// Override the service socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the face service is alive
    Health,
    /// Enroll (or re-enroll) a user from a face image
    Enroll {
        #[arg(short, long)]
        user_id: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Submit a camera frame for recognition
    Detect {
        #[arg(short, long)]
        camera_id: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Redeem a QR access token
    Qr {
        #[arg(short, long)]
        token: String,
    },
    /// Issue a QR access token signed with the configured secret
    IssueQr {
        #[arg(short, long)]
        user_id: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Lifetime in seconds
        #[arg(long, default_value = "300")]
        ttl: i64,
    },
    /// Report a kiosk-verified fingerprint
    Fingerprint {
        #[arg(short, long)]
        user_id: String,
        #[arg(short, long)]
        scanner_id: Option<String>,
    },
    /// Show recent gate activity
    Recent {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List enrolled users
    Users,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let paths = Paths::for_mode(cli.dev);
    let socket = cli.socket.clone().unwrap_or_else(|| paths.socket_path.clone());
    let client = ServiceClient::new(socket, cli.dev);

    match cli.command {
        Commands::Health => {
            let ok = client.health()?;
            println!("{}", serde_json::json!({ "ok": ok }));
        }
        Commands::Enroll { user_id, name, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let resp = client.enroll(&user_id, &name, bytes)?;
            println!("{}", serde_json::json!({ "ok": resp.ok, "user_id": resp.user_id }));
        }
        Commands::Detect { camera_id, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let resp = client.detect(&camera_id, bytes)?;
            println!("{}", resp.to_json());
        }
        Commands::Qr { token } => {
            let resp = client.validate_qr(&token)?;
            println!("{}", serde_json::json!({ "ok": resp.ok, "user_id": resp.user_id }));
        }
        Commands::IssueQr { user_id, name, ttl } => {
            let config = Config::load(cli.dev)?;
            let claims = QrClaims {
                user_id,
                name,
                camera_id: None,
                exp: Some(chrono::Utc::now().timestamp() + ttl),
            };
            println!("{}", sign_qr_token(&claims, &config.fallback.qr_secret)?);
        }
        Commands::Fingerprint { user_id, scanner_id } => {
            let resp = client.verify_fingerprint(&user_id, scanner_id)?;
            println!("{}", serde_json::json!({ "ok": resp.ok, "user_id": resp.user_id }));
        }
        Commands::Recent { limit } => {
            for entry in client.recent(limit)? {
                let who = entry
                    .name
                    .as_deref()
                    .or(entry.user_id.as_deref())
                    .unwrap_or("unknown");
                println!(
                    "{} - {} - {} - {}{}",
                    entry.ts.format("%Y-%m-%d %H:%M:%S"),
                    who,
                    entry.camera_id,
                    if entry.matched { "IN" } else { "FAIL" },
                    if entry.has_image { " (image kept)" } else { "" }
                );
            }
        }
        Commands::Users => {
            for user in client.users()? {
                println!("{}\t{}\t{}", user.id, user.name, user.enrolled_at.to_rfc3339());
            }
        }
    }

    Ok(())
}
