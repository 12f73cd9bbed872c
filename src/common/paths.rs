use std::fs;
use std::path::{Path, PathBuf};
use crate::common::error::Result;
use crate::service::protocol::SOCKET_PATH;

/// Well-known topic every publisher and subscriber shares.
pub const EVENT_TOPIC: &str = "events";

/// Filesystem locations for one deployment mode.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub events_dir: PathBuf,
    pub config_file: PathBuf,
}

impl Paths {
    pub fn system() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/gatekeeper"),
            socket_path: PathBuf::from(SOCKET_PATH),
            events_dir: PathBuf::from("/run/gatekeeper"),
            config_file: PathBuf::from("/etc/gatekeeper/gatekeeper.toml"),
        }
    }

    /// Local directories for development, rooted at `base` (usually `./dev_data`).
    pub fn dev(base: &Path) -> Self {
        Self {
            data_dir: base.to_path_buf(),
            socket_path: PathBuf::from("/tmp/gatekeeper.sock"),
            events_dir: PathBuf::from("/tmp/gatekeeper"),
            config_file: PathBuf::from("configs/gatekeeper.toml"),
        }
    }

    pub fn for_mode(dev: bool) -> Self {
        if dev {
            Self::dev(Path::new("./dev_data"))
        } else {
            Self::system()
        }
    }

    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join("users")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.data_dir.join("audit.log")
    }

    /// Directory holding one datagram socket per subscriber of [`EVENT_TOPIC`].
    pub fn topic_dir(&self) -> PathBuf {
        self.events_dir.join(EVENT_TOPIC)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.users_dir())?;
        fs::create_dir_all(self.topic_dir())?;
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
