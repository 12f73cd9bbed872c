use crate::common::config::ServiceConfig;
use crate::common::{GateError, Result};
use crate::core::Gatekeeper;
use crate::service::protocol::{read_frame, write_frame, Request, Response};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Face-service endpoint: one thread per connection, one request per connection.
pub struct ServiceServer {
    listener: UnixListener,
    socket_path: PathBuf,
    gatekeeper: Arc<Gatekeeper>,
    config: ServiceConfig,
}

impl ServiceServer {
    pub fn bind(socket_path: &Path, gatekeeper: Arc<Gatekeeper>, config: ServiceConfig) -> Result<Self> {
        // Clean up old socket if exists
        if socket_path.exists() {
            fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        // kiosks and cameras run as other users
        fs::set_permissions(socket_path, fs::Permissions::from_mode(0o666))?;
        tracing::info!("Listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            gatekeeper,
            config,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accepts connections until the listener fails.
    pub fn serve(&self) -> Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let gatekeeper = Arc::clone(&self.gatekeeper);
                    let config = self.config.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_client(stream, &gatekeeper, &config) {
                            tracing::error!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Connection error: {}", e);
                }
            }
        }
        Ok(())
    }
}

impl Drop for ServiceServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

fn handle_client(mut stream: UnixStream, gatekeeper: &Gatekeeper, config: &ServiceConfig) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(config.read_timeout_secs)))?;
    stream.set_write_timeout(Some(Duration::from_secs(config.write_timeout_secs)))?;

    let response = match read_frame::<_, Request>(&mut stream, config.max_request_bytes) {
        Ok(request) => handle_request(gatekeeper, request),
        Err(GateError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
            tracing::debug!("Client disconnected without a request");
            return Ok(());
        }
        Err(e) => {
            tracing::warn!("Rejecting unreadable request: {}", e);
            Response::error(&e)
        }
    };
    write_frame(&mut stream, &response)
}

/// Runs one request against the pipeline. Failures become `Response::Error`.
pub fn handle_request(gatekeeper: &Gatekeeper, request: Request) -> Response {
    let result = match request {
        Request::Enroll(req) => {
            tracing::info!("Processing enrollment request for user: {}", req.user_id);
            gatekeeper
                .enroll(&req.user_id, &req.name, &req.image)
                .map(Response::Enroll)
        }
        Request::Detect(req) => {
            tracing::debug!("Processing detect request from camera: {}", req.camera_id);
            gatekeeper.detect(&req.camera_id, &req.image).map(Response::Detect)
        }
        Request::Health => Ok(Response::Health { ok: true }),
        Request::QrValidate(req) => gatekeeper.validate_qr(&req.token).map(Response::Granted),
        Request::FingerprintVerify(req) => gatekeeper
            .verify_fingerprint(&req.user_id, req.scanner_id.as_deref())
            .map(Response::Granted),
        Request::Recent { limit } => gatekeeper.recent(limit).map(Response::Recent),
        Request::Users => gatekeeper.users().map(Response::Users),
    };

    result.unwrap_or_else(|e| {
        if e.status() >= 500 {
            tracing::error!("Request failed: {}", e);
        } else {
            tracing::info!("Request declined: {}", e);
        }
        Response::error(&e)
    })
}
