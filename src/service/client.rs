use crate::common::{GateError, Result};
use crate::service::protocol::{
    read_frame, write_frame, DetectRequest, DetectResponse, EnrollRequest, EnrollResponse,
    FingerprintRequest, GrantResponse, QrRequest, Request, Response, UserSummary,
};
use crate::storage::AuditSummary;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

pub struct ServiceClient {
    socket_path: PathBuf,
    dev_mode: bool,
}

impl ServiceClient {
    pub fn new(socket_path: impl Into<PathBuf>, dev_mode: bool) -> Self {
        ServiceClient { socket_path: socket_path.into(), dev_mode }
    }

    pub fn enroll(&self, user_id: &str, name: &str, image: Vec<u8>) -> Result<EnrollResponse> {
        let request = Request::Enroll(EnrollRequest {
            user_id: user_id.to_string(),
            name: name.to_string(),
            image,
        });
        match self.call(&request)? {
            Response::Enroll(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    pub fn detect(&self, camera_id: &str, image: Vec<u8>) -> Result<DetectResponse> {
        let request = Request::Detect(DetectRequest {
            camera_id: camera_id.to_string(),
            image,
        });
        match self.call(&request)? {
            Response::Detect(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    pub fn health(&self) -> Result<bool> {
        match self.call(&Request::Health)? {
            Response::Health { ok } => Ok(ok),
            other => Err(unexpected(other)),
        }
    }

    pub fn validate_qr(&self, token: &str) -> Result<GrantResponse> {
        let request = Request::QrValidate(QrRequest { token: token.to_string() });
        match self.call(&request)? {
            Response::Granted(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    pub fn verify_fingerprint(&self, user_id: &str, scanner_id: Option<String>) -> Result<GrantResponse> {
        let request = Request::FingerprintVerify(FingerprintRequest {
            user_id: user_id.to_string(),
            scanner_id,
        });
        match self.call(&request)? {
            Response::Granted(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<AuditSummary>> {
        match self.call(&Request::Recent { limit })? {
            Response::Recent(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    pub fn users(&self) -> Result<Vec<UserSummary>> {
        match self.call(&Request::Users)? {
            Response::Users(users) => Ok(users),
            other => Err(unexpected(other)),
        }
    }

    /// One request/response exchange on a fresh connection.
    pub fn call(&self, request: &Request) -> Result<Response> {
        // a successful connect is the liveness check
        let mut stream = match self.connect() {
            Ok(stream) => stream,
            Err(_) => {
                self.ensure_service_running()?;
                self.connect_with_retry(3)?
            }
        };
        write_frame(&mut stream, request)?;
        read_frame(&mut stream, MAX_RESPONSE_BYTES)
    }

    pub fn ensure_service_running(&self) -> Result<()> {
        if self.socket_path.exists() && UnixStream::connect(&self.socket_path).is_ok() {
            return Ok(());
        }

        // Only auto-start in dev mode
        if !self.dev_mode {
            return Err(GateError::Other(anyhow::anyhow!(
                "Service is not running at {}. Start it with: systemctl start gatekeeper",
                self.socket_path.display()
            )));
        }

        tracing::info!("Starting service in development mode...");
        let service_binary = std::env::current_exe()?
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Failed to get binary directory"))?
            .join("gatekeeper-service");

        if !service_binary.exists() {
            return Err(GateError::Other(anyhow::anyhow!(
                "Service binary not found at {:?}. Please build the project first.", service_binary
            )));
        }

        Command::new(&service_binary)
            .arg("--dev")
            .arg("--socket")
            .arg(&self.socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GateError::Other(anyhow::anyhow!("Failed to start service: {}", e)))?;

        // Wait for service to be ready (check socket)
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(500));
            if Path::new(&self.socket_path).exists() {
                tracing::info!("Service started");
                return Ok(());
            }
        }

        Err(GateError::Other(anyhow::anyhow!("Service failed to start within timeout")))
    }

    fn connect(&self) -> std::io::Result<UnixStream> {
        let stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(Duration::from_secs(60)))?;
        stream.set_write_timeout(Some(Duration::from_secs(10)))?;
        Ok(stream)
    }

    fn connect_with_retry(&self, max_retries: u32) -> Result<UnixStream> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connect() {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < max_retries => {
                    tracing::warn!("Failed to connect (attempt {}): {}", attempt, e);
                    std::thread::sleep(Duration::from_millis(500));
                }
                Err(e) => {
                    return Err(GateError::Other(anyhow::anyhow!(
                        "Failed to connect to service: {}", e
                    )));
                }
            }
        }
    }
}

fn unexpected(response: Response) -> GateError {
    match response {
        Response::Error { status, message } => match status {
            401 => GateError::InvalidToken(message),
            400 => GateError::Protocol(message),
            _ => GateError::Other(anyhow::anyhow!("Service error ({}): {}", status, message)),
        },
        other => GateError::Protocol(format!("Unexpected response type: {:?}", other)),
    }
}
