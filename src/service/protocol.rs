use crate::common::{GateError, Result};
use crate::storage::AuditSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::{Read, Write};

// Request types
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Request {
    Enroll(EnrollRequest),
    Detect(DetectRequest),
    Health,
    QrValidate(QrRequest),
    FingerprintVerify(FingerprintRequest),
    Recent { limit: usize },
    Users,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnrollRequest {
    pub user_id: String,
    pub name: String,
    pub image: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DetectRequest {
    pub camera_id: String,
    pub image: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QrRequest {
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FingerprintRequest {
    pub user_id: String,
    pub scanner_id: Option<String>,
}

// Response types
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Enroll(EnrollResponse),
    Detect(DetectResponse),
    Health { ok: bool },
    Granted(GrantResponse),
    Recent(Vec<AuditSummary>),
    Users(Vec<UserSummary>),
    Error { status: u16, message: String },
}

impl Response {
    pub fn error(e: &GateError) -> Self {
        Response::Error {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnrollResponse {
    pub ok: bool,
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    NoFace,
    NoEncoding,
    NoMatch,
}

impl DeclineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclineReason::NoFace => "no_face",
            DeclineReason::NoEncoding => "no_encoding",
            DeclineReason::NoMatch => "no_match",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DetectResponse {
    Matched {
        user_id: String,
        name: String,
        score: f32,
    },
    Declined {
        reason: DeclineReason,
    },
}

impl DetectResponse {
    pub fn matched(&self) -> bool {
        matches!(self, DetectResponse::Matched { .. })
    }

    /// Kiosk-facing JSON: `{matched, user_id, name, score}` or `{matched: false, reason}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DetectResponse::Matched { user_id, name, score } => json!({
                "matched": true,
                "user_id": user_id,
                "name": name,
                "score": score,
            }),
            DetectResponse::Declined { reason } => json!({
                "matched": false,
                "reason": reason.as_str(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GrantResponse {
    pub ok: bool,
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Writes `u32 LE length` followed by the bincode body.
pub fn write_frame<W: Write, T: Serialize>(stream: &mut W, msg: &T) -> Result<()> {
    let data = bincode::serialize(msg)?;
    let len = (data.len() as u32).to_le_bytes();
    stream.write_all(&len)?;
    stream.write_all(&data)?;
    stream.flush()?;
    Ok(())
}

pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(stream: &mut R, max_len: usize) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > max_len {
        return Err(GateError::Protocol(format!("Frame too large: {} bytes", len)));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

// Socket path constant
pub const SOCKET_PATH: &str = "/run/gatekeeper/service.sock";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn detect_json_has_kiosk_shape() {
        let matched = DetectResponse::Matched {
            user_id: "alice".into(),
            name: "Alice".into(),
            score: 0.0,
        };
        assert_eq!(
            matched.to_json(),
            json!({"matched": true, "user_id": "alice", "name": "Alice", "score": 0.0})
        );

        let declined = DetectResponse::Declined { reason: DeclineReason::NoMatch };
        assert_eq!(declined.to_json(), json!({"matched": false, "reason": "no_match"}));
    }

    #[test]
    fn oversized_frame_is_refused_before_allocating() {
        let mut wire = Cursor::new(Vec::new());
        write_frame(&mut wire, &Request::Users).unwrap();
        wire.set_position(0);

        let err = read_frame::<_, Request>(&mut wire, 2).unwrap_err();
        assert!(matches!(err, GateError::Protocol(_)));
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let mut wire = Cursor::new(vec![10, 0, 0, 0, 1, 2]);
        assert!(matches!(
            read_frame::<_, Request>(&mut wire, 1024),
            Err(GateError::Io(_))
        ));
    }
}
