//! Fallback credentials for people the camera cannot identify: signed QR
//! tokens (HS256 JWTs) and kiosk-verified fingerprints.

use crate::common::{GateError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const QR_CAMERA_ID: &str = "qr";
pub const FINGERPRINT_CAMERA_ID: &str = "fp";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QrClaims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    /// Expiry, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

fn mac_for(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GateError::Config(format!("Unusable QR secret: {}", e)))
}

/// Issues an HS256 token for `claims`.
pub fn sign_qr_token(claims: &QrClaims, secret: &str) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::to_vec(claims)
        .map_err(|e| GateError::Other(anyhow::anyhow!("Failed to encode claims: {}", e)))?;
    let signing_input = format!("{}.{}", header, URL_SAFE_NO_PAD.encode(payload));

    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", signing_input, signature))
}

/// Checks signature and expiry, returning the claims.
pub fn verify_qr_token(token: &str, secret: &str) -> Result<QrClaims> {
    let mut parts = token.trim().split('.');
    let (header_seg, payload_seg, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(GateError::InvalidToken("malformed token".into())),
    };

    let decode = |segment: &str| {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| GateError::InvalidToken("bad base64 segment".into()))
    };

    let header: Header = serde_json::from_slice(&decode(header_seg)?)
        .map_err(|_| GateError::InvalidToken("bad header".into()))?;
    if header.alg != "HS256" {
        return Err(GateError::InvalidToken(format!("unsupported alg {}", header.alg)));
    }

    let mut mac = mac_for(secret)?;
    mac.update(format!("{}.{}", header_seg, payload_seg).as_bytes());
    mac.verify_slice(&decode(signature)?)
        .map_err(|_| GateError::InvalidToken("signature mismatch".into()))?;

    let claims: QrClaims = serde_json::from_slice(&decode(payload_seg)?)
        .map_err(|_| GateError::InvalidToken("bad claims".into()))?;
    if claims.user_id.trim().is_empty() {
        return Err(GateError::InvalidToken("missing user_id".into()));
    }
    if let Some(exp) = claims.exp {
        if exp <= Utc::now().timestamp() {
            return Err(GateError::InvalidToken("token expired".into()));
        }
    }
    Ok(claims)
}
