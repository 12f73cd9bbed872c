use crate::common::{Config, GateError, Result};
use crate::core::extractor::{decode_image, EmbeddingExtractor, Extraction};
use crate::core::fallback::{verify_qr_token, FINGERPRINT_CAMERA_ID, QR_CAMERA_ID};
use crate::core::index::{Embedding, LinearScanIndex, NearestNeighborIndex};
use crate::core::matcher::Matcher;
use crate::events::{EventPublisher, RecognitionEvent};
use crate::service::protocol::{
    DeclineReason, DetectResponse, EnrollResponse, GrantResponse, UserSummary,
};
use crate::storage::{AuditEntry, AuditLog, AuditSource, AuditSummary, EmbeddingStore};
use std::sync::Arc;

/// The recognition pipeline: extraction, matching, audit and publication,
/// built from handles owned by the caller.
pub struct Gatekeeper {
    store: Arc<dyn EmbeddingStore>,
    matcher: Matcher,
    audit: Arc<dyn AuditLog>,
    publisher: Arc<dyn EventPublisher>,
    extractor: Arc<dyn EmbeddingExtractor>,
    qr_secret: String,
}

impl Gatekeeper {
    /// Uses a linear-scan index over `store`.
    pub fn new(
        config: &Config,
        store: Arc<dyn EmbeddingStore>,
        audit: Arc<dyn AuditLog>,
        publisher: Arc<dyn EventPublisher>,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Self {
        let index: Arc<dyn NearestNeighborIndex> = Arc::new(LinearScanIndex::new(Arc::clone(&store)));
        Self::with_index(config, store, index, audit, publisher, extractor)
    }

    pub fn with_index(
        config: &Config,
        store: Arc<dyn EmbeddingStore>,
        index: Arc<dyn NearestNeighborIndex>,
        audit: Arc<dyn AuditLog>,
        publisher: Arc<dyn EventPublisher>,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Self {
        Self {
            store,
            matcher: Matcher::new(index, config.matcher.threshold, config.matcher.dimensions),
            audit,
            publisher,
            extractor,
            qr_secret: config.fallback.qr_secret.clone(),
        }
    }

    pub fn enroll(&self, user_id: &str, name: &str, image: &[u8]) -> Result<EnrollResponse> {
        let embedding = match self.extractor.extract(&decode_image(image)?)? {
            Extraction::Embedding(embedding) => embedding,
            Extraction::NoFace => return Err(GateError::NoFaceDetected),
            Extraction::NoEncoding => return Err(GateError::NoEncoding),
        };
        self.enroll_embedding(user_id, name, embedding)?;
        Ok(EnrollResponse { ok: true, user_id: user_id.to_string() })
    }

    /// Enrollment for callers that already hold an embedding.
    pub fn enroll_embedding(&self, user_id: &str, name: &str, embedding: Embedding) -> Result<()> {
        self.store.enroll(user_id, name, embedding)
    }

    pub fn detect(&self, camera_id: &str, image: &[u8]) -> Result<DetectResponse> {
        let probe = match self.extractor.extract(&decode_image(image)?)? {
            Extraction::Embedding(embedding) => embedding,
            Extraction::NoFace => {
                tracing::debug!("No face in frame from {}", camera_id);
                return Ok(DetectResponse::Declined { reason: DeclineReason::NoFace });
            }
            Extraction::NoEncoding => {
                tracing::debug!("Face from {} could not be encoded", camera_id);
                return Ok(DetectResponse::Declined { reason: DeclineReason::NoEncoding });
            }
        };
        self.detect_embedding(camera_id, &probe, image)
    }

    /// Matches `probe`, writes exactly one audit entry and publishes the outcome.
    /// `raw_image` is kept in the audit log only when the probe is rejected.
    pub fn detect_embedding(&self, camera_id: &str, probe: &[f32], raw_image: &[u8]) -> Result<DetectResponse> {
        let result = self.matcher.match_probe(probe, camera_id)?;

        match (result.user_id, result.name) {
            (Some(user_id), Some(name)) if result.matched => {
                self.audit.record(AuditEntry::accepted(
                    &user_id,
                    Some(&name),
                    camera_id,
                    result.distance,
                    AuditSource::Face,
                ))?;
                self.publisher.publish(&RecognitionEvent::Recognized {
                    user_id: user_id.clone(),
                    name: Some(name.clone()),
                    camera_id: camera_id.to_string(),
                });
                tracing::info!("Recognized {} at {} (score {:.4})", user_id, camera_id, result.distance);
                Ok(DetectResponse::Matched { user_id, name, score: result.distance })
            }
            _ => {
                self.audit.record(AuditEntry::rejected(camera_id, raw_image.to_vec()))?;
                self.publisher.publish(&RecognitionEvent::Unrecognized {
                    camera_id: camera_id.to_string(),
                });
                tracing::info!("No match at {} (best distance {:.4})", camera_id, result.distance);
                Ok(DetectResponse::Declined { reason: DeclineReason::NoMatch })
            }
        }
    }

    pub fn validate_qr(&self, token: &str) -> Result<GrantResponse> {
        let claims = verify_qr_token(token, &self.qr_secret)?;
        let camera_id = claims.camera_id.as_deref().unwrap_or(QR_CAMERA_ID);
        self.grant(&claims.user_id, claims.name.as_deref(), camera_id, AuditSource::QrToken)
    }

    pub fn verify_fingerprint(&self, user_id: &str, scanner_id: Option<&str>) -> Result<GrantResponse> {
        if user_id.trim().is_empty() {
            return Err(GateError::InvalidUserId(user_id.to_string()));
        }
        let camera_id = scanner_id.unwrap_or(FINGERPRINT_CAMERA_ID);
        self.grant(user_id, None, camera_id, AuditSource::Fingerprint)
    }

    fn grant(&self, user_id: &str, name: Option<&str>, camera_id: &str, source: AuditSource) -> Result<GrantResponse> {
        self.audit.record(AuditEntry::accepted(user_id, name, camera_id, 0.0, source))?;
        self.publisher.publish(&RecognitionEvent::Recognized {
            user_id: user_id.to_string(),
            name: name.map(str::to_string),
            camera_id: camera_id.to_string(),
        });
        tracing::info!("Granted {} via {:?} at {}", user_id, source, camera_id);
        Ok(GrantResponse { ok: true, user_id: user_id.to_string() })
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<AuditSummary>> {
        self.audit.recent(limit)
    }

    pub fn users(&self) -> Result<Vec<UserSummary>> {
        self.store
            .all_entries()?
            .map(|user| {
                user.map(|u| UserSummary {
                    id: u.id,
                    name: u.name,
                    enrolled_at: u.enrolled_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSubscriber, MemoryChannel};
    use crate::storage::{MemoryAuditLog, MemoryEmbeddingStore};
    use image::{DynamicImage, ImageOutputFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hands out queued verdicts in order.
    struct ScriptedExtractor(Mutex<Vec<Extraction>>);

    impl EmbeddingExtractor for ScriptedExtractor {
        fn extract(&self, _image: &DynamicImage) -> Result<Extraction> {
            Ok(self.0.lock().unwrap().remove(0))
        }
    }

    fn png() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    struct Fixture {
        gatekeeper: Gatekeeper,
        audit: Arc<MemoryAuditLog>,
        channel: Arc<MemoryChannel>,
    }

    fn fixture(script: Vec<Extraction>) -> Fixture {
        let mut config = Config::default();
        config.matcher.dimensions = 2;
        let audit = Arc::new(MemoryAuditLog::new());
        let channel = Arc::new(MemoryChannel::new());
        let gatekeeper = Gatekeeper::new(
            &config,
            Arc::new(MemoryEmbeddingStore::new(2)),
            audit.clone(),
            channel.clone(),
            Arc::new(ScriptedExtractor(Mutex::new(script))),
        );
        Fixture { gatekeeper, audit, channel }
    }

    #[test]
    fn enroll_failures_write_nothing() {
        let f = fixture(vec![Extraction::NoFace, Extraction::NoEncoding]);
        assert!(matches!(f.gatekeeper.enroll("a", "A", &png()), Err(GateError::NoFaceDetected)));
        assert!(matches!(f.gatekeeper.enroll("a", "A", &png()), Err(GateError::NoEncoding)));
        assert!(matches!(
            f.gatekeeper.enroll("a", "A", b"not an image"),
            Err(GateError::InvalidImage(_))
        ));
        assert!(f.gatekeeper.users().unwrap().is_empty());
        assert!(f.audit.entries().unwrap().is_empty());
    }

    #[test]
    fn faceless_detection_is_declined_without_audit() {
        let f = fixture(vec![Extraction::NoFace, Extraction::NoEncoding]);
        let mut events = f.channel.subscribe();

        assert_eq!(
            f.gatekeeper.detect("cam", &png()).unwrap(),
            DetectResponse::Declined { reason: DeclineReason::NoFace }
        );
        assert_eq!(
            f.gatekeeper.detect("cam", &png()).unwrap(),
            DetectResponse::Declined { reason: DeclineReason::NoEncoding }
        );
        assert!(f.audit.entries().unwrap().is_empty());
        assert_eq!(events.recv_timeout(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn detection_audits_and_publishes_once() {
        let f = fixture(vec![
            Extraction::Embedding(vec![0.0, 0.0]),
            Extraction::Embedding(vec![0.0, 0.1]),
            Extraction::Embedding(vec![3.0, 3.0]),
        ]);
        let mut events = f.channel.subscribe();
        f.gatekeeper.enroll("alice", "Alice", &png()).unwrap();

        let hit = f.gatekeeper.detect("entry", &png()).unwrap();
        assert!(hit.matched());
        let miss = f.gatekeeper.detect("entry", &png()).unwrap();
        assert_eq!(miss, DetectResponse::Declined { reason: DeclineReason::NoMatch });

        let entries = f.audit.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].matched && entries[0].raw_image.is_none());
        assert!(!entries[1].matched && entries[1].raw_image.is_some());
        assert_eq!(entries[1].score, None);

        let wait = Duration::from_millis(50);
        assert!(matches!(
            events.recv_timeout(wait).unwrap(),
            Some(RecognitionEvent::Recognized { ref user_id, .. }) if user_id == "alice"
        ));
        assert_eq!(
            events.recv_timeout(wait).unwrap(),
            Some(RecognitionEvent::Unrecognized { camera_id: "entry".into() })
        );
    }

    #[test]
    fn fingerprint_grant_has_no_name() {
        let f = fixture(vec![]);
        let mut events = f.channel.subscribe();

        let granted = f.gatekeeper.verify_fingerprint("u7", None).unwrap();
        assert_eq!(granted, GrantResponse { ok: true, user_id: "u7".into() });

        let entry = &f.audit.entries().unwrap()[0];
        assert_eq!(entry.source, AuditSource::Fingerprint);
        assert_eq!(entry.camera_id, "fp");
        assert_eq!(entry.score, Some(0.0));
        assert_eq!(
            events.recv_timeout(Duration::from_millis(50)).unwrap(),
            Some(RecognitionEvent::Recognized { user_id: "u7".into(), name: None, camera_id: "fp".into() })
        );
        assert!(f.gatekeeper.verify_fingerprint(" ", Some("fp-2")).is_err());
    }
}
