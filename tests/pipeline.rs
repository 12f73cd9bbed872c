mod common;

use common::{alice_embedding, png, scratch_dir, WidthExtractor};
use gatekeeper::core::{euclidean_distance, Extraction, Gatekeeper};
use gatekeeper::events::{EventSubscriber, MemoryChannel, RecognitionEvent};
use gatekeeper::protocol::{DeclineReason, DetectResponse};
use gatekeeper::storage::{AuditLog, EmbeddingStore, FileAuditLog, FileEmbeddingStore};
use gatekeeper::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Site {
    gatekeeper: Gatekeeper,
    store: Arc<FileEmbeddingStore>,
    audit: Arc<FileAuditLog>,
    channel: Arc<MemoryChannel>,
}

fn open_site(label: &str, faces: HashMap<u32, Extraction>) -> Site {
    let dir = scratch_dir(label);
    let config = Config::default();
    let store = Arc::new(FileEmbeddingStore::open(dir.join("users"), config.matcher.dimensions).unwrap());
    let audit = Arc::new(FileAuditLog::open(dir.join("audit.log")).unwrap());
    let channel = Arc::new(MemoryChannel::new());
    let gatekeeper = Gatekeeper::new(
        &config,
        store.clone(),
        audit.clone(),
        channel.clone(),
        Arc::new(WidthExtractor(faces)),
    );
    Site { gatekeeper, store, audit, channel }
}

#[test]
fn alice_accepted_then_stranger_rejected() {
    let alice = alice_embedding();
    let mut far = alice.clone();
    far[0] += 0.8;

    let faces = HashMap::from([
        (10, Extraction::Embedding(alice.clone())),
        (11, Extraction::Embedding(alice.clone())),
        (12, Extraction::Embedding(far.clone())),
    ]);
    let site = open_site("alice", faces);
    let mut events = site.channel.subscribe();

    let enrolled = site.gatekeeper.enroll("alice", "Alice", &png(10)).unwrap();
    assert!(enrolled.ok);

    let hit = site.gatekeeper.detect("entry-1", &png(11)).unwrap();
    assert_eq!(
        hit,
        DetectResponse::Matched { user_id: "alice".into(), name: "Alice".into(), score: 0.0 }
    );

    let distance = euclidean_distance(&far, &alice);
    assert!((distance - 0.8).abs() < 1e-5);
    let rejected_frame = png(12);
    let miss = site.gatekeeper.detect("entry-1", &rejected_frame).unwrap();
    assert_eq!(miss, DetectResponse::Declined { reason: DeclineReason::NoMatch });
    assert_eq!(
        miss.to_json(),
        serde_json::json!({"matched": false, "reason": "no_match"})
    );

    let entries = site.audit.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].matched);
    assert_eq!(entries[0].score, Some(0.0));
    assert_eq!(entries[0].raw_image, None);
    assert!(!entries[1].matched);
    assert_eq!(entries[1].raw_image.as_deref(), Some(rejected_frame.as_slice()));

    let wait = Duration::from_millis(100);
    assert_eq!(
        events.recv_timeout(wait).unwrap(),
        Some(RecognitionEvent::Recognized {
            user_id: "alice".into(),
            name: Some("Alice".into()),
            camera_id: "entry-1".into(),
        })
    );
    assert_eq!(
        events.recv_timeout(wait).unwrap(),
        Some(RecognitionEvent::Unrecognized { camera_id: "entry-1".into() })
    );
}

#[test]
fn reenrollment_moves_the_match_to_the_new_vector() {
    let old = alice_embedding();
    let new: Vec<f32> = old.iter().map(|v| v + 1.0).collect();
    let site = open_site("reenroll", HashMap::new());

    site.gatekeeper.enroll_embedding("alice", "Alice", old.clone()).unwrap();
    site.gatekeeper.enroll_embedding("alice", "Alice", new.clone()).unwrap();
    assert_eq!(site.store.len().unwrap(), 1);

    let against_old = site.gatekeeper.detect_embedding("cam", &old, b"frame").unwrap();
    assert!(!against_old.matched());
    let against_new = site.gatekeeper.detect_embedding("cam", &new, b"frame").unwrap();
    assert!(against_new.matched());
}

#[test]
fn empty_site_rejects_everyone() {
    let site = open_site("empty", HashMap::new());
    let result = site
        .gatekeeper
        .detect_embedding("cam", &alice_embedding(), b"frame")
        .unwrap();
    assert_eq!(result, DetectResponse::Declined { reason: DeclineReason::NoMatch });
    assert_eq!(site.audit.entries().unwrap().len(), 1);
}

#[test]
fn nearest_of_several_users_wins() {
    let site = open_site("nearest", HashMap::new());
    let alice = alice_embedding();
    let mut bob = alice.clone();
    bob[5] += 0.3;
    let mut carol = alice.clone();
    carol[9] -= 0.4;
    site.gatekeeper.enroll_embedding("alice", "Alice", alice.clone()).unwrap();
    site.gatekeeper.enroll_embedding("bob", "Bob", bob.clone()).unwrap();
    site.gatekeeper.enroll_embedding("carol", "Carol", carol).unwrap();

    let mut probe = bob.clone();
    probe[5] += 0.05;
    match site.gatekeeper.detect_embedding("cam", &probe, b"frame").unwrap() {
        DetectResponse::Matched { user_id, score, .. } => {
            assert_eq!(user_id, "bob");
            assert_eq!(score, euclidean_distance(&probe, &bob));
        }
        other => panic!("expected a match, got {:?}", other),
    }
}

#[test]
fn concurrent_detections_each_write_one_entry() {
    let site = Arc::new(open_site("concurrent", HashMap::new()));
    site.gatekeeper.enroll_embedding("alice", "Alice", alice_embedding()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let site = Arc::clone(&site);
            std::thread::spawn(move || {
                let camera = format!("cam-{}", i);
                site.gatekeeper
                    .detect_embedding(&camera, &alice_embedding(), b"frame")
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = site.audit.entries().unwrap();
    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|e| e.matched));
}
