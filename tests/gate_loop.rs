use gatekeeper::common::config::GateConfig;
use gatekeeper::common::ReentryPolicy;
use gatekeeper::events::{EventPublisher, MemoryChannel, RecognitionEvent};
use gatekeeper::gate::{spawn_gate, ActuatorCall, ActuatorLog, MockActuator};
use std::thread;
use std::time::{Duration, Instant};

const DWELL: Duration = Duration::from_millis(150);

fn gate_config(reentry: ReentryPolicy) -> GateConfig {
    GateConfig {
        dwell_secs: DWELL.as_secs_f64(),
        reentry,
        ..GateConfig::default()
    }
}

fn recognized(user_id: &str) -> RecognitionEvent {
    RecognitionEvent::Recognized {
        user_id: user_id.into(),
        name: None,
        camera_id: "entry-1".into(),
    }
}

fn calls(log: &ActuatorLog) -> Vec<(ActuatorCall, Instant)> {
    log.lock().unwrap().clone()
}

#[test]
fn recognized_event_opens_for_the_dwell_then_closes() {
    let channel = MemoryChannel::new();
    let actuator = MockActuator::new(17);
    let log = actuator.log();
    let handle = spawn_gate(channel.subscribe(), actuator, &gate_config(ReentryPolicy::Extend)).unwrap();

    let sent_at = Instant::now();
    channel.publish(&recognized("alice"));
    thread::sleep(DWELL * 4);

    let calls = calls(&log);
    assert_eq!(calls.len(), 2, "{:?}", calls);
    let (first, engaged_at) = calls[0];
    let (second, released_at) = calls[1];
    assert_eq!(first, ActuatorCall::Engage);
    assert_eq!(second, ActuatorCall::Release);
    assert!(engaged_at >= sent_at);
    assert!(released_at.duration_since(engaged_at) >= DWELL);

    handle.shutdown().unwrap();
}

#[test]
fn unrecognized_event_leaves_the_gate_alone() {
    let channel = MemoryChannel::new();
    let actuator = MockActuator::new(17);
    let log = actuator.log();
    let handle = spawn_gate(channel.subscribe(), actuator, &gate_config(ReentryPolicy::Extend)).unwrap();

    channel.publish(&RecognitionEvent::Unrecognized { camera_id: "entry-1".into() });
    thread::sleep(DWELL * 2);
    handle.shutdown().unwrap();

    assert!(calls(&log).is_empty());
}

#[test]
fn second_recognition_while_open_extends_a_single_opening() {
    let channel = MemoryChannel::new();
    let actuator = MockActuator::new(17);
    let log = actuator.log();
    let handle = spawn_gate(channel.subscribe(), actuator, &gate_config(ReentryPolicy::Extend)).unwrap();

    channel.publish(&recognized("alice"));
    thread::sleep(DWELL / 2);
    let second_at = Instant::now();
    channel.publish(&recognized("bob"));
    thread::sleep(DWELL * 4);

    let calls = calls(&log);
    let kinds: Vec<ActuatorCall> = calls.iter().map(|(call, _)| *call).collect();
    assert_eq!(kinds, vec![ActuatorCall::Engage, ActuatorCall::Release]);
    assert!(calls[1].1.duration_since(second_at) >= DWELL);

    handle.shutdown().unwrap();
}

#[test]
fn ignore_policy_keeps_the_original_deadline() {
    let channel = MemoryChannel::new();
    let actuator = MockActuator::new(17);
    let log = actuator.log();
    let handle = spawn_gate(channel.subscribe(), actuator, &gate_config(ReentryPolicy::Ignore)).unwrap();

    channel.publish(&recognized("alice"));
    thread::sleep(DWELL / 2);
    channel.publish(&recognized("bob"));
    thread::sleep(DWELL * 4);

    let calls = calls(&log);
    let kinds: Vec<ActuatorCall> = calls.iter().map(|(call, _)| *call).collect();
    assert_eq!(kinds, vec![ActuatorCall::Engage, ActuatorCall::Release]);
    let held = calls[1].1.duration_since(calls[0].1);
    assert!(held >= DWELL);
    assert!(held < DWELL * 2, "held for {:?}", held);

    handle.shutdown().unwrap();
}

#[test]
fn shutdown_while_open_releases_the_gate() {
    let channel = MemoryChannel::new();
    let actuator = MockActuator::new(17);
    let log = actuator.log();
    let config = GateConfig {
        dwell_secs: 30.0,
        ..GateConfig::default()
    };
    let handle = spawn_gate(channel.subscribe(), actuator, &config).unwrap();

    channel.publish(&recognized("alice"));
    thread::sleep(Duration::from_millis(100));
    handle.shutdown().unwrap();

    let kinds: Vec<ActuatorCall> = calls(&log).iter().map(|(call, _)| *call).collect();
    assert_eq!(kinds, vec![ActuatorCall::Engage, ActuatorCall::Release]);
}

#[test]
fn dropping_the_channel_stops_the_gate() {
    let channel = MemoryChannel::new();
    let handle = spawn_gate(channel.subscribe(), MockActuator::new(17), &GateConfig::default()).unwrap();
    drop(channel);
    handle.wait().unwrap();
}
