use crate::common::config::{GateConfig, ReentryPolicy};
use crate::common::{GateError, Result};
use crate::events::{EventSubscriber, RecognitionEvent};
use crate::gate::actuator::Actuator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often idle loops look at the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Open {
        opened_at: Instant,
        dwell_deadline: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Engage,
    Release,
}

/// Transition rules only; no threads, no hardware, time passed in.
#[derive(Debug)]
pub struct GateMachine {
    state: GateState,
    dwell: Duration,
    reentry: ReentryPolicy,
}

impl GateMachine {
    pub fn new(dwell: Duration, reentry: ReentryPolicy) -> Self {
        Self {
            state: GateState::Closed,
            dwell,
            reentry,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            GateState::Open { dwell_deadline, .. } => Some(dwell_deadline),
            GateState::Closed => None,
        }
    }

    pub fn on_event(&mut self, event: &RecognitionEvent, now: Instant) -> Option<GateAction> {
        match (event, self.state) {
            (RecognitionEvent::Recognized { .. }, GateState::Closed) => {
                self.state = GateState::Open {
                    opened_at: now,
                    dwell_deadline: now + self.dwell,
                };
                Some(GateAction::Engage)
            }
            (RecognitionEvent::Recognized { .. }, GateState::Open { opened_at, .. }) => {
                if self.reentry == ReentryPolicy::Extend {
                    self.state = GateState::Open {
                        opened_at,
                        dwell_deadline: now + self.dwell,
                    };
                }
                None
            }
            (RecognitionEvent::Unrecognized { .. }, _) => None,
        }
    }

    pub fn on_tick(&mut self, now: Instant) -> Option<GateAction> {
        match self.state {
            GateState::Open { dwell_deadline, .. } if now >= dwell_deadline => {
                self.state = GateState::Closed;
                Some(GateAction::Release)
            }
            _ => None,
        }
    }

    /// Back to `Closed` after the actuator refused to engage.
    pub fn abort_open(&mut self) {
        self.state = GateState::Closed;
    }

    /// Closes immediately, returning `Release` if the gate was open.
    pub fn force_close(&mut self) -> Option<GateAction> {
        match self.state {
            GateState::Open { .. } => {
                self.state = GateState::Closed;
                Some(GateAction::Release)
            }
            GateState::Closed => None,
        }
    }
}

/// Owns the gate state and the actuator; fed events through a queue.
pub struct GateController<A: Actuator> {
    machine: GateMachine,
    actuator: A,
    release_retries: u32,
    pending_release: Option<(u32, Instant)>,
}

impl<A: Actuator> GateController<A> {
    pub fn new(actuator: A, config: &GateConfig) -> Self {
        Self {
            machine: GateMachine::new(config.dwell(), config.reentry),
            actuator,
            release_retries: config.release_retries,
            pending_release: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.machine.state()
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let retry = self.pending_release.map(|(_, at)| at);
        match (self.machine.deadline(), retry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn handle_event(&mut self, event: &RecognitionEvent, now: Instant) {
        match event {
            RecognitionEvent::Recognized { user_id, name, camera_id } => {
                tracing::info!(
                    "Recognized {} ({}) at {}",
                    name.as_deref().unwrap_or("-"),
                    user_id,
                    camera_id
                );
            }
            RecognitionEvent::Unrecognized { camera_id } => {
                tracing::info!("Unrecognized at camera {}", camera_id);
            }
        }

        let was_open = matches!(self.machine.state(), GateState::Open { .. });
        match self.machine.on_event(event, now) {
            Some(action) => self.apply(action, now),
            None if was_open && matches!(event, RecognitionEvent::Recognized { .. }) => {
                tracing::debug!("Gate already open; deadline now {:?}", self.machine.deadline());
            }
            None => {}
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(action) = self.machine.on_tick(now) {
            self.apply(action, now);
        }
        if let Some((attempts_left, at)) = self.pending_release {
            if now >= at {
                self.pending_release = None;
                self.release(attempts_left, now);
            }
        }
    }

    fn apply(&mut self, action: GateAction, now: Instant) {
        match action {
            GateAction::Engage => {
                // a stale retry must not close a freshly opened gate
                self.pending_release = None;
                if let Err(e) = self.actuator.engage() {
                    tracing::error!("Failed to engage gate actuator: {}", e);
                    self.machine.abort_open();
                }
            }
            GateAction::Release => self.release(self.release_retries, now),
        }
    }

    fn release(&mut self, attempts_left: u32, now: Instant) {
        if let Err(e) = self.actuator.release() {
            if attempts_left > 0 {
                tracing::error!("Failed to release gate actuator ({} retries left): {}", attempts_left, e);
                self.pending_release = Some((attempts_left - 1, now + RELEASE_RETRY_DELAY));
            } else {
                tracing::error!("Giving up releasing gate actuator: {}", e);
            }
        }
    }

    /// Consumes queued events in order until the queue disconnects or `stop` is set,
    /// releasing the actuator on the way out.
    pub fn run(mut self, events: Receiver<RecognitionEvent>, stop: Arc<AtomicBool>) {
        tracing::info!("Gate controller running");
        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            let timeout = self
                .next_wakeup()
                .map(|at| at.saturating_duration_since(now).min(POLL_INTERVAL))
                .unwrap_or(POLL_INTERVAL);

            match events.recv_timeout(timeout) {
                Ok(event) => self.handle_event(&event, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick(Instant::now());
        }

        self.shutdown(Instant::now());
        tracing::info!("Gate controller stopped");
    }

    /// Leaves the actuator released: closes an open gate, and makes one last
    /// attempt at a release that is still waiting for its retry.
    pub fn shutdown(&mut self, now: Instant) {
        let open = self.machine.force_close() == Some(GateAction::Release);
        let retry_pending = self.pending_release.take().is_some();
        if open || retry_pending {
            tracing::info!("Shutting down with gate engaged; releasing");
            self.release(0, now);
        }
    }
}

/// Running subscriber + controller threads.
pub struct GateHandle {
    stop: Arc<AtomicBool>,
    subscriber: JoinHandle<()>,
    controller: JoinHandle<()>,
}

impl GateHandle {
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_finished(&self) -> bool {
        self.subscriber.is_finished() || self.controller.is_finished()
    }

    pub fn shutdown(self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.wait()
    }

    /// Blocks until both threads exit on their own.
    pub fn wait(self) -> Result<()> {
        let subscriber = self.subscriber.join();
        let controller = self.controller.join();
        if subscriber.is_err() || controller.is_err() {
            return Err(GateError::Other(anyhow::anyhow!("gate thread panicked")));
        }
        Ok(())
    }
}

/// Starts the two cooperating threads: one keeps draining the event channel,
/// the other owns [`GateState`] and runs the dwell timer.
pub fn spawn_gate<S, A>(subscriber: S, actuator: A, config: &GateConfig) -> Result<GateHandle>
where
    S: EventSubscriber + 'static,
    A: Actuator + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let controller = GateController::new(actuator, config);

    let subscriber = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("gate-events".into())
            .spawn(move || forward_events(subscriber, tx, stop))?
    };
    let controller = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("gate-controller".into())
            .spawn(move || controller.run(rx, stop))?
    };

    Ok(GateHandle { stop, subscriber, controller })
}

fn forward_events<S: EventSubscriber>(mut subscriber: S, tx: Sender<RecognitionEvent>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(Some(event)) => {
                tracing::debug!("Event: {:?}", event);
                if tx.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Event subscription failed: {}", e);
                break;
            }
        }
    }
    // dropping tx lets the controller wind down
}
