//! The character-count flow-control window and the positional
//! request/response correlator.
//!
//! Grounded structurally on
//! `crates/gcodekit4-communication/src/firmware/grbl/communicator.rs::GrblCommunicator`
//! (`CharacterCountingState`, window accounting), but the correlation
//! itself is built fresh:
//! `src/firmware/grbl/controller.rs::GrblController::send_command` does not
//! do real positional correlation: it reads exactly one line and checks
//! whether it contains `"ok"`, with no queue and no window back-pressure.
//! This module is the "explicit pending deque, not a promise map"
//! re-architecture the design notes call for: a single-owner actor task
//! reachable through a cloneable [`CommandManager`] handle, driven by a
//! request/reply channel rather than shared locks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use grblcore_protocol::GrblResponse;
use grblcore_types::{CommandClass, CommandOutcome, CommandRecord, Event};
use grblcore_transport::Transport;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::clock::now_ms;
use crate::events::EventBus;

enum Message {
    Send {
        line: String,
        class: CommandClass,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Inbound(GrblResponse),
    Reset,
    Shutdown,
}

struct WaitingSend {
    line: String,
    class: CommandClass,
    reply: oneshot::Sender<CommandOutcome>,
}

struct PendingEntry {
    record: CommandRecord,
    reply: Option<oneshot::Sender<CommandOutcome>>,
    timed_out: bool,
}

/// A cloneable handle to the running command manager actor.
#[derive(Clone)]
pub struct CommandManager {
    tx: mpsc::UnboundedSender<Message>,
    bytes_in_flight: Arc<AtomicU64>,
    last_activity_ms: Arc<AtomicU64>,
}

impl CommandManager {
    /// Spawns the actor task and returns a handle to it. The task runs
    /// until every handle and the returned receiver's sender side is
    /// dropped, or [`CommandManager::shutdown`] is called.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        window: usize,
        response_timeout: Duration,
        events: EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let bytes_in_flight = Arc::new(AtomicU64::new(0));
        let last_activity_ms = Arc::new(AtomicU64::new(now_ms()));

        let actor = Actor {
            transport,
            window,
            bytes_in_flight: 0,
            pending: VecDeque::new(),
            waiting: Vec::new(),
            next_id: 0,
            response_timeout,
            events,
            bytes_in_flight_shared: Arc::clone(&bytes_in_flight),
            last_activity_shared: Arc::clone(&last_activity_ms),
        };
        tokio::spawn(actor.run(rx));

        Self { tx, bytes_in_flight, last_activity_ms }
    }

    /// Submit a line for transmission. Resolves once the flow-control
    /// window admits it *and* GRBL resolves (or times out) its reply.
    /// `Immediate`-class commands bypass the window and resolve as soon as
    /// the byte has been written.
    pub async fn send(&self, line: impl Into<String>, class: CommandClass) -> CommandOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::Send { line: line.into(), class, reply })
            .is_err()
        {
            return CommandOutcome::Cancelled { reason: "command manager shut down".into() };
        }
        rx.await
            .unwrap_or(CommandOutcome::Cancelled { reason: "command manager dropped reply".into() })
    }

    /// Feed a parsed inbound frame. Frames other than `Ok`/`Error`/`Alarm`
    /// are accepted but do not affect the pending queue, matching the
    /// "forward to the respective parser; do not pop pending" rule.
    pub fn on_inbound(&self, response: GrblResponse) {
        let _ = self.tx.send(Message::Inbound(response));
    }

    /// Drops every pending and waiting record as `Cancelled{reason: reset}`
    /// and zeroes the window. Used on soft reset (see the Open Question
    /// decision in DESIGN.md: this core treats `0x18` as a full buffer
    /// clear on every GRBL-family firmware it targets).
    pub fn reset(&self) {
        let _ = self.tx.send(Message::Reset);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight.load(Ordering::Relaxed) as usize
    }

    /// Milliseconds since the epoch of the most recent line admitted onto
    /// the wire. Read by `StatusPoller` to decide whether the "fast" poll
    /// interval should apply.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }
}

struct Actor {
    transport: Arc<dyn Transport>,
    window: usize,
    bytes_in_flight: usize,
    pending: VecDeque<PendingEntry>,
    waiting: Vec<WaitingSend>,
    next_id: u64,
    response_timeout: Duration,
    events: EventBus,
    bytes_in_flight_shared: Arc<AtomicU64>,
    last_activity_shared: Arc<AtomicU64>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        let check_every = (self.response_timeout / 10).max(Duration::from_millis(50));
        let mut timeout_check = tokio::time::interval(check_every);
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(Message::Send { line, class, reply }) => {
                            self.handle_send(line, class, reply);
                        }
                        Some(Message::Inbound(response)) => {
                            self.handle_inbound(response);
                        }
                        Some(Message::Reset) => {
                            self.handle_reset();
                        }
                        Some(Message::Shutdown) | None => {
                            self.handle_reset();
                            break;
                        }
                    }
                }
                _ = timeout_check.tick() => {
                    self.check_timeouts();
                }
            }
        }
    }

    fn sync_shared(&self) {
        self.bytes_in_flight_shared.store(self.bytes_in_flight as u64, Ordering::Relaxed);
    }

    fn handle_send(&mut self, line: String, class: CommandClass, reply: oneshot::Sender<CommandOutcome>) {
        if class == CommandClass::Immediate {
            let byte = line.as_bytes().first().copied().unwrap_or(b'?');
            let outcome = match self.transport.write_realtime_byte(byte) {
                Ok(()) => CommandOutcome::Ok,
                Err(e) => CommandOutcome::Cancelled { reason: e.to_string() },
            };
            let _ = reply.send(outcome);
            return;
        }

        self.waiting.push(WaitingSend { line, class, reply });
        self.admit_waiting();
    }

    /// Admits as many waiting sends as fit in the remaining window,
    /// preferring lower-numbered (`System`/`Status`) priority classes over
    /// `Program` lines when both would fit.
    fn admit_waiting(&mut self) {
        loop {
            let Some(index) = self.best_fitting_candidate() else { break };
            let candidate = self.waiting.remove(index);
            let bytes = candidate.line.len() + 1;

            let id = self.next_id;
            self.next_id += 1;
            let now = now_ms();
            let mut record = CommandRecord::new(id, candidate.line.clone(), candidate.class, now);
            record.sent_at_ms = Some(now);

            let mut line_with_terminator = candidate.line;
            line_with_terminator.push('\n');
            if let Err(e) = self.transport.write_bytes(line_with_terminator.as_bytes()) {
                let _ = candidate.reply.send(CommandOutcome::Cancelled { reason: e.to_string() });
                continue;
            }

            self.bytes_in_flight += bytes;
            self.sync_shared();
            self.last_activity_shared.store(now, Ordering::Relaxed);
            self.pending.push_back(PendingEntry { record, reply: Some(candidate.reply), timed_out: false });
        }
    }

    /// Index of the best waiting candidate that fits in the remaining
    /// window: lowest `CommandClass::priority` first, then
    /// earliest-submitted within that priority. Candidates that would
    /// overflow the window are skipped rather than blocking ones behind
    /// them, so a later-queued but smaller line can still jump ahead.
    fn best_fitting_candidate(&self) -> Option<usize> {
        self.waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| self.bytes_in_flight + w.line.len() + 1 <= self.window)
            .min_by_key(|(i, w)| (w.class.priority(), *i))
            .map(|(i, _)| i)
    }

    fn handle_inbound(&mut self, response: GrblResponse) {
        match response {
            GrblResponse::Ok => {
                self.resolve_oldest(CommandOutcome::Ok);
                self.admit_waiting();
            }
            GrblResponse::Error(code) => {
                self.resolve_oldest(CommandOutcome::Error { code });
                self.admit_waiting();
            }
            GrblResponse::Alarm(code) => {
                self.resolve_oldest(CommandOutcome::Alarm { code });
                self.drain_pending_as_cancelled("alarm");
                self.events.publish(Event::AlarmDetected { code });
                self.admit_waiting();
            }
            GrblResponse::Status(_) | GrblResponse::Feedback(_) | GrblResponse::Welcome(_) | GrblResponse::Unknown(_) => {
                // Forwarded to the status/state pipeline elsewhere; does
                // not affect pending correlation.
            }
        }
    }

    fn resolve_oldest(&mut self, outcome: CommandOutcome) {
        if let Some(mut entry) = self.pending.pop_front() {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(entry.record.window_bytes());
            self.sync_shared();
            entry.record.resolved_at_ms = Some(now_ms());
            if let Some(reply) = entry.reply.take() {
                let _ = reply.send(outcome);
            }
        }
    }

    fn drain_pending_as_cancelled(&mut self, reason: &str) {
        while let Some(mut entry) = self.pending.pop_front() {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(entry.record.window_bytes());
            if let Some(reply) = entry.reply.take() {
                let _ = reply.send(CommandOutcome::Cancelled { reason: reason.to_string() });
            }
        }
        self.sync_shared();
    }

    fn handle_reset(&mut self) {
        self.drain_pending_as_cancelled("reset");
        for waiting in self.waiting.drain(..) {
            let _ = waiting.reply.send(CommandOutcome::Cancelled { reason: "reset".into() });
        }
        self.bytes_in_flight = 0;
        self.sync_shared();
    }

    /// A record older than `response_timeout` resolves `Timeout` but stays
    /// in `pending`, keeping its window bytes held, because the controller
    /// may still be processing it: only a real ack or a full disconnect
    /// frees the slot.
    fn check_timeouts(&mut self) {
        let now = now_ms();
        let mut any_new_timeout = false;
        for entry in self.pending.iter_mut() {
            if entry.timed_out {
                continue;
            }
            let sent_at = match entry.record.sent_at_ms {
                Some(t) => t,
                None => continue,
            };
            if now.saturating_sub(sent_at) > self.response_timeout.as_millis() as u64 {
                entry.timed_out = true;
                any_new_timeout = true;
                if let Some(reply) = entry.reply.take() {
                    let _ = reply.send(CommandOutcome::Timeout);
                }
                warn!(line = %entry.record.line, "command timed out awaiting ok/error");
            }
        }
        if any_new_timeout {
            self.events.publish(Event::TransportStalled { bytes_in_flight: self.bytes_in_flight });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use grblcore_types::Result;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        written: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn write_bytes(&self, buf: &[u8]) -> Result<()> {
            self.written.lock().unwrap().push(String::from_utf8_lossy(buf).into_owned());
            Ok(())
        }
        fn write_realtime_byte(&self, byte: u8) -> Result<()> {
            self.written.lock().unwrap().push((byte as char).to_string());
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn manager_with_window(window: usize) -> (CommandManager, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::default());
        let events = EventBus::new();
        let manager = CommandManager::spawn(transport.clone(), window, Duration::from_millis(500), events);
        (manager, transport)
    }

    #[tokio::test]
    async fn ok_resolves_oldest_send_positionally() {
        let (manager, _transport) = manager_with_window(1024);
        let a = manager.send("G0 X1", CommandClass::Program);
        let b = manager.send("G0 X2", CommandClass::Program);
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.on_inbound(GrblResponse::Ok);
        let outcome_a = a.await;
        assert_eq!(outcome_a, CommandOutcome::Ok);

        manager.on_inbound(GrblResponse::Ok);
        let outcome_b = b.await;
        assert_eq!(outcome_b, CommandOutcome::Ok);
    }

    #[tokio::test]
    async fn window_blocks_until_space_frees() {
        let (manager, transport) = manager_with_window(10);
        // "G0 X1\n" is 6 bytes; two in flight would be 12 > 10.
        let first = manager.send("G0 X1", CommandClass::Program);
        let second_handle = manager.clone();
        let second = tokio::spawn(async move { second_handle.send("G0 X2", CommandClass::Program).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.written.lock().unwrap().len(), 1, "second send must not yet be on the wire");

        manager.on_inbound(GrblResponse::Ok);
        assert_eq!(first.await, CommandOutcome::Ok);

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.on_inbound(GrblResponse::Ok);
        assert_eq!(second.await.unwrap(), CommandOutcome::Ok);
    }

    #[tokio::test]
    async fn error_resolves_with_code() {
        let (manager, _t) = manager_with_window(1024);
        let fut = manager.send("G0 X1", CommandClass::Program);
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.on_inbound(GrblResponse::Error(20));
        assert_eq!(fut.await, CommandOutcome::Error { code: 20 });
    }

    #[tokio::test]
    async fn alarm_resolves_oldest_and_cancels_rest() {
        let (manager, _t) = manager_with_window(1024);
        let a = manager.send("G0 X1", CommandClass::Program);
        let b = manager.send("G0 X2", CommandClass::Program);
        tokio::time::sleep(Duration::from_millis(10)).await;

        manager.on_inbound(GrblResponse::Alarm(1));
        assert_eq!(a.await, CommandOutcome::Alarm { code: 1 });
        assert_eq!(b.await, CommandOutcome::Cancelled { reason: "alarm".into() });
    }

    #[tokio::test]
    async fn timeout_does_not_release_window() {
        let (manager, _t) = manager_with_window(1024);
        let fut = manager.send("G0 X1", CommandClass::Program);
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fut.await, CommandOutcome::Timeout);
        assert_eq!(manager.bytes_in_flight(), "G0 X1\n".len());
    }

    #[tokio::test]
    async fn immediate_class_bypasses_window() {
        let (manager, transport) = manager_with_window(0);
        let outcome = manager.send("?", CommandClass::Immediate).await;
        assert_eq!(outcome, CommandOutcome::Ok);
        assert_eq!(transport.written.lock().unwrap().last().unwrap(), "?");
    }

    #[tokio::test]
    async fn reset_cancels_pending_and_zeroes_window() {
        let (manager, _t) = manager_with_window(1024);
        let fut = manager.send("G0 X1", CommandClass::Program);
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.reset();
        assert_eq!(fut.await, CommandOutcome::Cancelled { reason: "reset".into() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.bytes_in_flight(), 0);
    }
}
