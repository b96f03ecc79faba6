//! The streaming engine: feeds a program to the controller under a
//! line-count look-ahead window, on top of `CommandManager`'s own
//! byte-count window, with checkpointing, pause/resume, and
//! error-strategy handling.
//!
//! Structured as an actor like [`crate::command_manager::CommandManager`]
//! rather than the synchronous `send_command` loop in
//! `src/firmware/grbl/controller.rs::GrblController::stream_gcode`: the
//! state machine here has to react to pause/stop/checkpoint requests
//! while lines are still in flight, which a single blocking loop can't do
//! without its own command channel, so the actor shape the rest of this
//! core already uses was the natural fit.

use std::sync::Arc;
use std::time::Duration;

use grblcore_types::{
    Checkpoint, CommandClass, CommandOutcome, Config, Error, ErrorStrategy, Event, SessionPhase,
    StreamOptions, StreamSession, StreamStats,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chunked_reader::ProgramReader;
use crate::clock::now_ms;
use crate::command_manager::CommandManager;
use crate::events::EventBus;
use crate::retry::RetryManager;
use crate::state_manager::StateManager;
use crate::state_synchronizer::CheckpointRequester;

enum ControlMsg {
    Start {
        reader: Box<dyn ProgramReader>,
        options: StreamOptions,
        reply: oneshot::Sender<grblcore_types::Result<()>>,
    },
    Pause,
    Resume,
    Stop,
    Snapshot(oneshot::Sender<Option<StreamSession>>),
    RequestCheckpoint,
}

struct LineOutcome {
    index: usize,
    outcome: CommandOutcome,
}

#[derive(Clone)]
pub struct StreamingEngine {
    tx: mpsc::UnboundedSender<ControlMsg>,
}

impl StreamingEngine {
    pub fn spawn(
        config: Config,
        commands: CommandManager,
        state: StateManager,
        events: EventBus,
        retry: Arc<RetryManager>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            config,
            commands,
            state,
            events,
            retry,
            session: None,
            options: StreamOptions::default(),
            reader: None,
            in_flight: 0,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    pub async fn start(
        &self,
        reader: Box<dyn ProgramReader>,
        options: StreamOptions,
    ) -> grblcore_types::Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ControlMsg::Start { reader, options, reply }).is_err() {
            return Err(Error::other("streaming engine shut down"));
        }
        rx.await.unwrap_or_else(|_| Err(Error::other("streaming engine dropped reply")))
    }

    pub fn pause(&self) {
        let _ = self.tx.send(ControlMsg::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(ControlMsg::Resume);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(ControlMsg::Stop);
    }

    pub async fn snapshot(&self) -> Option<StreamSession> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ControlMsg::Snapshot(reply)).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}

impl CheckpointRequester for StreamingEngine {
    fn request_checkpoint(&self) {
        let _ = self.tx.send(ControlMsg::RequestCheckpoint);
    }
}

struct Actor {
    config: Config,
    commands: CommandManager,
    state: StateManager,
    events: EventBus,
    retry: Arc<RetryManager>,
    session: Option<StreamSession>,
    options: StreamOptions,
    reader: Option<Box<dyn ProgramReader>>,
    in_flight: usize,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControlMsg>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<LineOutcome>();
        let mut progress_tick = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(ControlMsg::Start { reader, options, reply }) => {
                            let result = self.handle_start(reader, options);
                            progress_tick = tokio::time::interval(Duration::from_millis(self.options.progress_interval_ms));
                            let _ = reply.send(result);
                        }
                        Some(ControlMsg::Pause) => self.handle_pause().await,
                        Some(ControlMsg::Resume) => self.handle_resume().await,
                        Some(ControlMsg::Stop) => self.handle_stop().await,
                        Some(ControlMsg::Snapshot(reply)) => {
                            let _ = reply.send(self.session.clone());
                        }
                        Some(ControlMsg::RequestCheckpoint) => self.create_checkpoint(),
                        None => break,
                    }
                }
                Some(line_done) = done_rx.recv() => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.handle_line_outcome(line_done).await;
                }
                _ = progress_tick.tick(), if self.is_running() => {
                    self.emit_progress();
                }
                _ = std::future::ready(()), if self.should_feed() => {
                    self.feed_next(&done_tx);
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.session.as_ref().map(|s| s.phase), Some(SessionPhase::Running))
    }

    fn should_feed(&self) -> bool {
        self.is_running()
            && self.in_flight < self.options.look_ahead_lines
            && self.reader.as_ref().map(|r| !r.is_eof()).unwrap_or(false)
    }

    fn handle_start(
        &mut self,
        mut reader: Box<dyn ProgramReader>,
        options: StreamOptions,
    ) -> grblcore_types::Result<()> {
        if self.is_running() {
            return Err(Error::other("a stream is already running"));
        }

        if let Some(checkpoint) = options.resume_from.clone() {
            reader.seek_to_line(checkpoint.line_index + 1)?;
        }

        let mut session = StreamSession::new(now_ms(), options.resume_from.as_ref());
        session.total_lines = reader.total_lines();
        let total_lines = session.total_lines;

        self.options = options;
        self.session = Some(session);
        self.reader = Some(reader);
        self.in_flight = 0;

        self.events.publish(Event::StreamStarted { total_lines });
        info!(total_lines = ?total_lines, "stream started");
        Ok(())
    }

    /// Feed hold: realtime `!` goes out immediately, ahead of anything
    /// still queued behind the flow-control window.
    async fn handle_pause(&mut self) {
        let phase = self.session.as_ref().map(|s| s.phase);
        if phase != Some(SessionPhase::Running) {
            return;
        }
        let _ = self.commands.send("!", CommandClass::Immediate).await;
        if let Some(session) = self.session.as_mut() {
            session.phase = SessionPhase::Paused;
        }
        self.events.publish(Event::StreamPaused);
    }

    /// Cycle start: realtime `~` resumes motion held by a prior feed hold.
    async fn handle_resume(&mut self) {
        let phase = self.session.as_ref().map(|s| s.phase);
        if phase != Some(SessionPhase::Paused) {
            return;
        }
        let _ = self.commands.send("~", CommandClass::Immediate).await;
        if let Some(session) = self.session.as_mut() {
            session.phase = SessionPhase::Running;
        }
        self.events.publish(Event::StreamResumed);
    }

    /// Soft reset on the wire, then drain every line still waiting on a
    /// reply so in-flight lines resolve `Cancelled` instead of hanging
    /// until their timeout.
    async fn handle_stop(&mut self) {
        let phase = self.session.as_ref().map(|s| s.phase);
        if matches!(phase, None | Some(SessionPhase::Stopped) | Some(SessionPhase::Completed)) {
            return;
        }
        let _ = self.commands.send("\u{18}", CommandClass::Immediate).await;
        self.commands.reset();
        if let Some(session) = self.session.as_mut() {
            session.phase = SessionPhase::Stopped;
        }
        let stats = self.build_stats();
        self.events.publish(Event::StreamStopped { reason: "host requested stop".to_string(), stats });
    }

    fn feed_next(&mut self, done_tx: &mpsc::UnboundedSender<LineOutcome>) {
        let Some(reader) = self.reader.as_mut() else { return };
        let line = match reader.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.maybe_complete();
                return;
            }
            Err(err) => {
                warn!(error = %err, "program reader failed, stopping stream");
                self.fail_stream(err.to_string());
                return;
            }
        };
        let index = reader.current_line_index().saturating_sub(1);
        self.dispatch_line(index, line, done_tx.clone());
    }

    fn dispatch_line(&mut self, index: usize, line: String, done_tx: mpsc::UnboundedSender<LineOutcome>) {
        self.in_flight += 1;
        if let Some(session) = self.session.as_mut() {
            session.current_line_index = index;
        }

        if self.options.dry_run {
            self.state.apply_acknowledged_line(&line);
            let delay = Duration::from_millis(self.options.dry_run_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = done_tx.send(LineOutcome { index, outcome: CommandOutcome::Ok });
            });
            return;
        }

        let commands = self.commands.clone();
        let state = self.state.clone();
        let retry = Arc::clone(&self.retry);
        let key = format!("line-{index}");
        tokio::spawn(async move {
            let to_send = line.clone();
            let outcome = retry.retry_command(&key, || commands.send(to_send.clone(), CommandClass::Program)).await;
            if outcome == CommandOutcome::Ok {
                state.apply_acknowledged_line(&line);
            }
            let _ = done_tx.send(LineOutcome { index, outcome });
        });
    }

    async fn handle_line_outcome(&mut self, line: LineOutcome) {
        match line.outcome {
            CommandOutcome::Ok => {
                if let Some(session) = self.session.as_mut() {
                    session.lines_acked += 1;
                }
                self.maybe_checkpoint();
                self.maybe_complete();
            }
            CommandOutcome::Alarm { code } => {
                warn!(code, "alarm during streaming, stopping");
                self.fail_stream(format!("alarm:{code}"));
            }
            CommandOutcome::Error { code } => {
                if let Some(session) = self.session.as_mut() {
                    session.error_count += 1;
                }
                self.events.publish(Event::CommandError { line: line.index, code });
                self.handle_program_error(line.index, code).await;
            }
            CommandOutcome::Timeout => {
                debug!(line = line.index, "line timed out after exhausting retries");
                self.fail_stream(format!("line {} timed out after retries", line.index));
            }
            CommandOutcome::Cancelled { reason } => {
                self.fail_stream(reason);
            }
        }
    }

    async fn handle_program_error(&mut self, index: usize, code: u8) {
        match self.options.error_strategy {
            ErrorStrategy::Stop => {
                self.fail_stream(format!("line {index} rejected: error:{code}"));
            }
            ErrorStrategy::Continue => {
                debug!(line = index, code, "continuing past program error per configured strategy");
                self.maybe_complete();
            }
            ErrorStrategy::Prompt => {
                self.handle_pause().await;
            }
        }
    }

    /// Drains everything still waiting on a reply in `CommandManager` (the
    /// pending queue is already cleared on `Alarm`, but not on a reader
    /// failure or a cancelled/timed-out line) before reporting the stop.
    fn fail_stream(&mut self, reason: String) {
        self.commands.reset();
        if let Some(session) = self.session.as_mut() {
            session.phase = SessionPhase::Stopped;
        }
        let stats = self.build_stats();
        self.events.publish(Event::StreamStopped { reason, stats });
    }

    fn maybe_checkpoint(&mut self) {
        let interval = self.options.checkpoint_interval_lines.max(1);
        let due = self
            .session
            .as_ref()
            .map(|s| s.lines_acked > 0 && s.lines_acked % interval == 0)
            .unwrap_or(false);
        if due {
            self.create_checkpoint();
        }
    }

    fn create_checkpoint(&mut self) {
        let Some(session) = self.session.as_ref() else { return };
        if !matches!(session.phase, SessionPhase::Running | SessionPhase::Paused) {
            return;
        }
        let snapshot = self.state.snapshot();
        let checkpoint = Checkpoint {
            line_index: session.current_line_index,
            machine_position: snapshot.machine_position,
            modal: snapshot.modal,
            created_at_ms: now_ms(),
        };
        let line_index = checkpoint.line_index;
        if let Some(session) = self.session.as_mut() {
            session.checkpoints.push(checkpoint);
        }
        self.events.publish(Event::CheckpointCreated { line_index });
    }

    fn maybe_complete(&mut self) {
        let at_eof = self.reader.as_ref().map(|r| r.is_eof()).unwrap_or(true);
        if !at_eof || self.in_flight > 0 {
            return;
        }
        let Some(session) = self.session.as_mut() else { return };
        if matches!(session.phase, SessionPhase::Completed | SessionPhase::Stopped) {
            return;
        }
        session.phase = SessionPhase::Completed;
        let stats = self.build_stats();
        self.events.publish(Event::StreamCompleted { stats });
    }

    fn build_stats(&self) -> StreamStats {
        match self.session.as_ref() {
            Some(session) => StreamStats {
                lines_total: session.total_lines.unwrap_or(session.current_line_index + 1),
                lines_acked: session.lines_acked,
                errors: session.error_count,
                elapsed_ms: now_ms().saturating_sub(session.start_ms),
            },
            None => StreamStats { lines_total: 0, lines_acked: 0, errors: 0, elapsed_ms: 0 },
        }
    }

    fn emit_progress(&mut self) {
        if let Some(session) = self.session.as_ref() {
            self.events.publish(Event::StreamProgress {
                current_line: session.current_line_index,
                lines_acked: session.lines_acked,
                total_lines: session.total_lines,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked_reader::InMemoryProgramReader;
    use async_trait::async_trait;
    use grblcore_protocol::GrblResponse;
    use grblcore_types::Result;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        written: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl grblcore_transport::Transport for FakeTransport {
        fn write_bytes(&self, buf: &[u8]) -> Result<()> {
            self.written.lock().unwrap().push(String::from_utf8_lossy(buf).into_owned());
            Ok(())
        }
        fn write_realtime_byte(&self, _byte: u8) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn harness() -> (StreamingEngine, CommandManager, EventBus) {
        let events = EventBus::new();
        let transport = Arc::new(FakeTransport::default());
        let commands = CommandManager::spawn(transport, 1024, Duration::from_millis(500), events.clone());
        let state = StateManager::new(events.clone());
        let retry = Arc::new(RetryManager::new(Config::default(), events.clone()));
        let engine = StreamingEngine::spawn(Config::default(), commands.clone(), state, events.clone(), retry);
        (engine, commands, events)
    }

    #[tokio::test]
    async fn dry_run_completes_without_touching_the_wire() {
        let (engine, _commands, mut events) = {
            let (e, c, ev) = harness();
            (e, c, ev.subscribe())
        };
        let reader = Box::new(InMemoryProgramReader::new("G0 X0\nG0 X1\n"));
        let options = StreamOptions { dry_run: true, dry_run_delay_ms: 1, ..StreamOptions::default() };
        engine.start(reader, options).await.unwrap();

        let mut completed = false;
        for _ in 0..50 {
            if let Ok(Some(Event::StreamCompleted { .. })) =
                tokio::time::timeout(Duration::from_millis(100), events.recv()).await
            {
                completed = true;
                break;
            }
        }
        assert!(completed, "expected StreamCompleted within the timeout window");
    }

    #[tokio::test]
    async fn program_error_with_stop_strategy_ends_the_stream() {
        let (engine, commands, mut events) = {
            let (e, c, ev) = harness();
            (e, c, ev.subscribe())
        };
        let reader = Box::new(InMemoryProgramReader::new("G0 X0\n"));
        engine.start(reader, StreamOptions::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        commands.on_inbound(GrblResponse::Error(20));

        let mut stopped = false;
        for _ in 0..50 {
            if let Ok(Some(Event::StreamStopped { .. })) =
                tokio::time::timeout(Duration::from_millis(100), events.recv()).await
            {
                stopped = true;
                break;
            }
        }
        assert!(stopped, "expected StreamStopped after an unrecovered program error");
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_phase() {
        let (engine, _commands, _events) = harness();
        let reader = Box::new(InMemoryProgramReader::new("G0 X0\nG0 X1\nG0 X2\n"));
        engine.start(reader, StreamOptions::default()).await.unwrap();
        engine.pause();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.snapshot().await.unwrap().phase, SessionPhase::Paused);
        engine.resume();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.snapshot().await.unwrap().phase, SessionPhase::Running);
    }
}
