//! Public façade wiring every component together.
//!
//! Grounded on `src/firmware/grbl/controller.rs::GrblController`'s method
//! surface (`connect`/`disconnect`/`send_command`/`home`/`reset`/
//! `unlock`/`start_streaming`/`pause_streaming`/...), including its habit
//! of returning `anyhow::Result` at this one boundary while every
//! component underneath keeps its own `thiserror` type. `grblcore_types::Error`
//! implements `std::error::Error`, so `?` converts into `anyhow::Error`
//! for free, the same way `ControllerTrait`'s own internal errors do.

use std::sync::Arc;

use grblcore_protocol::GrblResponse;
use grblcore_transport::{InboundLine, SerialTransport, SerialTransportConfig, Transport};
use grblcore_types::{AlarmCode, CommandClass, CommandOutcome, Config, Event, MachineState, Position, StreamOptions, StreamSession, Wcs};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::alarm_recovery::AlarmRecoveryManager;
use crate::chunked_reader::ProgramReader;
use crate::command_manager::CommandManager;
use crate::events::{EventBus, Subscription};
use crate::retry::RetryManager;
use crate::state_manager::StateManager;
use crate::state_synchronizer::{CheckpointRequester, StateSynchronizer};
use crate::status_poller::StatusPoller;
use crate::streaming::StreamingEngine;

/// Everything spawned for one open connection; dropped wholesale on
/// disconnect.
struct Session {
    transport: Arc<dyn Transport>,
    commands: CommandManager,
    poller: StatusPoller,
    synchronizer: StateSynchronizer,
    streaming: StreamingEngine,
    recovery: Arc<AlarmRecoveryManager>,
    router: JoinHandle<()>,
    alarm_watch: JoinHandle<()>,
    connection_id: String,
}

pub struct Controller {
    config: Config,
    events: EventBus,
    state: StateManager,
    retry: Arc<RetryManager>,
    session: Option<Session>,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        let events = EventBus::new();
        let state = StateManager::new(events.clone());
        let retry = Arc::new(RetryManager::new(config.clone(), events.clone()));
        Self { config, events, state, retry, session: None }
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn snapshot_state(&self) -> MachineState {
        self.state.snapshot()
    }

    pub fn welcome_banner(&self) -> Option<String> {
        self.state.snapshot().controller_version
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map(|s| s.transport.is_connected()).unwrap_or(false)
    }

    pub async fn connect(&mut self, port_name: &str) -> anyhow::Result<()> {
        if self.session.is_some() {
            anyhow::bail!("already connected");
        }

        let connection_id = uuid::Uuid::new_v4().to_string();
        let transport_config = SerialTransportConfig { baud_rate: self.config.baud_rate, ..SerialTransportConfig::default() };
        let (transport, inbound) = SerialTransport::connect(port_name, &transport_config)?;
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let commands = CommandManager::spawn(
            Arc::clone(&transport),
            self.config.window_bytes,
            self.config.response_timeout(),
            self.events.clone(),
        );
        let poller = StatusPoller::spawn(self.config.clone(), commands.clone(), self.state.clone(), self.events.clone());
        let streaming = StreamingEngine::spawn(self.config.clone(), commands.clone(), self.state.clone(), self.events.clone(), Arc::clone(&self.retry));
        let checkpoint_requester: Arc<dyn CheckpointRequester> = Arc::new(streaming.clone());
        let synchronizer = StateSynchronizer::spawn(
            self.config.clone(),
            commands.clone(),
            self.state.clone(),
            self.events.clone(),
            Some(checkpoint_requester),
        );
        let recovery = Arc::new(AlarmRecoveryManager::new(self.config.clone(), commands.clone(), self.events.clone()));

        let router = spawn_router(inbound, commands.clone(), self.state.clone(), self.events.clone());
        let alarm_watch = spawn_alarm_watch(self.config.clone(), Arc::clone(&recovery), self.events.clone());

        info!(port = port_name, connection_id, "connected to controller");
        self.events.publish(Event::Connected { port: port_name.to_string() });

        self.session = Some(Session { transport, commands, poller, synchronizer, streaming, recovery, router, alarm_watch, connection_id });
        Ok(())
    }

    pub async fn disconnect(&mut self) -> anyhow::Result<()> {
        let Some(mut session) = self.session.take() else { return Ok(()) };
        session.router.abort();
        session.alarm_watch.abort();
        session.poller.stop().await;
        session.synchronizer.stop().await;
        session.commands.shutdown();
        session.transport.disconnect().await?;
        self.events.publish(Event::Disconnected);
        info!(connection_id = session.connection_id, "disconnected");
        Ok(())
    }

    fn session(&self) -> anyhow::Result<&Session> {
        self.session.as_ref().ok_or_else(|| anyhow::anyhow!("not connected"))
    }

    pub async fn send_command(&self, line: &str) -> anyhow::Result<CommandOutcome> {
        let session = self.session()?;
        let class = classify_line(line);
        Ok(session.commands.send(line, class).await)
    }

    pub async fn home(&self) -> anyhow::Result<()> {
        self.expect_ok("$H").await
    }

    pub async fn unlock(&self) -> anyhow::Result<()> {
        self.expect_ok("$X").await
    }

    /// Feed hold followed by a soft reset; the fastest stop this core can
    /// issue without waiting on any queued response.
    pub async fn emergency_stop(&self) -> anyhow::Result<()> {
        let session = self.session()?;
        session.streaming.stop();
        let _ = session.commands.send("!", CommandClass::Immediate).await;
        let _ = session.commands.send("\u{18}", CommandClass::Immediate).await;
        session.commands.reset();
        Ok(())
    }

    pub async fn start_stream(&self, reader: Box<dyn ProgramReader>, options: StreamOptions) -> anyhow::Result<()> {
        let session = self.session()?;
        session.streaming.start(reader, options).await?;
        Ok(())
    }

    pub fn pause_stream(&self) -> anyhow::Result<()> {
        self.session()?.streaming.pause();
        Ok(())
    }

    pub fn resume_stream(&self) -> anyhow::Result<()> {
        self.session()?.streaming.resume();
        Ok(())
    }

    pub fn stop_stream(&self) -> anyhow::Result<()> {
        self.session()?.streaming.stop();
        Ok(())
    }

    pub async fn stream_snapshot(&self) -> Option<StreamSession> {
        match &self.session {
            Some(session) => session.streaming.snapshot().await,
            None => None,
        }
    }

    pub fn set_active_wcs(&self, wcs: Wcs) {
        self.state.set_active_wcs(wcs);
    }

    pub fn set_wcs_offset(&self, wcs: Wcs, offset: Position) {
        self.state.set_wcs_offset(wcs, offset);
    }

    pub fn zero_active_wcs(&self) {
        self.state.zero_active_wcs();
    }

    /// Renders the current machine state as JSON, the way `main.rs`'s
    /// status endpoint builds its payload with `serde_json::json!`.
    pub fn snapshot_json(&self) -> anyhow::Result<String> {
        let snapshot = self.snapshot_state();
        Ok(serde_json::to_string(&serde_json::json!({
            "status": format!("{:?}", snapshot.status),
            "machine_position": snapshot.machine_position,
            "work_position": snapshot.work_position,
            "as_of": chrono::Utc::now().to_rfc3339(),
        }))?)
    }

    async fn expect_ok(&self, line: &str) -> anyhow::Result<()> {
        let session = self.session()?;
        match session.commands.send(line, CommandClass::System).await {
            CommandOutcome::Ok => Ok(()),
            other => anyhow::bail!("{line} did not return ok: {other:?}"),
        }
    }
}

fn classify_line(line: &str) -> CommandClass {
    let trimmed = line.trim_start();
    if trimmed.starts_with('$') {
        CommandClass::System
    } else {
        CommandClass::Motion
    }
}

fn spawn_router(
    mut inbound: tokio::sync::mpsc::UnboundedReceiver<InboundLine>,
    commands: CommandManager,
    state: StateManager,
    events: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            while let Some(line) = inbound.recv().await {
                match line {
                    InboundLine::Line(raw) => {
                        let response = grblcore_protocol::parse_response(&raw);
                        route_response(&commands, &state, &events, response);
                    }
                    InboundLine::Disconnected => {
                        warn!("transport reader reported disconnect");
                        events.publish(Event::ConnectionHealthChanged { healthy: false });
                        break;
                    }
                }
            }
        }
        .instrument(info_span!("grblcore_frame_router")),
    )
}

fn route_response(commands: &CommandManager, state: &StateManager, events: &EventBus, response: GrblResponse) {
    match &response {
        GrblResponse::Status(report) => state.apply_status(report),
        GrblResponse::Feedback(grblcore_protocol::Feedback::Gc(line)) => state.apply_modal(line),
        GrblResponse::Welcome(banner) => {
            state.record_welcome(banner);
            debug!(banner, "captured controller welcome banner");
            events.publish(Event::ConnectionHealthChanged { healthy: true });
        }
        GrblResponse::Unknown(raw) => debug!(raw, "unrecognized frame"),
        _ => {}
    }
    commands.on_inbound(response);
}

fn spawn_alarm_watch(config: Config, recovery: Arc<AlarmRecoveryManager>, events: EventBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut subscription = events.subscribe();
        while let Some(event) = subscription.recv().await {
            if let Event::AlarmDetected { code } = event {
                if !config.auto_recover_alarms {
                    continue;
                }
                let alarm = AlarmCode::from_code(code);
                if let Err(err) = recovery.recover(alarm).await {
                    warn!(code, error = %err, "automatic alarm recovery failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_line_routes_dollar_commands_as_system() {
        assert_eq!(classify_line("$H"), CommandClass::System);
        assert_eq!(classify_line("G0 X1"), CommandClass::Motion);
    }
}
