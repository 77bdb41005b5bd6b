use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};

use voicelink_types::audio::{AudioChunk, CaptureProfile};
use voicelink_types::{ChatMessage, InboundMessage, OutboundMessage};

use crate::capture::CapturePipeline;
use crate::channel::{self, ChannelEvent, MessageChannel};
use crate::config::Config;
use crate::consts;
use crate::error::{Error, Result};
use crate::permission::PermissionGate;
use crate::speech::{PlaybackEvent, SpeechPlayer};

mod machine;
mod stats;

pub use machine::{Effect, Event, Notice, SessionMachine, SessionState};
pub use stats::SessionStats;

/// What observers see. State changes mirror the machine exactly, including
/// the transient `Failed` right before the return to `Idle`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Notice(Notice),
}

enum Command {
    Toggle,
    Stop,
}

/// Results of work the driver farmed out to background tasks.
enum AsyncResult<D> {
    Permission(Result<D>),
    Connected(Result<MessageChannel>),
    GraceElapsed,
    CaptureFailed(String),
}

/// Handle onto a running session. Cheap to keep around; the driver task
/// owns all the devices and sockets and shuts down when this is dropped.
pub struct SessionController {
    command_tx: mpsc::Sender<Command>,
    state: Arc<Mutex<SessionState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    stats: Arc<Mutex<SessionStats>>,
}

impl SessionController {
    pub fn new<G, C, P>(config: Config, gate: G, capture: C, player: P) -> Self
    where
        G: PermissionGate,
        C: CapturePipeline<Device = G::Device>,
        P: SpeechPlayer,
    {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (async_tx, async_rx) = mpsc::channel(16);
        let (chunks_tx, chunks_rx) = mpsc::channel(64);
        let (playback_tx, playback_rx) = mpsc::channel(16);
        let (channel_events_tx, channel_events_rx) = mpsc::channel(64);
        let (events_tx, _) = broadcast::channel(64);
        let state = Arc::new(Mutex::new(SessionState::Idle));
        let stats = Arc::new(Mutex::new(SessionStats::new()));

        let driver = SessionDriver {
            config,
            gate: Arc::new(gate),
            capture,
            player,
            machine: SessionMachine::new(),
            channel: None,
            device: None,
            async_tx,
            chunks_tx,
            playback_tx,
            channel_events_tx,
            permission_task: None,
            connect_task: None,
            grace_task: None,
            state: state.clone(),
            events_tx: events_tx.clone(),
            stats: stats.clone(),
        };
        tokio::spawn(driver.run(
            command_rx,
            async_rx,
            channel_events_rx,
            chunks_rx,
            playback_rx,
        ));

        Self {
            command_tx,
            state,
            events_tx,
            stats,
        }
    }

    /// Press the one button: start from `Idle`, stop from anywhere else.
    pub async fn toggle(&self) {
        let _ = self.command_tx.send(Command::Toggle).await;
    }

    pub async fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop).await;
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().map(|s| *s).unwrap_or(SessionState::Idle)
    }

    /// Subscribe to state changes and notices. Each receiver sees events
    /// from its subscription point onward.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Owns every resource and runs every effect. Single-threaded over the
/// machine: inputs are applied one at a time, so effect order within one
/// event is preserved and no collaborator ever observes a half-transition.
struct SessionDriver<G, C, P>
where
    G: PermissionGate,
    C: CapturePipeline<Device = G::Device>,
    P: SpeechPlayer,
{
    config: Config,
    gate: Arc<G>,
    capture: C,
    player: P,
    machine: SessionMachine,
    channel: Option<MessageChannel>,
    device: Option<G::Device>,
    async_tx: mpsc::Sender<AsyncResult<G::Device>>,
    chunks_tx: mpsc::Sender<AudioChunk>,
    playback_tx: mpsc::Sender<PlaybackEvent>,
    channel_events_tx: mpsc::Sender<ChannelEvent>,
    permission_task: Option<tokio::task::JoinHandle<()>>,
    connect_task: Option<tokio::task::JoinHandle<()>>,
    grace_task: Option<tokio::task::JoinHandle<()>>,
    state: Arc<Mutex<SessionState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    stats: Arc<Mutex<SessionStats>>,
}

impl<G, C, P> SessionDriver<G, C, P>
where
    G: PermissionGate,
    C: CapturePipeline<Device = G::Device>,
    P: SpeechPlayer,
{
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut async_rx: mpsc::Receiver<AsyncResult<G::Device>>,
        mut channel_events_rx: mpsc::Receiver<ChannelEvent>,
        mut chunks_rx: mpsc::Receiver<AudioChunk>,
        mut playback_rx: mpsc::Receiver<PlaybackEvent>,
    ) {
        loop {
            let event = tokio::select! {
                command = command_rx.recv() => match command {
                    Some(Command::Toggle) => Event::ToggleRequested,
                    Some(Command::Stop) => Event::StopRequested,
                    // Controller dropped; shut the session down and exit.
                    None => break,
                },
                Some(result) = async_rx.recv() => match self.accept(result) {
                    Some(event) => event,
                    None => continue,
                },
                Some(channel_event) = channel_events_rx.recv() => match channel_event {
                    ChannelEvent::Inbound(InboundMessage::TextResponse { text }) => {
                        Event::TextResponse(text)
                    }
                    ChannelEvent::Inbound(InboundMessage::Ping) => Event::Ping,
                    ChannelEvent::Inbound(InboundMessage::Error { message }) => {
                        Event::AgentError(message)
                    }
                    ChannelEvent::Closed { code } => Event::ChannelClosed { code },
                    ChannelEvent::TransportError { message } => Event::ChannelFailed(message),
                },
                Some(chunk) = chunks_rx.recv() => Event::ChunkCaptured(chunk),
                Some(playback) = playback_rx.recv() => match playback {
                    PlaybackEvent::Started { id } => Event::PlaybackStarted { id },
                    PlaybackEvent::Ended { id } => Event::PlaybackEnded { id },
                },
            };

            let before = self.machine.state();
            let effects = self.machine.handle(event);
            for effect in effects {
                self.run_effect(effect).await;
            }
            if self.machine.state() != before {
                self.publish_state(self.machine.state());
            }
            if self.machine.state() == SessionState::Failed {
                // Failed is observable but never resting; teardown already
                // ran as one of the effects.
                self.machine.reset();
                self.publish_state(SessionState::Idle);
            }
        }
        self.teardown().await;
    }

    /// Admit a background-task result, holding on to the resource it
    /// carries. Results that arrive after the session moved on release
    /// their resource instead of entering the machine.
    fn accept(&mut self, result: AsyncResult<G::Device>) -> Option<Event> {
        match result {
            AsyncResult::Permission(Ok(device)) => {
                if self.machine.state() == SessionState::RequestingPermission {
                    self.device = Some(device);
                    Some(Event::PermissionGranted)
                } else {
                    // Dropping the acquisition releases the microphone.
                    tracing::debug!("dropping microphone acquired after session moved on");
                    None
                }
            }
            AsyncResult::Permission(Err(e)) => {
                tracing::warn!("microphone acquisition failed: {}", e);
                Some(Event::PermissionDenied)
            }
            AsyncResult::Connected(Ok(channel)) => {
                if self.machine.state() == SessionState::Connecting {
                    self.channel = Some(channel);
                    Some(Event::ChannelOpened)
                } else {
                    tracing::debug!("closing channel opened after session moved on");
                    tokio::spawn(channel.close(consts::CLOSE_NORMAL));
                    None
                }
            }
            AsyncResult::Connected(Err(e)) => Some(Event::ConnectFailed {
                timed_out: matches!(e, Error::ConnectTimeout(_)),
                message: e.to_string(),
            }),
            AsyncResult::GraceElapsed => Some(Event::GraceElapsed),
            AsyncResult::CaptureFailed(message) => Some(Event::CaptureFailed(message)),
        }
    }

    async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::RequestPermission => {
                let gate = self.gate.clone();
                let async_tx = self.async_tx.clone();
                let profile = CaptureProfile::default();
                self.permission_task = Some(tokio::spawn(async move {
                    let acquired = tokio::task::spawn_blocking(move || gate.acquire(&profile))
                        .await
                        .unwrap_or_else(|e| Err(Error::PermissionDenied(e.to_string())));
                    let _ = async_tx.send(AsyncResult::Permission(acquired)).await;
                }));
            }
            Effect::Connect => {
                let config = self.config.clone();
                let events = self.channel_events_tx.clone();
                let async_tx = self.async_tx.clone();
                self.connect_task = Some(tokio::spawn(async move {
                    let connected =
                        channel::connect(&config, events, consts::OUTBOUND_QUEUE_SIZE).await;
                    let _ = async_tx.send(AsyncResult::Connected(connected)).await;
                }));
            }
            Effect::SendGreeting => {
                if let Some(channel) = &self.channel {
                    channel.send(OutboundMessage::user_message(ChatMessage::user(
                        self.config.greeting(),
                    )));
                }
            }
            Effect::ScheduleGrace => {
                let delay = self.config.grace_delay();
                let async_tx = self.async_tx.clone();
                self.grace_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = async_tx.send(AsyncResult::GraceElapsed).await;
                }));
            }
            Effect::StartCapture => {
                let started = match self.device.clone() {
                    Some(device) => self.capture.start(device, self.chunks_tx.clone()),
                    None => Err(Error::Capture("no acquired microphone".to_string())),
                };
                if let Err(e) = started {
                    tracing::error!("capture failed to start: {}", e);
                    // try_send: the loop is the consumer of this queue.
                    let _ = self
                        .async_tx
                        .try_send(AsyncResult::CaptureFailed(e.to_string()));
                }
            }
            Effect::StopCapture => self.capture.stop(),
            Effect::ForwardChunk(chunk) => {
                if let Some(channel) = &self.channel {
                    channel.send(OutboundMessage::audio_input(chunk.into_data()));
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.chunk_sent();
                    }
                }
            }
            Effect::Speak(utterance) => {
                self.player.speak(utterance, self.playback_tx.clone());
                if let Ok(mut stats) = self.stats.lock() {
                    stats.reply_spoken();
                }
            }
            Effect::SendPong => {
                if let Some(channel) = &self.channel {
                    channel.send(OutboundMessage::Pong);
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.ping_answered();
                    }
                }
            }
            Effect::Notify(notice) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.notice_raised();
                }
                let _ = self.events_tx.send(SessionEvent::Notice(notice));
            }
            Effect::Teardown => self.teardown().await,
        }
    }

    /// Release everything a session run holds, in dependency order:
    /// pending tasks, then capture, then playback, then the channel with a
    /// normal close, then the microphone.
    async fn teardown(&mut self) {
        for task in [
            self.permission_task.take(),
            self.connect_task.take(),
            self.grace_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.capture.stop();
        self.player.cancel();
        if let Some(channel) = self.channel.take() {
            channel.close(consts::CLOSE_NORMAL).await;
        }
        self.device = None;
    }

    fn publish_state(&self, state: SessionState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
        let _ = self.events_tx.send(SessionEvent::StateChanged(state));
    }
}
