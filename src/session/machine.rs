use voicelink_types::audio::AudioChunk;

use crate::speech::Utterance;

/// The one source of truth for "what is the session doing". Collaborators
/// never keep their own is-connected or is-listening flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RequestingPermission,
    Connecting,
    Connected,
    Listening,
    Speaking,
    Failed,
}

/// User-facing notifications. Raised at most once per failure; a normal
/// stop raises none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PermissionDenied,
    ConnectTimeout,
    ConnectionLost { code: u16 },
    AgentError(String),
    Error(String),
}

/// Everything that can happen to a session, from the user, the channel,
/// the capture pipeline, or the player.
#[derive(Debug)]
pub enum Event {
    ToggleRequested,
    StopRequested,
    PermissionGranted,
    PermissionDenied,
    ChannelOpened,
    ConnectFailed { timed_out: bool, message: String },
    GraceElapsed,
    ChunkCaptured(AudioChunk),
    TextResponse(String),
    Ping,
    AgentError(String),
    PlaybackStarted { id: u64 },
    PlaybackEnded { id: u64 },
    ChannelClosed { code: u16 },
    ChannelFailed(String),
    CaptureFailed(String),
}

/// Side effects the driver executes, in order. The machine itself never
/// touches a device, a socket, or a clock.
#[derive(Debug, PartialEq)]
pub enum Effect {
    RequestPermission,
    Connect,
    SendGreeting,
    ScheduleGrace,
    StartCapture,
    StopCapture,
    ForwardChunk(AudioChunk),
    Speak(Utterance),
    SendPong,
    Notify(Notice),
    Teardown,
}

/// Transition table for the session lifecycle. Pure: `handle` computes the
/// next state and the effects to run, nothing else. Invariants encoded
/// here rather than scattered across handlers:
/// capture runs only in `Listening`, so capture and playback are never
/// active together; every fatal path emits exactly one `Teardown`; stale
/// playback events from a cancelled utterance are ignored.
pub struct SessionMachine {
    state: SessionState,
    current_utterance: Option<u64>,
    next_utterance_id: u64,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            current_utterance: None,
            next_utterance_id: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Return to `Idle` after the driver finished a teardown that went
    /// through `Failed`.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.current_utterance = None;
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        use SessionState::*;

        match event {
            Event::ToggleRequested => match self.state {
                Idle => {
                    self.state = RequestingPermission;
                    vec![Effect::RequestPermission]
                }
                // Toggle anywhere else means stop, never a second start.
                _ => self.stop(),
            },
            Event::StopRequested => self.stop(),
            Event::PermissionGranted => match self.state {
                RequestingPermission => {
                    self.state = Connecting;
                    vec![Effect::Connect]
                }
                _ => vec![],
            },
            Event::PermissionDenied => match self.state {
                RequestingPermission => self.fail(Notice::PermissionDenied),
                _ => vec![],
            },
            Event::ChannelOpened => match self.state {
                Connecting => {
                    self.state = Connected;
                    vec![Effect::SendGreeting, Effect::ScheduleGrace]
                }
                _ => vec![],
            },
            Event::ConnectFailed { timed_out, message } => match self.state {
                Connecting => {
                    let notice = if timed_out {
                        Notice::ConnectTimeout
                    } else {
                        Notice::Error(message)
                    };
                    self.fail(notice)
                }
                _ => vec![],
            },
            Event::GraceElapsed => match self.state {
                Connected => {
                    self.state = Listening;
                    vec![Effect::StartCapture]
                }
                // A reply can preempt the grace delay; resume then comes
                // from the playback end, never this timer.
                _ => vec![],
            },
            Event::ChunkCaptured(chunk) => match self.state {
                Listening => vec![Effect::ForwardChunk(chunk)],
                // Tail chunks after a capture stop are dropped here.
                _ => vec![],
            },
            Event::TextResponse(text) => match self.state {
                Connected | Listening | Speaking => {
                    let was_listening = self.state == Listening;
                    let id = self.next_utterance_id;
                    self.next_utterance_id += 1;
                    self.current_utterance = Some(id);
                    self.state = Speaking;
                    let speak = Effect::Speak(Utterance { id, text });
                    if was_listening {
                        // Capture must be down before any audio can start.
                        vec![Effect::StopCapture, speak]
                    } else {
                        vec![speak]
                    }
                }
                _ => vec![],
            },
            Event::Ping => match self.state {
                Connected | Listening | Speaking => vec![Effect::SendPong],
                _ => vec![],
            },
            Event::AgentError(message) => match self.state {
                Connected | Listening | Speaking => {
                    vec![Effect::Notify(Notice::AgentError(message))]
                }
                _ => vec![],
            },
            Event::PlaybackStarted { .. } => vec![],
            Event::PlaybackEnded { id } => match self.state {
                Speaking if self.current_utterance == Some(id) => {
                    self.current_utterance = None;
                    self.state = Listening;
                    vec![Effect::StartCapture]
                }
                _ => vec![],
            },
            Event::ChannelClosed { code } => match self.state {
                Connected | Listening | Speaking => {
                    if code == 1000 {
                        self.stop()
                    } else {
                        self.fail(Notice::ConnectionLost { code })
                    }
                }
                _ => vec![],
            },
            Event::ChannelFailed(message) => match self.state {
                Connecting | Connected | Listening | Speaking => {
                    tracing::warn!("channel transport failure: {}", message);
                    self.fail(Notice::ConnectionLost { code: 1006 })
                }
                _ => vec![],
            },
            Event::CaptureFailed(message) => match self.state {
                Idle => vec![],
                _ => self.fail(Notice::Error(message)),
            },
        }
    }

    fn stop(&mut self) -> Vec<Effect> {
        match self.state {
            SessionState::Idle => vec![],
            _ => {
                self.state = SessionState::Idle;
                self.current_utterance = None;
                vec![Effect::Teardown]
            }
        }
    }

    fn fail(&mut self, notice: Notice) -> Vec<Effect> {
        self.state = SessionState::Failed;
        self.current_utterance = None;
        vec![Effect::Notify(notice), Effect::Teardown]
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64) -> AudioChunk {
        AudioChunk::new(seq, "AAAA".to_string())
    }

    fn advance_to_listening(machine: &mut SessionMachine) {
        machine.handle(Event::ToggleRequested);
        machine.handle(Event::PermissionGranted);
        machine.handle(Event::ChannelOpened);
        machine.handle(Event::GraceElapsed);
        assert_eq!(machine.state(), SessionState::Listening);
    }

    #[test]
    fn toggle_from_idle_requests_permission() {
        let mut machine = SessionMachine::new();
        let effects = machine.handle(Event::ToggleRequested);
        assert_eq!(machine.state(), SessionState::RequestingPermission);
        assert_eq!(effects, vec![Effect::RequestPermission]);
    }

    #[test]
    fn happy_path_reaches_listening() {
        let mut machine = SessionMachine::new();
        machine.handle(Event::ToggleRequested);

        let effects = machine.handle(Event::PermissionGranted);
        assert_eq!(machine.state(), SessionState::Connecting);
        assert_eq!(effects, vec![Effect::Connect]);

        let effects = machine.handle(Event::ChannelOpened);
        assert_eq!(machine.state(), SessionState::Connected);
        assert_eq!(effects, vec![Effect::SendGreeting, Effect::ScheduleGrace]);

        let effects = machine.handle(Event::GraceElapsed);
        assert_eq!(machine.state(), SessionState::Listening);
        assert_eq!(effects, vec![Effect::StartCapture]);
    }

    #[test]
    fn permission_denied_notifies_and_tears_down() {
        let mut machine = SessionMachine::new();
        machine.handle(Event::ToggleRequested);
        let effects = machine.handle(Event::PermissionDenied);
        assert_eq!(machine.state(), SessionState::Failed);
        assert_eq!(
            effects,
            vec![Effect::Notify(Notice::PermissionDenied), Effect::Teardown]
        );
        machine.reset();
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn connect_timeout_raises_the_timeout_notice() {
        let mut machine = SessionMachine::new();
        machine.handle(Event::ToggleRequested);
        machine.handle(Event::PermissionGranted);
        let effects = machine.handle(Event::ConnectFailed {
            timed_out: true,
            message: "deadline elapsed".to_string(),
        });
        assert_eq!(
            effects,
            vec![Effect::Notify(Notice::ConnectTimeout), Effect::Teardown]
        );
    }

    #[test]
    fn reply_stops_capture_before_speaking() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);

        let effects = machine.handle(Event::TextResponse("hi".to_string()));
        assert_eq!(machine.state(), SessionState::Speaking);
        assert_eq!(
            effects,
            vec![
                Effect::StopCapture,
                Effect::Speak(Utterance {
                    id: 0,
                    text: "hi".to_string()
                })
            ]
        );
    }

    #[test]
    fn reply_during_grace_skips_capture_stop() {
        let mut machine = SessionMachine::new();
        machine.handle(Event::ToggleRequested);
        machine.handle(Event::PermissionGranted);
        machine.handle(Event::ChannelOpened);

        let effects = machine.handle(Event::TextResponse("early".to_string()));
        assert_eq!(machine.state(), SessionState::Speaking);
        assert_eq!(
            effects,
            vec![Effect::Speak(Utterance {
                id: 0,
                text: "early".to_string()
            })]
        );

        // The grace timer firing now must not start capture mid-playback.
        assert_eq!(machine.handle(Event::GraceElapsed), vec![]);
    }

    #[test]
    fn playback_end_resumes_capture_only_for_current_utterance() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);
        machine.handle(Event::TextResponse("first".to_string()));
        machine.handle(Event::TextResponse("second".to_string()));

        // End of the cancelled first utterance changes nothing.
        assert_eq!(machine.handle(Event::PlaybackEnded { id: 0 }), vec![]);
        assert_eq!(machine.state(), SessionState::Speaking);

        let effects = machine.handle(Event::PlaybackEnded { id: 1 });
        assert_eq!(machine.state(), SessionState::Listening);
        assert_eq!(effects, vec![Effect::StartCapture]);
    }

    #[test]
    fn back_to_back_replies_speak_last_write() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);
        machine.handle(Event::TextResponse("first".to_string()));
        let effects = machine.handle(Event::TextResponse("second".to_string()));
        // Capture is already stopped; only the new utterance is spoken.
        assert_eq!(
            effects,
            vec![Effect::Speak(Utterance {
                id: 1,
                text: "second".to_string()
            })]
        );
    }

    #[test]
    fn chunks_forward_only_while_listening() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);
        assert_eq!(
            machine.handle(Event::ChunkCaptured(chunk(0))),
            vec![Effect::ForwardChunk(chunk(0))]
        );

        machine.handle(Event::TextResponse("hi".to_string()));
        assert_eq!(machine.handle(Event::ChunkCaptured(chunk(1))), vec![]);
    }

    #[test]
    fn ping_answers_pong_without_state_change() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);
        assert_eq!(machine.handle(Event::Ping), vec![Effect::SendPong]);
        assert_eq!(machine.state(), SessionState::Listening);
    }

    #[test]
    fn agent_error_notifies_but_does_not_end_the_session() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);
        let effects = machine.handle(Event::AgentError("overloaded".to_string()));
        assert_eq!(
            effects,
            vec![Effect::Notify(Notice::AgentError("overloaded".to_string()))]
        );
        assert_eq!(machine.state(), SessionState::Listening);
    }

    #[test]
    fn toggle_while_connecting_tears_down() {
        let mut machine = SessionMachine::new();
        machine.handle(Event::ToggleRequested);
        machine.handle(Event::PermissionGranted);
        assert_eq!(machine.state(), SessionState::Connecting);

        let effects = machine.handle(Event::ToggleRequested);
        assert_eq!(machine.state(), SessionState::Idle);
        assert_eq!(effects, vec![Effect::Teardown]);
    }

    #[test]
    fn abnormal_close_notifies_connection_lost() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);
        let effects = machine.handle(Event::ChannelClosed { code: 1006 });
        assert_eq!(
            effects,
            vec![
                Effect::Notify(Notice::ConnectionLost { code: 1006 }),
                Effect::Teardown
            ]
        );
    }

    #[test]
    fn normal_close_tears_down_silently() {
        let mut machine = SessionMachine::new();
        advance_to_listening(&mut machine);
        let effects = machine.handle(Event::ChannelClosed { code: 1000 });
        assert_eq!(effects, vec![Effect::Teardown]);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn stop_is_a_no_op_from_idle() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.handle(Event::StopRequested), vec![]);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn late_events_after_stop_are_ignored() {
        let mut machine = SessionMachine::new();
        machine.handle(Event::ToggleRequested);
        machine.handle(Event::StopRequested);
        assert_eq!(machine.state(), SessionState::Idle);

        assert_eq!(machine.handle(Event::PermissionGranted), vec![]);
        assert_eq!(machine.handle(Event::ChannelOpened), vec![]);
        assert_eq!(machine.handle(Event::GraceElapsed), vec![]);
        assert_eq!(machine.handle(Event::PlaybackEnded { id: 0 }), vec![]);
        assert_eq!(machine.handle(Event::ChannelClosed { code: 1006 }), vec![]);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn toggle_sequences_always_land_in_a_known_state() {
        // Drive the machine through every toggle interleaving of a short
        // session and check the state stays in the defined set.
        let events: Vec<fn() -> Event> = vec![
            || Event::ToggleRequested,
            || Event::PermissionGranted,
            || Event::ToggleRequested,
            || Event::ChannelOpened,
            || Event::ToggleRequested,
            || Event::GraceElapsed,
            || Event::ToggleRequested,
        ];
        let mut machine = SessionMachine::new();
        for make in &events {
            machine.handle(make());
            assert!(matches!(
                machine.state(),
                SessionState::Idle
                    | SessionState::RequestingPermission
                    | SessionState::Connecting
                    | SessionState::Connected
                    | SessionState::Listening
                    | SessionState::Speaking
                    | SessionState::Failed
            ));
        }
        machine.handle(Event::StopRequested);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn stop_from_every_reachable_state_lands_idle() {
        let stages: Vec<Vec<fn() -> Event>> = vec![
            vec![],
            vec![|| Event::ToggleRequested],
            vec![|| Event::ToggleRequested, || Event::PermissionGranted],
            vec![
                || Event::ToggleRequested,
                || Event::PermissionGranted,
                || Event::ChannelOpened,
            ],
            vec![
                || Event::ToggleRequested,
                || Event::PermissionGranted,
                || Event::ChannelOpened,
                || Event::GraceElapsed,
            ],
            vec![
                || Event::ToggleRequested,
                || Event::PermissionGranted,
                || Event::ChannelOpened,
                || Event::GraceElapsed,
                || Event::TextResponse("hi".to_string()),
            ],
        ];
        for stage in stages {
            let mut machine = SessionMachine::new();
            for make in stage {
                machine.handle(make());
            }
            machine.handle(Event::StopRequested);
            assert_eq!(machine.state(), SessionState::Idle);
            // A second stop stays quiet.
            assert_eq!(machine.handle(Event::StopRequested), vec![]);
        }
    }
}
