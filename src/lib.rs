mod capture;
mod channel;
mod config;
mod consts;
mod error;
mod permission;
mod session;
mod speech;

pub use voicelink_types as types;
pub use voicelink_utils as utils;

pub use capture::{CapturePipeline, MicCapturePipeline};
pub use channel::{connect, ChannelEvent, MessageChannel};
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use permission::{AcquiredMic, MicPermissionGate, PermissionGate};
pub use session::{
    Notice, SessionController, SessionEvent, SessionState, SessionStats,
};
pub use speech::{
    select_voice, PlaybackEvent, SpeechPlayer, SpeechSynthesizer, SynthesizedAudio, TtsPlayer,
    Utterance, VoiceInfo,
};
