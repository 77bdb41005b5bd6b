mod consts;

pub use consts::*;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// One capture chunk: ~100 ms of encoded microphone audio plus its position
/// in the capture sequence. Sequence numbers are strictly increasing within
/// a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    seq: u64,
    data: Base64EncodedAudioBytes,
}

impl AudioChunk {
    pub fn new(seq: u64, data: Base64EncodedAudioBytes) -> Self {
        Self { seq, data }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> Base64EncodedAudioBytes {
        self.data.clone()
    }

    pub fn into_data(self) -> Base64EncodedAudioBytes {
        self.data
    }
}

/// The microphone profile a session requests from the host. Hosts that
/// cannot honor the processing flags still deliver the rate and layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProfile {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: CAPTURE_CHANNELS,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}
