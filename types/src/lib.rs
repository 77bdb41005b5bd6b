pub mod audio;
pub mod message;
pub mod protocol;

pub use audio::{AudioChunk, Base64EncodedAudioBytes, CaptureProfile};
pub use message::{ChatMessage, Role};
pub use protocol::{InboundMessage, OutboundMessage};
