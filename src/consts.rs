pub const VOICELINK_TOKEN: &str = "VOICELINK_TOKEN";
pub const VOICELINK_ENDPOINT: &str = "VOICELINK_ENDPOINT";

pub const DEFAULT_ENDPOINT: &str = "wss://agent.voicelink.dev/v1/session";

pub const AUTHORIZATION_HEADER: &str = "Authorization";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_GRACE_DELAY_MS: u64 = 250;
pub const DEFAULT_GREETING: &str = "Hello! I'm listening.";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Close code sent on graceful shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Outbound record queue depth. At 100ms per chunk this buffers several
/// seconds of audio before the channel starts shedding.
pub const OUTBOUND_QUEUE_SIZE: usize = 64;
