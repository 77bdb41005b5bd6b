/// Rate chunks are delivered at, regardless of the device rate.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Capture is mono; multi-channel devices are downmixed.
pub const CAPTURE_CHANNELS: u16 = 1;

/// Duration of one capture chunk.
pub const CHUNK_DURATION_MS: u64 = 100;

/// Samples per chunk at the capture rate.
pub const CHUNK_SAMPLES: usize =
    (CAPTURE_SAMPLE_RATE as u64 * CHUNK_DURATION_MS / 1000) as usize;
