use std::f32::consts::TAU;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

use voicelink::{
    Config, MicCapturePipeline, MicPermissionGate, Result, SessionController, SessionEvent,
    SpeechSynthesizer, SynthesizedAudio, TtsPlayer, VoiceInfo,
};

const CHIME_SAMPLE_RATE: u32 = 24_000;

/// Stand-in synthesizer so the demo runs without a speech engine: every
/// reply becomes a short chime, longer for longer replies.
struct ChimeSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ChimeSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![]
    }

    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<SynthesizedAudio> {
        let seconds = (0.3 + text.len() as f32 * 0.01).min(2.0);
        let total = (CHIME_SAMPLE_RATE as f32 * seconds) as usize;
        let samples = (0..total)
            .map(|i| {
                let t = i as f32 / CHIME_SAMPLE_RATE as f32;
                let fade = 1.0 - i as f32 / total as f32;
                (TAU * 440.0 * t).sin() * 0.2 * fade
            })
            .collect();
        Ok(SynthesizedAudio {
            samples,
            sample_rate: CHIME_SAMPLE_RATE,
        })
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let config = Config::builder().build();

    let gate = MicPermissionGate::new(config.input_device());
    let capture = MicCapturePipeline::new();
    let player = TtsPlayer::new(
        Arc::new(ChimeSynthesizer),
        config.voice().map(str::to_string),
        config.language(),
    )
    .with_output_device(config.output_device());

    let controller = SessionController::new(config, gate, capture, player);
    let mut events = controller.events();

    println!("starting session, press Ctrl-C to stop...");
    controller.toggle().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged(state)) => println!("state: {:?}", state),
                Ok(SessionEvent::Notice(notice)) => println!("notice: {:?}", notice),
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Received Ctrl-C, shutting down...");
                controller.stop().await;
                break;
            }
        }
    }
    println!("stats: {:?}", controller.stats());
}
