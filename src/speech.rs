use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::Resampler;

use voicelink_utils as utils;

use crate::error::{Error, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// One agent reply to be spoken. Ids are handed out by the controller and
/// let a stale playback-end be told apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { id: u64 },
    Ended { id: u64 },
}

#[derive(Debug, Clone)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Engine seam: turns one reply into PCM. Implementations wrap whatever
/// synthesis backend the deployment ships.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    fn voices(&self) -> Vec<VoiceInfo>;

    #[cfg_attr(test, mockall::concretize)]
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedAudio>;
}

const QUALITY_MARKERS: &[&str] = &["enhanced", "premium", "natural", "neural"];

fn primary_tag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .to_ascii_lowercase()
}

/// Pick a voice: a quality-marked name first (same language preferred),
/// then any voice for the session language, then the engine default.
pub fn select_voice(voices: &[VoiceInfo], language: &str) -> Option<String> {
    let lang = primary_tag(language);
    let is_quality = |v: &&VoiceInfo| {
        let name = v.name.to_lowercase();
        QUALITY_MARKERS.iter().any(|m| name.contains(m))
    };
    let matches_lang = |v: &&VoiceInfo| primary_tag(&v.language) == lang;

    voices
        .iter()
        .find(|v| is_quality(v) && matches_lang(v))
        .or_else(|| voices.iter().find(is_quality))
        .or_else(|| voices.iter().find(matches_lang))
        .map(|v| v.name.clone())
}

/// What the controller drives. At most one utterance is audible at a time;
/// `speak` on a busy player cancels the running utterance first.
pub trait SpeechPlayer: Send + 'static {
    fn speak(&mut self, utterance: Utterance, events: tokio::sync::mpsc::Sender<PlaybackEvent>);

    fn cancel(&mut self);
}

/// Player that synthesizes through a [`SpeechSynthesizer`] and plays the
/// PCM on the host output device. `Ended` fires exactly once per `speak`,
/// also when synthesis fails or the utterance is cancelled mid-flight.
pub struct TtsPlayer<S: SpeechSynthesizer> {
    synthesizer: Arc<S>,
    voice: Option<String>,
    language: String,
    output_device: Option<String>,
    current: Option<Arc<AtomicBool>>,
}

impl<S: SpeechSynthesizer> TtsPlayer<S> {
    pub fn new(synthesizer: Arc<S>, voice: Option<String>, language: &str) -> Self {
        Self {
            synthesizer,
            voice,
            language: language.to_string(),
            output_device: None,
            current: None,
        }
    }

    pub fn with_output_device(mut self, name: Option<String>) -> Self {
        self.output_device = name;
        self
    }
}

impl<S: SpeechSynthesizer> SpeechPlayer for TtsPlayer<S> {
    fn speak(&mut self, utterance: Utterance, events: tokio::sync::mpsc::Sender<PlaybackEvent>) {
        // Last write wins: the running utterance is cancelled, not queued
        // behind. Its own Ended still fires from its task.
        self.cancel();

        let cancelled = Arc::new(AtomicBool::new(false));
        self.current = Some(cancelled.clone());

        let synthesizer = self.synthesizer.clone();
        let voice = self
            .voice
            .clone()
            .or_else(|| select_voice(&synthesizer.voices(), &self.language));
        let output_device = self.output_device.clone();
        let id = utterance.id;

        tokio::spawn(async move {
            let audio = match synthesizer.synthesize(&utterance.text, voice.as_deref()).await {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::error!("synthesis failed for utterance {}: {}", id, e);
                    let _ = events.send(PlaybackEvent::Ended { id }).await;
                    return;
                }
            };
            if cancelled.load(Ordering::SeqCst) {
                let _ = events.send(PlaybackEvent::Ended { id }).await;
                return;
            }

            let _ = events.send(PlaybackEvent::Started { id }).await;
            if !audio.samples.is_empty() {
                let flag = cancelled.clone();
                let played =
                    tokio::task::spawn_blocking(move || play_pcm(audio, flag, output_device))
                        .await;
                match played {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("playback failed for utterance {}: {}", id, e),
                    Err(e) => tracing::error!("playback task failed: {}", e),
                }
            }
            let _ = events.send(PlaybackEvent::Ended { id }).await;
        });
    }

    fn cancel(&mut self) {
        if let Some(flag) = self.current.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

fn play_pcm(
    audio: SynthesizedAudio,
    cancelled: Arc<AtomicBool>,
    output_device: Option<String>,
) -> Result<()> {
    let output = utils::device::get_or_default_output(output_device)
        .map_err(|e| Error::Playback(e.to_string()))?;
    let config = output
        .default_output_config()
        .map_err(|e| Error::Playback(e.to_string()))?;
    let out_rate = config.sample_rate().0;
    let out_channels = config.channels() as usize;
    let stream_config = StreamConfig {
        channels: config.channels(),
        sample_rate: config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let samples = if audio.sample_rate == out_rate {
        audio.samples
    } else {
        let mut resampler = utils::audio::create_resampler(
            audio.sample_rate as f64,
            out_rate as f64,
            RESAMPLE_CHUNK,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;
        let mut resampled = Vec::new();
        for chunk in utils::audio::split_for_chunks(&audio.samples, RESAMPLE_CHUNK) {
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(mut out) => resampled.append(&mut out.swap_remove(0)),
                Err(e) => return Err(Error::Playback(e.to_string())),
            }
        }
        resampled
    };

    let total = samples.len();
    let (mut producer, mut consumer) = utils::audio::shared_buffer(total.max(1)).split();
    for sample in &samples {
        let _ = producer.try_push(*sample);
    }

    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = finished.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let mut wrote_any = false;
        let mut idx = 0;
        while idx < data.len() {
            let Some(sample) = consumer.try_pop() else {
                data[idx..].fill(0.0);
                break;
            };
            wrote_any = true;
            data[idx] = sample;
            idx += 1;
            if out_channels > 1 && idx < data.len() {
                data[idx] = sample;
                idx += 1;
            }
            idx += out_channels.saturating_sub(2);
        }
        if !wrote_any {
            finished_cb.store(true, Ordering::SeqCst);
        }
    };
    let stream = output
        .build_output_stream(
            &stream_config,
            output_data_fn,
            |err| tracing::error!("output stream error: {}", err),
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;
    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    // Hard ceiling in case the device stalls and the underrun never shows.
    let deadline = Instant::now()
        + Duration::from_secs_f64(total as f64 / out_rate as f64)
        + Duration::from_secs(1);
    while !finished.load(Ordering::SeqCst)
        && !cancelled.load(Ordering::SeqCst)
        && Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
    Ok(())
}
