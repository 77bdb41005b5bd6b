use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, SampleFormat, StreamConfig};
use rubato::Resampler;

use voicelink_types::audio::{AudioChunk, CAPTURE_SAMPLE_RATE, CHUNK_DURATION_MS};
use voicelink_utils as utils;

use crate::error::{Error, Result};
use crate::permission::AcquiredMic;

/// Turns an acquired microphone into a stream of ordered, encoded chunks.
/// Start and stop are cheap and repeat within one session; sequence numbers
/// keep increasing across restarts so downstream ordering checks hold for
/// the whole session.
pub trait CapturePipeline: Send + 'static {
    type Device;

    fn start(
        &mut self,
        device: Self::Device,
        chunks: tokio::sync::mpsc::Sender<AudioChunk>,
    ) -> Result<()>;

    fn stop(&mut self);
}

pub struct MicCapturePipeline {
    seq: Arc<AtomicU64>,
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    stream_thread: Option<std::thread::JoinHandle<()>>,
    chunker: tokio::task::JoinHandle<()>,
}

impl MicCapturePipeline {
    pub fn new() -> Self {
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }
}

impl Default for MicCapturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturePipeline for MicCapturePipeline {
    type Device = AcquiredMic;

    fn start(
        &mut self,
        device: AcquiredMic,
        chunks: tokio::sync::mpsc::Sender<AudioChunk>,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::Capture("capture already running".to_string()));
        }

        let sample_format = device.config.sample_format();
        let input_rate = device.config.sample_rate().0;
        let channels = device.config.channels();
        // Enough frames per callback that the chunker never starves, small
        // enough to stay well under one chunk interval.
        let frames_per_callback = (input_rate / 50).max(256);
        let stream_config = StreamConfig {
            channels,
            sample_rate: device.config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(frames_per_callback)),
        };

        let (samples_tx, samples_rx) = tokio::sync::mpsc::channel::<Vec<f32>>(64);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let stream_thread = std::thread::spawn(move || {
            let err_fn = |err| tracing::error!("input stream error: {}", err);
            let built = match sample_format {
                SampleFormat::F32 => {
                    let tx = samples_tx.clone();
                    device.device.build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let mono = utils::audio::downmix_to_mono(data, channels);
                            if let Err(e) = tx.try_send(mono) {
                                tracing::debug!("capture queue full, dropping frames: {}", e);
                            }
                        },
                        err_fn,
                        None,
                    )
                }
                SampleFormat::I16 => {
                    let tx = samples_tx.clone();
                    device.device.build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            let floats: Vec<f32> = data
                                .iter()
                                .map(|&v| (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0))
                                .collect();
                            let mono = utils::audio::downmix_to_mono(&floats, channels);
                            if let Err(e) = tx.try_send(mono) {
                                tracing::debug!("capture queue full, dropping frames: {}", e);
                            }
                        },
                        err_fn,
                        None,
                    )
                }
                other => {
                    let _ = ready_tx.send(Err(Error::Capture(format!(
                        "unsupported sample format: {other:?}"
                    ))));
                    return;
                }
            };
            let stream = match built {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::Capture(e.to_string())));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::Capture(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Stream stays alive until stop. cpal streams are not Send, so
            // this thread owns it for its whole lifetime.
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(Error::Capture("capture thread died during setup".to_string()));
            }
        }

        let chunker = tokio::spawn(run_chunker(input_rate, self.seq.clone(), samples_rx, chunks));

        self.worker = Some(CaptureWorker {
            stop_tx,
            stream_thread: Some(stream_thread),
            chunker,
        });
        tracing::debug!("capture started: rate={}, channels={}", input_rate, channels);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if let Some(thread) = worker.stream_thread.take() {
                // Joins almost immediately: the thread only drops the stream.
                let _ = thread.join();
            }
            worker.chunker.abort();
            tracing::debug!("capture stopped");
        }
    }
}

impl Drop for MicCapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drains raw capture samples, resamples to the wire rate, and emits encoded
/// chunks. Runs until the sample source closes or the chunk consumer hangs up.
async fn run_chunker(
    input_rate: u32,
    seq: Arc<AtomicU64>,
    mut samples_rx: tokio::sync::mpsc::Receiver<Vec<f32>>,
    chunks: tokio::sync::mpsc::Sender<AudioChunk>,
) {
    let input_chunk = (input_rate as u64 * CHUNK_DURATION_MS / 1000) as usize;
    let mut resampler = match utils::audio::create_resampler(
        input_rate as f64,
        CAPTURE_SAMPLE_RATE as f64,
        input_chunk,
    ) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("failed to create capture resampler: {}", e);
            return;
        }
    };
    let mut buffer: VecDeque<f32> = VecDeque::with_capacity(input_chunk * 2);
    while let Some(samples) = samples_rx.recv().await {
        buffer.extend(samples);
        while buffer.len() >= input_chunk {
            let frame: Vec<f32> = buffer.drain(..input_chunk).collect();
            let resampled = match resampler.process(&[frame.as_slice()], None) {
                Ok(mut out) => out.swap_remove(0),
                Err(e) => {
                    tracing::warn!("capture resample failed: {}", e);
                    continue;
                }
            };
            let data = utils::audio::encode(&resampled);
            let chunk = AudioChunk::new(seq.fetch_add(1, Ordering::SeqCst), data);
            if chunks.send(chunk).await.is_err() {
                return;
            }
        }
    }
}
