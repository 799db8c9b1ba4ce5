//! Audio sources
//!
//! A source pushes mono `f32` chunks into the channel handed to
//! [`AudioSource::start`] and drops its sender when it stops or runs out.

use super::AnalysisError;
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Something that can feed the analyzer
pub trait AudioSource {
    /// Human-readable name for logs
    fn name(&self) -> String;

    /// Sample rate of the delivered stream. Valid after `start`.
    fn sample_rate(&self) -> u32;

    /// Begin delivering mono chunks into `sink`
    fn start(&mut self, sink: Sender<Vec<f32>>) -> Result<(), AnalysisError>;

    /// Stop delivering and release the sender. Idempotent.
    fn stop(&mut self);
}

/// Average interleaved frames down to mono
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Plays an in-memory buffer in fixed-size chunks
pub struct BufferSource {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    chunk_size: usize,
    realtime: bool,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BufferSource {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            chunk_size: 512,
            realtime: false,
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pace chunks at the stream's sample rate instead of as fast as possible
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl AudioSource for BufferSource {
    fn name(&self) -> String {
        format!("buffer ({} samples)", self.samples.len())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, sink: Sender<Vec<f32>>) -> Result<(), AnalysisError> {
        self.stop();
        self.stop_flag.store(false, Ordering::SeqCst);

        let samples = self.samples.clone();
        let chunk_size = self.chunk_size;
        let stop_flag = self.stop_flag.clone();
        let pace = self
            .realtime
            .then(|| Duration::from_secs_f64(chunk_size as f64 / self.sample_rate.max(1) as f64));

        let handle = thread::Builder::new()
            .name("scope-buffer-source".to_string())
            .spawn(move || {
                for chunk in samples.chunks(chunk_size) {
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    if sink.send(chunk.to_vec()).is_err() {
                        break;
                    }
                    if let Some(pace) = pace {
                        thread::sleep(pace);
                    }
                }
            })?;

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BufferSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decodes a WAV file on `start` and plays it like a [`BufferSource`]
pub struct WavFileSource {
    path: PathBuf,
    realtime: bool,
    inner: Option<BufferSource>,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: true,
            inner: None,
        }
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Read the whole file as mono f32 in [-1, 1]
    pub fn decode(&self) -> Result<(Vec<f32>, u32), AnalysisError> {
        let mut reader = hound::WavReader::open(&self.path)?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        Ok((downmix(&interleaved, spec.channels as usize), spec.sample_rate))
    }
}

impl AudioSource for WavFileSource {
    fn name(&self) -> String {
        format!("wav file {}", self.path.display())
    }

    fn sample_rate(&self) -> u32 {
        self.inner.as_ref().map_or(0, |inner| inner.sample_rate())
    }

    fn start(&mut self, sink: Sender<Vec<f32>>) -> Result<(), AnalysisError> {
        let (samples, sample_rate) = self.decode()?;
        info!(
            "Loaded {} ({} samples at {} Hz)",
            self.path.display(),
            samples.len(),
            sample_rate
        );

        let mut inner = BufferSource::new(samples, sample_rate).with_realtime(self.realtime);
        inner.start(sink)?;
        self.inner = Some(inner);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.stop();
            debug!("Stopped {}", self.path.display());
        }
    }
}

#[cfg(feature = "audio")]
pub use cpal_input::CpalInputSource;

#[cfg(feature = "audio")]
mod cpal_input {
    use super::{downmix, AnalysisError, AudioSource};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::Sender;
    use tracing::{info, warn};

    /// Live capture from a cpal input device
    pub struct CpalInputSource {
        device_name: Option<String>,
        sample_rate: u32,
        stream: Option<cpal::Stream>,
    }

    impl CpalInputSource {
        /// `None` selects the host's default input device
        pub fn new(device_name: Option<String>) -> Self {
            Self {
                device_name,
                sample_rate: 0,
                stream: None,
            }
        }

        fn find_device(&self) -> Result<cpal::Device, AnalysisError> {
            let host = cpal::default_host();
            match &self.device_name {
                Some(name) => host
                    .input_devices()
                    .map_err(|e| AnalysisError::SourceUnavailable(e.to_string()))?
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or_else(|| {
                        AnalysisError::SourceUnavailable(format!("Input device '{}' not found", name))
                    }),
                None => host
                    .default_input_device()
                    .ok_or(AnalysisError::NoInputDevice),
            }
        }
    }

    impl AudioSource for CpalInputSource {
        fn name(&self) -> String {
            self.device_name
                .clone()
                .unwrap_or_else(|| "default input".to_string())
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn start(&mut self, sink: Sender<Vec<f32>>) -> Result<(), AnalysisError> {
            let device = self.find_device()?;
            let supported = device
                .default_input_config()
                .map_err(|e| AnalysisError::SourceUnavailable(e.to_string()))?;

            let channels = supported.channels() as usize;
            let sample_rate = supported.sample_rate().0;
            let config: cpal::StreamConfig = supported.config();
            let err_fn = |e: cpal::StreamError| warn!("Audio input stream error: {}", e);

            let stream = match supported.sample_format() {
                cpal::SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // Drop the chunk rather than block the audio thread
                        let _ = sink.try_send(downmix(data, channels));
                    },
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<f32> =
                            data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                        let _ = sink.try_send(downmix(&converted, channels));
                    },
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::U16 => device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<f32> = data
                            .iter()
                            .map(|&s| (s as f32 - 32768.0) / 32768.0)
                            .collect();
                        let _ = sink.try_send(downmix(&converted, channels));
                    },
                    err_fn,
                    None,
                ),
                other => {
                    return Err(AnalysisError::SourceUnavailable(format!(
                        "Unsupported sample format {:?}",
                        other
                    )))
                }
            }
            .map_err(|e| AnalysisError::SourceUnavailable(e.to_string()))?;

            stream
                .play()
                .map_err(|e| AnalysisError::SourceUnavailable(e.to_string()))?;

            info!(
                "Audio input '{}' started: {} channels at {} Hz",
                self.name(),
                channels,
                sample_rate
            );

            self.sample_rate = sample_rate;
            self.stream = Some(stream);
            Ok(())
        }

        fn stop(&mut self) {
            // Dropping the stream releases the device and the sender
            if self.stream.take().is_some() {
                info!("Audio input '{}' stopped", self.name());
            }
        }
    }
}
