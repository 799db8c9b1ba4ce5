//! Live analysis: bind a source, run the analyzer on a worker thread, notify observers.

use super::analyzer::{AnalyzerConfig, AudioAnalyzer};
use super::source::AudioSource;
use super::{AnalysisError, AnalysisState};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Per-tick observer. Runs on the analysis thread and must not block.
pub type TickCallback = Box<dyn FnMut(&AnalysisState) + Send>;

/// Chunks buffered between the source and the analysis thread
const CHUNK_QUEUE_DEPTH: usize = 64;

/// Drives an [`AudioAnalyzer`] from an [`AudioSource`]
///
/// Observers registered with [`LiveAnalyzer::on_tick`] stay registered
/// across detach/attach cycles. Registering an observer from inside a
/// callback deadlocks.
pub struct LiveAnalyzer {
    config: AnalyzerConfig,
    observers: Arc<Mutex<Vec<TickCallback>>>,
    latest: Arc<Mutex<AnalysisState>>,
    source: Option<Box<dyn AudioSource>>,
    worker: Option<JoinHandle<()>>,
}

impl LiveAnalyzer {
    /// `config.sample_rate` is replaced by the source's rate on attach
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            observers: Arc::new(Mutex::new(Vec::new())),
            latest: Arc::new(Mutex::new(AnalysisState::default())),
            source: None,
            worker: None,
        }
    }

    /// Bind to a source and start producing ticks
    pub fn attach(&mut self, mut source: Box<dyn AudioSource>) -> Result<(), AnalysisError> {
        if self.source.is_some() {
            return Err(AnalysisError::AlreadyAttached);
        }

        let (tx, rx) = bounded::<Vec<f32>>(CHUNK_QUEUE_DEPTH);
        source.start(tx)?;

        let sample_rate = source.sample_rate();
        if sample_rate == 0 {
            source.stop();
            return Err(AnalysisError::SourceUnavailable(format!(
                "{} reported no sample rate",
                source.name()
            )));
        }

        let config = AnalyzerConfig {
            sample_rate,
            ..self.config.clone()
        };
        let observers = self.observers.clone();
        let latest = self.latest.clone();
        *latest.lock() = AnalysisState::default();

        let spawned = thread::Builder::new()
            .name("scope-audio-analysis".to_string())
            .spawn(move || {
                let mut analyzer = AudioAnalyzer::new(config);
                for chunk in rx.iter() {
                    for state in analyzer.process_samples(&chunk) {
                        *latest.lock() = state;
                        for observer in observers.lock().iter_mut() {
                            observer(&state);
                        }
                    }
                }
                debug!("Analysis worker finished");
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                source.stop();
                return Err(AnalysisError::Io(e));
            }
        };

        info!("Audio analyzer attached to {} at {} Hz", source.name(), sample_rate);
        self.source = Some(source);
        self.worker = Some(worker);
        Ok(())
    }

    /// Release the source and stop producing ticks. Idempotent.
    pub fn detach(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
            info!("Audio analyzer detached from {}", source.name());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Analysis worker panicked");
            }
        }
    }

    /// Register a per-tick observer
    pub fn on_tick<F>(&self, callback: F)
    where
        F: FnMut(&AnalysisState) + Send + 'static,
    {
        self.observers.lock().push(Box::new(callback));
    }

    pub fn is_attached(&self) -> bool {
        self.source.is_some()
    }

    /// Most recent tick (silent before the first one)
    pub fn latest(&self) -> AnalysisState {
        *self.latest.lock()
    }

    /// The source has stopped delivering and every chunk has been analyzed
    pub fn is_drained(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }
}

impl Drop for LiveAnalyzer {
    fn drop(&mut self) {
        self.detach();
    }
}
