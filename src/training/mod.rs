//! Phased training: corpus preparation and the three model trainers.
//!
//! Phases are selected by the caller and never chain into each other. Every training
//! phase reads processed splits, writes the effective configuration to
//! `<data>/models/config.yaml` and checkpoints into `<data>/models`.

pub mod checkpoint;
pub mod encoder;
pub mod parallel;
pub mod session;
pub mod vocoder;

use crate::config::{save_config, Config};
use crate::corpus::{processed_root, CorpusPreparer, CorpusReport, PairingPolicy};
use crate::error::{Result, TtsError};
use crate::runtime::{CONFIG_FILE, DEFAULT_SEED};
use burn::tensor::backend::AutodiffBackend;
use checkpoint::{CheckpointStore, TrainingProgress};
use session::TrainSession;
use std::fmt;
use std::path::PathBuf;

/// One externally selected step of the training lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CorpusPrep,
    TrainVocoder,
    TrainEncoder,
    TrainParallelVocoder,
}

impl Phase {
    pub fn default_epochs(self) -> usize {
        match self {
            Phase::CorpusPrep => 0,
            Phase::TrainVocoder => 20,
            Phase::TrainEncoder => 10,
            Phase::TrainParallelVocoder => 20,
        }
    }

    /// Batch size when none is given: crops per step for the vocoders, utterances per
    /// step for the encoder.
    pub fn default_batch_size(self) -> usize {
        match self {
            Phase::TrainEncoder => 8,
            _ => 16,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::CorpusPrep => "corpus-prep",
            Phase::TrainVocoder => "train-vocoder",
            Phase::TrainEncoder => "train-encoder",
            Phase::TrainParallelVocoder => "train-parallel-vocoder",
        };
        f.write_str(name)
    }
}

/// Raw or processed split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
}

impl Split {
    fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
        }
    }
}

/// Pruning schedule knobs, in percent and files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparsityOptions {
    pub target: f32,
    pub step: f32,
    pub increase_at: usize,
}

impl Default for SparsityOptions {
    fn default() -> Self {
        Self {
            target: 95.0,
            step: 5.0,
            increase_at: 200,
        }
    }
}

/// Everything a phase needs.
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub phase: Phase,
    pub data_dir: PathBuf,
    /// Raw split for corpus preparation; overrides the processed split otherwise.
    pub train_folder: Option<PathBuf>,
    pub dev_folder: Option<PathBuf>,
    pub resume: bool,
    pub guided_attention: bool,
    /// Encoder previews decode on the stop signal only.
    pub unbounded: bool,
    pub sparsity: SparsityOptions,
    /// Files between previews written into `<data>/output`.
    pub output_at: usize,
    /// Files between periodic checkpoints.
    pub checkpoint_every: usize,
    pub batch_size: Option<usize>,
    pub learning_rate: f64,
    pub epochs: Option<usize>,
    pub speaker: Option<String>,
    pub prefix: Option<String>,
    pub pairing: PairingPolicy,
    pub seed: u64,
    pub config: Config,
}

impl TrainingOptions {
    pub fn new(phase: Phase, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            data_dir: data_dir.into(),
            train_folder: None,
            dev_folder: None,
            resume: false,
            guided_attention: true,
            unbounded: false,
            sparsity: SparsityOptions::default(),
            output_at: 5000,
            checkpoint_every: 1000,
            batch_size: None,
            learning_rate: 1e-4,
            epochs: None,
            speaker: None,
            prefix: None,
            pairing: PairingPolicy::Warn,
            seed: DEFAULT_SEED,
            config: Config::default(),
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }

    pub fn epochs(&self) -> usize {
        self.epochs.unwrap_or_else(|| self.phase.default_epochs())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
            .unwrap_or_else(|| self.phase.default_batch_size())
            .max(1)
    }

    /// Processed split read by the training phases.
    pub fn processed_split(&self, split: Split) -> PathBuf {
        let explicit = match split {
            Split::Train => &self.train_folder,
            Split::Dev => &self.dev_folder,
        };
        explicit
            .clone()
            .unwrap_or_else(|| processed_root(&self.data_dir).join(split.dir_name()))
    }

    pub fn store(&self) -> CheckpointStore {
        CheckpointStore::new(self.models_dir())
    }

    /// Session writing to checkpoint `name`.
    pub fn session(&self, name: &'static str) -> Result<TrainSession> {
        TrainSession::start(
            self.store(),
            name,
            self.resume,
            self.checkpoint_every,
            self.output_at,
            self.output_dir(),
        )
    }
}

/// Result of a phase.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Corpus(CorpusReport),
    Trained(TrainingProgress),
}

/// Run the selected phase to completion.
pub fn run_phase<B: AutodiffBackend>(options: &TrainingOptions, device: &B::Device) -> Result<PhaseOutcome> {
    options.config.validate()?;
    tracing::info!(phase = %options.phase, data = %options.data_dir.display(), "starting phase");
    match options.phase {
        Phase::CorpusPrep => prepare_corpus(options).map(PhaseOutcome::Corpus),
        phase => {
            let models = options.models_dir();
            std::fs::create_dir_all(&models)?;
            save_config(&options.config, models.join(CONFIG_FILE))?;
            let progress = match phase {
                Phase::TrainVocoder => vocoder::train_vocoder::<B>(options, device)?,
                Phase::TrainEncoder => encoder::train_encoder::<B>(options, device)?,
                _ => parallel::train_parallel_vocoder::<B>(options, device)?,
            };
            Ok(PhaseOutcome::Trained(progress))
        }
    }
}

fn prepare_corpus(options: &TrainingOptions) -> Result<CorpusReport> {
    let train = options.train_folder.as_deref().ok_or_else(|| {
        TtsError::Configuration("corpus preparation needs --train-folder".to_string())
    })?;
    let dev = options.dev_folder.as_deref().ok_or_else(|| {
        TtsError::Configuration("corpus preparation needs --dev-folder".to_string())
    })?;
    CorpusPreparer::new(&options.config.audio)
        .with_policy(options.pairing)
        .with_prefix(options.prefix.clone())
        .with_speaker(options.speaker.clone())
        .prepare(train, dev, &processed_root(&options.data_dir))
}
