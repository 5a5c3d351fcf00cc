//! Corpus preparation: raw `.txt`/`.wav` pairs to processed training examples.
//!
//! Each kept pair yields `<name>.txt`, `<name>.lab`, `<name>.orig.wav`, `<name>.mgc` and a
//! `<name>.png` preview under the processed split root. Output depends only on the inputs
//! and the audio configuration, so running twice produces the same files.

use crate::audio::io::WavIo;
use crate::audio::mel::MelSpectrogram;
use crate::audio::render::{save_png, RenderScale};
use crate::audio::resample::AudioResampler;
use crate::conditioner::text::{encode_text, read_transcript_line, speaker_from_file_name, write_lab};
use crate::config::AudioConfig;
use crate::dataset::ExamplePaths;
use crate::error::{Result, TtsError};
use crate::features::FeatureMatrix;
use crate::perf::{self, Metric};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// What to do with a `.txt` that has no `.wav` (or the reverse).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PairingPolicy {
    /// Log and skip.
    #[default]
    Warn,
    /// Abort before anything is written.
    Fatal,
}

/// Outcome of preparing one split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Output names in processing order.
    pub processed: Vec<String>,
    /// Source base-names missing their partner file.
    pub unpaired: Vec<String>,
}

/// Outcome of a corpus preparation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusReport {
    pub train: SplitReport,
    pub dev: SplitReport,
}

impl CorpusReport {
    pub fn processed(&self) -> usize {
        self.train.processed.len() + self.dev.processed.len()
    }

    pub fn unpaired(&self) -> usize {
        self.train.unpaired.len() + self.dev.unpaired.len()
    }
}

/// Paired and unpaired base-names found in a raw split directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceScan {
    pub paired: Vec<String>,
    pub unpaired: Vec<String>,
}

/// List `.txt`/`.wav` base-names, sorted.
pub fn scan_sources(root: &Path) -> Result<SourceScan> {
    if !root.is_dir() {
        return Err(TtsError::MissingPath(root.to_path_buf()));
    }
    let mut texts = BTreeSet::new();
    let mut waves = BTreeSet::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        match path.extension().and_then(|e| e.to_str()) {
            Some("txt") => {
                texts.insert(stem);
            }
            Some("wav") => {
                waves.insert(stem);
            }
            _ => {}
        }
    }
    Ok(SourceScan {
        paired: texts.intersection(&waves).cloned().collect(),
        unpaired: texts.symmetric_difference(&waves).cloned().collect(),
    })
}

/// Turns raw splits into processed ones.
#[derive(Debug)]
pub struct CorpusPreparer {
    audio: AudioConfig,
    mel: MelSpectrogram,
    policy: PairingPolicy,
    prefix: Option<String>,
    speaker: Option<String>,
}

impl CorpusPreparer {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            audio: audio.clone(),
            mel: MelSpectrogram::new(audio),
            policy: PairingPolicy::default(),
            prefix: None,
            speaker: None,
        }
    }

    pub fn with_policy(mut self, policy: PairingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Rename outputs `<prefix>_00000`, `<prefix>_00001`, ...
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix;
        self
    }

    /// Speaker for generated label files; the file-name prefix is used otherwise.
    pub fn with_speaker(mut self, speaker: Option<String>) -> Self {
        self.speaker = speaker;
        self
    }

    /// Prepare `train_src` and `dev_src` into `<output>/train` and `<output>/dev`.
    ///
    /// # Errors
    ///
    /// [`TtsError::MissingPath`] for a missing source directory and, under
    /// [`PairingPolicy::Fatal`], [`TtsError::DataIntegrity`] for any unpaired file.
    pub fn prepare(&self, train_src: &Path, dev_src: &Path, output: &Path) -> Result<CorpusReport> {
        let train_scan = scan_sources(train_src)?;
        let dev_scan = scan_sources(dev_src)?;
        for (split, scan) in [("train", &train_scan), ("dev", &dev_scan)] {
            for name in &scan.unpaired {
                match self.policy {
                    PairingPolicy::Warn => {
                        tracing::warn!(split, example = %name, "unpaired example skipped");
                        perf::add_count(Metric::CorpusSkipped, 1);
                    }
                    PairingPolicy::Fatal => {
                        return Err(TtsError::DataIntegrity(format!(
                            "{split} example {name} lacks a .txt/.wav partner"
                        )));
                    }
                }
            }
        }

        let mut counter = 0usize;
        let train = self.prepare_split(train_src, &train_scan, &output.join("train"), &mut counter)?;
        let dev = self.prepare_split(dev_src, &dev_scan, &output.join("dev"), &mut counter)?;
        let report = CorpusReport { train, dev };
        tracing::info!(
            processed = report.processed(),
            unpaired = report.unpaired(),
            "corpus prepared"
        );
        Ok(report)
    }

    fn prepare_split(
        &self,
        src: &Path,
        scan: &SourceScan,
        out: &Path,
        counter: &mut usize,
    ) -> Result<SplitReport> {
        fs::create_dir_all(out)?;
        let mut processed = Vec::with_capacity(scan.paired.len());
        for source in &scan.paired {
            let name = match &self.prefix {
                Some(prefix) => format!("{prefix}_{:05}", *counter),
                None => source.clone(),
            };
            *counter += 1;
            self.prepare_example(src, source, out, &name)?;
            processed.push(name);
        }
        Ok(SplitReport {
            processed,
            unpaired: scan.unpaired.clone(),
        })
    }

    fn prepare_example(&self, src: &Path, source: &str, out: &Path, name: &str) -> Result<()> {
        let _span = perf::span(Metric::CorpusExample);
        let text_path = src.join(format!("{source}.txt"));
        let wav_path = src.join(format!("{source}.wav"));
        let lab_path = src.join(format!("{source}.lab"));
        let target = ExamplePaths::new(out, name);

        let (channels, rate) = WavIo::read_wav(&wav_path)?;
        let samples = AudioResampler::to_mono(channels, rate, self.audio.sample_rate)?;
        let rows = self.mel.process(&samples);
        let features = FeatureMatrix::from_rows(&rows, self.audio.mgc_order)?;

        if lab_path.exists() {
            fs::copy(&lab_path, target.lab())?;
        } else {
            let text = read_transcript_line(&text_path)?;
            let speaker = self
                .speaker
                .clone()
                .unwrap_or_else(|| speaker_from_file_name(source));
            write_lab(target.lab(), &encode_text(&text, &speaker)?)?;
        }
        fs::copy(&text_path, target.txt())?;
        save_png(target.png(), &rows, RenderScale::MinMax)?;
        WavIo::write_wav(target.wav(), &[samples], self.audio.sample_rate)?;
        features.save(target.mgc())?;
        tracing::debug!(source, name, frames = features.frames(), "example prepared");
        Ok(())
    }
}

/// Default processed root under a data directory.
pub fn processed_root(data_dir: &Path) -> PathBuf {
    data_dir.join("processed")
}
