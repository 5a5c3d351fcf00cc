//! Processed dataset index and training batch assembly.
//!
//! An example `<base>` belongs to a split only when `<base>.txt`, `<base>.lab`,
//! `<base>.orig.wav` and `<base>.mgc` all exist under the split root. Incomplete
//! examples are left out, never repaired.

use crate::audio::io::WavIo;
use crate::conditioner::text::{read_lab, PhoneInfo};
use crate::error::{Result, TtsError};
use crate::features::FeatureMatrix;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::Rng;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-example file suffixes, in the order they are checked.
pub const EXAMPLE_SUFFIXES: [&str; 4] = [".txt", ".lab", ".orig.wav", ".mgc"];

/// Files of one processed example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamplePaths {
    base: PathBuf,
}

impl ExamplePaths {
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            base: root.join(name),
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path = self.base.as_os_str().to_owned();
        path.push(suffix);
        PathBuf::from(path)
    }

    pub fn txt(&self) -> PathBuf {
        self.with_suffix(".txt")
    }

    pub fn lab(&self) -> PathBuf {
        self.with_suffix(".lab")
    }

    pub fn wav(&self) -> PathBuf {
        self.with_suffix(".orig.wav")
    }

    pub fn mgc(&self) -> PathBuf {
        self.with_suffix(".mgc")
    }

    pub fn png(&self) -> PathBuf {
        self.with_suffix(".png")
    }

    fn is_complete(&self) -> bool {
        EXAMPLE_SUFFIXES.iter().all(|suffix| self.with_suffix(suffix).exists())
    }
}

/// Ordered example names of one split.
#[derive(Debug, Clone)]
pub struct Dataset {
    root: PathBuf,
    names: Vec<String>,
}

impl Dataset {
    /// Index a processed split.
    ///
    /// # Errors
    ///
    /// [`TtsError::MissingPath`] when `root` is not a directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TtsError::MissingPath(root.to_path_buf()));
        }
        let mut candidates = BTreeSet::new();
        for entry in fs::read_dir(root)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(base) = name.strip_suffix(".txt") {
                candidates.insert(base.to_string());
            }
        }
        let total = candidates.len();
        let names: Vec<String> = candidates
            .into_iter()
            .filter(|name| ExamplePaths::new(root, name).is_complete())
            .collect();
        if names.len() < total {
            tracing::warn!(
                root = %root.display(),
                excluded = total - names.len(),
                "incomplete examples left out of the dataset"
            );
        }
        Ok(Self {
            root: root.to_path_buf(),
            names,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn paths(&self, index: usize) -> ExamplePaths {
        ExamplePaths::new(&self.root, &self.names[index])
    }

    pub fn tokens(&self, index: usize) -> Result<Vec<PhoneInfo>> {
        read_lab(self.paths(index).lab())
    }

    pub fn features(&self, index: usize) -> Result<FeatureMatrix> {
        FeatureMatrix::load(self.paths(index).mgc())
    }

    /// Features of an example whose order must equal `order`.
    pub fn features_of_order(&self, index: usize, order: usize) -> Result<FeatureMatrix> {
        let features = self.features(index)?;
        if features.order() != order {
            return Err(TtsError::DataIntegrity(format!(
                "{} has order {}, expected {order}",
                self.paths(index).mgc().display(),
                features.order()
            )));
        }
        Ok(features)
    }

    /// Mono normalized waveform.
    pub fn waveform(&self, index: usize) -> Result<Vec<f32>> {
        let (mut channels, _) = WavIo::read_wav(self.paths(index).wav())?;
        if channels.len() != 1 {
            return Err(TtsError::DataIntegrity(format!(
                "{} is not mono",
                self.paths(index).wav().display()
            )));
        }
        Ok(channels.pop().unwrap_or_default())
    }
}

/// Aligned crop of frames and waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// `(1 + frames) * order` values; the first row is the frame preceding the crop.
    pub frames_with_context: Vec<f32>,
    /// `frames * hop` normalized samples.
    pub samples: Vec<f32>,
}

/// Cut a crop of `segment_frames` frames starting at `start`.
///
/// Frames past the end read as zeros; samples past the end of the waveform are silence.
pub fn segment_at(
    features: &FeatureMatrix,
    waveform: &[f32],
    start: usize,
    segment_frames: usize,
    hop: usize,
) -> Segment {
    let order = features.order();
    let frame_or_zero = |idx: usize| -> Vec<f32> {
        if idx < features.frames() {
            features.row(idx).to_vec()
        } else {
            vec![0.0; order]
        }
    };
    let mut frames_with_context = frame_or_zero(start.saturating_sub(1));
    for idx in start..start + segment_frames {
        frames_with_context.extend(frame_or_zero(idx));
    }
    let samples = (start * hop..(start + segment_frames) * hop)
        .map(|idx| waveform.get(idx).copied().unwrap_or(0.0))
        .collect();
    Segment {
        frames_with_context,
        samples,
    }
}

/// Crop at a uniformly drawn frame offset.
pub fn random_segment<R: Rng + ?Sized>(
    features: &FeatureMatrix,
    waveform: &[f32],
    segment_frames: usize,
    hop: usize,
    rng: &mut R,
) -> Segment {
    let max_start = features.frames().saturating_sub(segment_frames);
    let start = if max_start == 0 {
        0
    } else {
        rng.random_range(0..=max_start)
    };
    segment_at(features, waveform, start, segment_frames, hop)
}

/// Stack equally sized segments into `([batch, 1 + frames, order], [batch, frames * hop])`.
pub fn stack_segments<B: Backend>(
    segments: &[Segment],
    segment_frames: usize,
    order: usize,
    device: &B::Device,
) -> (Tensor<B, 3>, Tensor<B, 2>) {
    let batch = segments.len();
    let frames: Vec<f32> = segments
        .iter()
        .flat_map(|segment| segment.frames_with_context.iter().copied())
        .collect();
    let samples_per = segments.first().map(|s| s.samples.len()).unwrap_or(0);
    let samples: Vec<f32> = segments
        .iter()
        .flat_map(|segment| segment.samples.iter().copied())
        .collect();
    (
        Tensor::from_data(
            TensorData::new(frames, [batch, segment_frames + 1, order]),
            device,
        ),
        Tensor::from_data(TensorData::new(samples, [batch, samples_per]), device),
    )
}
