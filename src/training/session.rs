//! Bookkeeping shared by the training loops: epoch ordering, file-count cadences,
//! running loss and checkpoint progress.

use crate::error::{Result, TtsError};
use crate::dataset::Dataset;
use crate::perf::{self, Metric};
use crate::training::checkpoint::{CheckpointStore, TrainingProgress};
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// Fires each time the processed-file count crosses a multiple of `every`.
///
/// `every == 0` never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    every: usize,
    next: usize,
}

impl Cadence {
    pub fn new(every: usize, done: usize) -> Self {
        let next = if every == 0 {
            usize::MAX
        } else {
            (done / every + 1) * every
        };
        Self { every, next }
    }

    pub fn due(&mut self, done: usize) -> bool {
        if self.every == 0 || done < self.next {
            return false;
        }
        self.next = (done / self.every + 1) * self.every;
        true
    }
}

/// Shuffled example order for one epoch; the same `(seed, epoch)` gives the same order.
pub fn epoch_order(len: usize, epoch: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
    order.shuffle(&mut rng);
    order
}

/// Running mean of per-step losses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossMeter {
    sum: f64,
    count: usize,
}

impl LossMeter {
    pub fn add(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<f32> {
        (self.count > 0).then(|| (self.sum / self.count as f64) as f32)
    }
}

/// Host value of a scalar loss.
pub fn loss_value<B: Backend>(loss: &Tensor<B, 1>) -> f32 {
    loss.clone()
        .into_data()
        .iter::<f32>()
        .next()
        .unwrap_or(f32::NAN)
}

/// Open a split and require at least one complete example.
pub fn open_nonempty(root: &Path) -> Result<Dataset> {
    let dataset = Dataset::open(root)?;
    if dataset.is_empty() {
        return Err(TtsError::DataIntegrity(format!(
            "no complete examples under {}",
            root.display()
        )));
    }
    Ok(dataset)
}

/// What the loop should do after a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepEvents {
    pub checkpoint: bool,
    pub preview: bool,
}

/// Progress of one phase plus the checkpoint it writes to.
#[derive(Debug)]
pub struct TrainSession {
    pub store: CheckpointStore,
    pub name: &'static str,
    pub progress: TrainingProgress,
    output_dir: PathBuf,
    checkpoint: Cadence,
    preview: Cadence,
}

impl TrainSession {
    /// Start fresh, or pick up the progress saved with `name` when `resume` is set.
    pub fn start(
        store: CheckpointStore,
        name: &'static str,
        resume: bool,
        checkpoint_every: usize,
        output_at: usize,
        output_dir: PathBuf,
    ) -> Result<Self> {
        let progress = if resume {
            if !store.exists(name) {
                return Err(TtsError::ModelLoad(format!(
                    "cannot resume: no {name} checkpoint in {}",
                    store.dir().display()
                )));
            }
            store.load_progress(name)?
        } else {
            TrainingProgress::default()
        };
        if resume {
            tracing::info!(
                checkpoint = name,
                epoch = progress.epoch,
                files = progress.files_processed,
                "resuming"
            );
        }
        let done = progress.files_processed;
        Ok(Self {
            store,
            name,
            progress,
            output_dir,
            checkpoint: Cadence::new(checkpoint_every, done),
            preview: Cadence::new(output_at, done),
        })
    }

    /// Account for `files` consumed by a step.
    pub fn advance(&mut self, files: usize) -> StepEvents {
        self.progress.files_processed += files;
        perf::add_count(Metric::TrainFiles, files as u64);
        let done = self.progress.files_processed;
        StepEvents {
            checkpoint: self.checkpoint.due(done),
            preview: self.preview.due(done),
        }
    }

    /// `<output>/<name>_<files>.<extension>`, creating the output directory.
    pub fn preview_path(&self, extension: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(self.output_dir.join(format!(
            "{}_{:08}.{extension}",
            self.name, self.progress.files_processed
        )))
    }

    pub fn save<B: Backend, M: Module<B>>(&self, model: &M) -> Result<()> {
        let _span = perf::span(Metric::CheckpointSave);
        self.store.save(self.name, model, &self.progress)
    }

    /// Close an epoch: record the dev loss and save.
    pub fn finish_epoch<B: Backend, M: Module<B>>(
        &mut self,
        model: &M,
        train_loss: Option<f32>,
        dev_loss: Option<f32>,
    ) -> Result<()> {
        self.progress.epoch += 1;
        let improved = match (dev_loss, self.progress.best_dev_loss) {
            (Some(loss), Some(best)) => loss < best,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if improved {
            self.progress.best_dev_loss = dev_loss;
        }
        tracing::info!(
            checkpoint = self.name,
            epoch = self.progress.epoch,
            files = self.progress.files_processed,
            train_loss = ?train_loss,
            dev_loss = ?dev_loss,
            best_dev_loss = ?self.progress.best_dev_loss,
            "epoch finished"
        );
        self.save(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_fires_on_crossings() {
        let mut cadence = Cadence::new(10, 0);
        assert!(!cadence.due(4));
        assert!(cadence.due(12));
        assert!(!cadence.due(19));
        assert!(cadence.due(35));
        assert!(cadence.due(40));
    }

    #[test]
    fn cadence_resumes_past_done_files() {
        let mut cadence = Cadence::new(10, 25);
        assert!(!cadence.due(29));
        assert!(cadence.due(30));
        assert!(!Cadence::new(0, 0).due(usize::MAX - 1));
    }

    #[test]
    fn epoch_order_is_a_seeded_permutation() {
        let order = epoch_order(20, 3, 9);
        assert_eq!(order, epoch_order(20, 3, 9));
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn loss_meter_averages() {
        let mut meter = LossMeter::default();
        assert_eq!(meter.mean(), None);
        meter.add(1.0);
        meter.add(3.0);
        assert_eq!(meter.mean(), Some(2.0));
    }
}
