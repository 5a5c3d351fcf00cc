//! Magnitude pruning and its monotonic schedule.

use burn::module::Param;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};

/// Pruned fraction of recurrent weights, raised in steps as training files go by.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SparsitySchedule {
    /// Final sparsity in percent.
    pub target: f32,
    /// Increment in percent.
    pub step: f32,
    /// Files between increments.
    pub increase_every: usize,
    /// Current sparsity in percent; never decreases.
    pub current: f32,
    files_since_increase: usize,
}

impl SparsitySchedule {
    pub fn new(target: f32, step: f32, increase_every: usize) -> Self {
        Self {
            target: target.clamp(0.0, 100.0),
            step: step.max(0.0),
            increase_every: increase_every.max(1),
            current: 0.0,
            files_since_increase: 0,
        }
    }

    /// Resume at a previously reached level after `files_processed` files.
    ///
    /// Increases fall on multiples of `increase_every` processed files, so the
    /// remainder is the progress toward the next one.
    pub fn resumed_at(mut self, current: f32, files_processed: usize) -> Self {
        self.current = current.clamp(0.0, self.target);
        self.files_since_increase = files_processed % self.increase_every;
        self
    }

    /// Account for processed files; returns true when the level went up.
    pub fn advance(&mut self, files: usize) -> bool {
        self.files_since_increase += files;
        let mut raised = false;
        while self.files_since_increase >= self.increase_every {
            self.files_since_increase -= self.increase_every;
            let next = (self.current + self.step).min(self.target);
            if next > self.current {
                self.current = next;
                raised = true;
            }
        }
        raised
    }

    /// Current level as a fraction in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        self.current / 100.0
    }
}

/// Zero the `fraction` smallest-magnitude entries in place; returns how many were zeroed.
pub fn prune_smallest(values: &mut [f32], fraction: f32) -> usize {
    let count = ((values.len() as f32) * fraction.clamp(0.0, 1.0)).floor() as usize;
    if count == 0 {
        return 0;
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*a].abs().total_cmp(&values[*b].abs()));
    for idx in &order[..count] {
        values[*idx] = 0.0;
    }
    count
}

/// Prune a 2D weight parameter, keeping its id and gradient requirement.
pub fn prune_param<B: Backend>(param: Param<Tensor<B, 2>>, fraction: f32) -> Param<Tensor<B, 2>> {
    if fraction <= 0.0 {
        return param;
    }
    param.map(|weight| {
        let device = weight.device();
        let require_grad = weight.is_require_grad();
        let shape = weight.dims();
        let mut values: Vec<f32> = weight.into_data().iter::<f32>().collect();
        prune_smallest(&mut values, fraction);
        Tensor::<B, 2>::from_data(TensorData::new(values, shape), &device)
            .set_require_grad(require_grad)
    })
}

/// Fraction of exactly-zero entries.
pub fn measure_sparsity<B: Backend>(weight: Tensor<B, 2>) -> f32 {
    let values: Vec<f32> = weight.into_data().iter::<f32>().collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| **v == 0.0).count() as f32 / values.len() as f32
}
