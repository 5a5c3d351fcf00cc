//! Gated recurrent units with an explicit single-step API.
//!
//! Gate order inside the fused projections is `[reset, update, candidate]`.

use crate::modules::init::orthonormal_gates;
use burn::module::{Module, Param};
use burn::tensor::activation::{sigmoid, tanh};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_nn::{Linear, LinearConfig};
use rand::Rng;

/// Configuration for a [`GruCell`].
#[derive(Debug, Clone)]
pub struct GruCellConfig {
    /// Input feature size.
    pub input_size: usize,
    /// Hidden state size.
    pub hidden_size: usize,
}

impl GruCellConfig {
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
        }
    }

    /// Initialize a GRU cell on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> GruCell<B> {
        GruCell {
            input: LinearConfig::new(self.input_size, 3 * self.hidden_size).init(device),
            recurrent: LinearConfig::new(self.hidden_size, 3 * self.hidden_size).init(device),
            hidden_size: self.hidden_size,
        }
    }
}

/// Single GRU cell.
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    /// Input-to-hidden projection, `[input, 3 * hidden]`.
    pub input: Linear<B>,
    /// Hidden-to-hidden projection, `[hidden, 3 * hidden]`. The only matrix pruned by sparsity.
    pub recurrent: Linear<B>,
    pub hidden_size: usize,
}

impl<B: Backend> GruCell<B> {
    /// Zero hidden state.
    pub fn init_hidden(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch_size, self.hidden_size], device)
    }

    /// Advance one step: `x` is `[batch, input]`, `hidden` is `[batch, hidden]`.
    pub fn step(&self, x: Tensor<B, 2>, hidden: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = self.hidden_size;
        let gi = self.input.forward(x);
        let gh = self.recurrent.forward(hidden.clone());
        let reset = sigmoid(gi.clone().narrow(1, 0, h).add(gh.clone().narrow(1, 0, h)));
        let update = sigmoid(gi.clone().narrow(1, h, h).add(gh.clone().narrow(1, h, h)));
        let candidate = tanh(gi.narrow(1, 2 * h, h).add(reset.mul(gh.narrow(1, 2 * h, h))));
        update
            .clone()
            .neg()
            .add_scalar(1.0)
            .mul(candidate)
            .add(update.mul(hidden))
    }

    /// Run over a `[batch, time, input]` sequence, returning `[batch, time, hidden]`.
    pub fn forward_sequence(&self, input: Tensor<B, 3>, reverse: bool) -> Tensor<B, 3> {
        let [batch, time, features] = input.dims();
        let mut hidden = self.init_hidden(batch, &input.device());
        let mut outputs = Vec::with_capacity(time);
        let order: Vec<usize> = if reverse {
            (0..time).rev().collect()
        } else {
            (0..time).collect()
        };
        for t in order {
            let x = input.clone().narrow(1, t, 1).reshape([batch, features]);
            hidden = self.step(x, hidden);
            outputs.push(hidden.clone());
        }
        if reverse {
            outputs.reverse();
        }
        Tensor::stack(outputs, 1)
    }

    /// Replace the recurrent matrix by per-gate orthonormal blocks.
    pub fn orthonormalize<R: Rng + ?Sized>(mut self, rng: &mut R) -> Self {
        let h = self.hidden_size;
        let values = orthonormal_gates(rng, h, 3);
        let device = self.recurrent.weight.val().device();
        let weight = Tensor::<B, 2>::from_data(TensorData::new(values, [h, 3 * h]), &device);
        self.recurrent.weight = Param::from_tensor(weight);
        self
    }
}

/// Configuration for a [`BiGru`].
#[derive(Debug, Clone)]
pub struct BiGruConfig {
    pub input_size: usize,
    /// Hidden size per direction; outputs are twice this wide.
    pub hidden_size: usize,
}

impl BiGruConfig {
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> BiGru<B> {
        let cell = GruCellConfig::new(self.input_size, self.hidden_size);
        BiGru {
            forward_cell: cell.init(device),
            backward_cell: cell.init(device),
        }
    }
}

/// Bidirectional GRU over whole sequences.
#[derive(Module, Debug)]
pub struct BiGru<B: Backend> {
    pub forward_cell: GruCell<B>,
    pub backward_cell: GruCell<B>,
}

impl<B: Backend> BiGru<B> {
    /// `[batch, time, input]` to `[batch, time, 2 * hidden]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let fwd = self.forward_cell.forward_sequence(input.clone(), false);
        let bwd = self.backward_cell.forward_sequence(input, true);
        Tensor::cat(vec![fwd, bwd], 2)
    }

    pub fn orthonormalize<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        Self {
            forward_cell: self.forward_cell.orthonormalize(rng),
            backward_cell: self.backward_cell.orthonormalize(rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type B = NdArray<f32>;

    #[test]
    fn step_keeps_hidden_shape_and_range() {
        let device = NdArrayDevice::default();
        let cell = GruCellConfig::new(3, 5).init::<B>(&device);
        let x = Tensor::<B, 2>::ones([2, 3], &device);
        let hidden = cell.step(x, cell.init_hidden(2, &device));
        assert_eq!(hidden.dims(), [2, 5]);
        let values: Vec<f32> = hidden.into_data().iter::<f32>().collect();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn bidirectional_output_doubles_width() {
        let device = NdArrayDevice::default();
        let gru = BiGruConfig::new(4, 3).init::<B>(&device);
        let out = gru.forward(Tensor::<B, 3>::ones([1, 6, 4], &device));
        assert_eq!(out.dims(), [1, 6, 6]);
    }

    #[test]
    fn orthonormal_init_preserves_shape() {
        let device = NdArrayDevice::default();
        let mut rng = StdRng::seed_from_u64(9);
        let cell = GruCellConfig::new(2, 4).init::<B>(&device).orthonormalize(&mut rng);
        assert_eq!(cell.recurrent.weight.val().dims(), [4, 12]);
    }
}
