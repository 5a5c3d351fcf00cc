//! Additive (content-based) attention over encoder states.

use burn::module::Module;
use burn::tensor::activation::{softmax, tanh};
use burn::tensor::{backend::Backend, Tensor};
use burn_nn::{Linear, LinearConfig};

/// Configuration for [`AdditiveAttention`].
#[derive(Debug, Clone)]
pub struct AdditiveAttentionConfig {
    /// Size of the decoder query.
    pub query_dim: usize,
    /// Size of each encoder state.
    pub memory_dim: usize,
    /// Shared projection size.
    pub attention_dim: usize,
}

impl AdditiveAttentionConfig {
    pub fn new(query_dim: usize, memory_dim: usize, attention_dim: usize) -> Self {
        Self {
            query_dim,
            memory_dim,
            attention_dim,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> AdditiveAttention<B> {
        AdditiveAttention {
            query: LinearConfig::new(self.query_dim, self.attention_dim)
                .with_bias(false)
                .init(device),
            memory: LinearConfig::new(self.memory_dim, self.attention_dim).init(device),
            score: LinearConfig::new(self.attention_dim, 1)
                .with_bias(false)
                .init(device),
        }
    }
}

/// `score(q, m) = v^T tanh(W_q q + W_m m)`, normalized with softmax over positions.
#[derive(Module, Debug)]
pub struct AdditiveAttention<B: Backend> {
    pub query: Linear<B>,
    pub memory: Linear<B>,
    pub score: Linear<B>,
}

impl<B: Backend> AdditiveAttention<B> {
    /// Pre-project encoder states once per utterance: `[batch, positions, attention_dim]`.
    pub fn project_memory(&self, memory: Tensor<B, 3>) -> Tensor<B, 3> {
        self.memory.forward(memory)
    }

    /// Attend with `query` `[batch, query_dim]`.
    ///
    /// Returns the context vector `[batch, memory_dim]` and the attention row
    /// `[batch, positions]`, which sums to 1.
    pub fn forward(
        &self,
        query: Tensor<B, 2>,
        processed_memory: Tensor<B, 3>,
        memory: Tensor<B, 3>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, positions, _] = processed_memory.dims();
        let memory_dim = memory.dims()[2];
        let query = self.query.forward(query).unsqueeze_dim::<3>(1);
        let energies = self
            .score
            .forward(tanh(processed_memory.add(query)))
            .reshape([batch, positions]);
        let weights = softmax(energies, 1);
        let context = weights
            .clone()
            .unsqueeze_dim::<3>(1)
            .matmul(memory)
            .reshape([batch, memory_dim]);
        (context, weights)
    }
}
