//! Autoregressive neural vocoder.
//!
//! A GRU consumes per-sample conditioning plus the previously generated sample and
//! predicts a Gaussian over the next one. Generation is strictly sequential within an
//! utterance; only separate utterances share the batch dimension.
//!
//! Internally samples are normalized to `[-1, 1]`; [`Vocoder::generate`] returns them at
//! PCM scale (multiplied by [`PCM_SCALE`]).

use crate::audio::io::PCM_SCALE;
use crate::config::VocoderConfig;
use crate::error::{Result, TtsError};
use crate::features::FeatureMatrix;
use crate::modules::gru::{GruCell, GruCellConfig};
use crate::modules::init::standard_normal;
use crate::modules::sparsity::prune_param;
use crate::modules::upsample::lagging_interpolate;
use crate::perf::{self, Metric};
use crate::state::StepModule;
use burn::module::Module;
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_nn::{Linear, LinearConfig};
use rand::Rng;

/// Gaussian negative log-likelihood of `target` under `(mean, log_scale)`, averaged.
pub fn gaussian_nll<B: Backend, const D: usize>(
    mean: Tensor<B, D>,
    log_scale: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    let half_log_two_pi = 0.5 * (2.0 * std::f32::consts::PI).ln();
    let z = target.sub(mean).div(log_scale.clone().exp());
    log_scale
        .add(z.powf_scalar(2.0).mul_scalar(0.5))
        .add_scalar(half_log_two_pi)
        .mean()
}

/// Prepend the context frame used by lagging interpolation for the first frame.
///
/// `frames` is `[batch, frames, order]`; the result has one more frame.
pub fn with_context_frame<B: Backend>(frames: Tensor<B, 3>, context: Tensor<B, 3>) -> Tensor<B, 3> {
    Tensor::cat(vec![context, frames], 1)
}

#[derive(Debug, Clone)]
pub struct VocoderModelConfig {
    pub model: VocoderConfig,
    pub mgc_order: usize,
    /// Samples per frame.
    pub hop: usize,
}

impl VocoderModelConfig {
    pub fn new(model: &VocoderConfig, mgc_order: usize, hop: usize) -> Self {
        Self {
            model: model.clone(),
            mgc_order,
            hop,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vocoder<B> {
        let m = &self.model;
        Vocoder {
            cond_proj: LinearConfig::new(self.mgc_order, m.cond_dim).init(device),
            rnn: GruCellConfig::new(m.cond_dim + 1, m.hidden_size).init(device),
            hidden_proj: LinearConfig::new(m.hidden_size, m.hidden_size).init(device),
            output: LinearConfig::new(m.hidden_size, 2).init(device),
            hop: self.hop,
            log_scale_min: m.log_scale_min,
        }
    }
}

/// Recurrent state: GRU hidden plus the previous sample.
#[derive(Debug, Clone)]
pub struct VocoderState<B: Backend> {
    /// `[batch, hidden]`
    pub hidden: Tensor<B, 2>,
    /// `[batch, 1]`, normalized.
    pub previous: Tensor<B, 2>,
}

/// Per-step input: conditioning and temperature-scaled standard noise.
#[derive(Debug, Clone)]
pub struct VocoderInput<B: Backend> {
    /// `[batch, cond_dim]`
    pub conditioning: Tensor<B, 2>,
    /// `[batch, 1]`; zero gives the distribution mean.
    pub noise: Tensor<B, 2>,
}

#[derive(Module, Debug)]
pub struct Vocoder<B: Backend> {
    /// Per-frame conditioning projection, applied before upsampling.
    pub cond_proj: Linear<B>,
    pub rnn: GruCell<B>,
    pub hidden_proj: Linear<B>,
    /// `[mean, log_scale]`
    pub output: Linear<B>,
    pub hop: usize,
    pub log_scale_min: f32,
}

impl<B: Backend> Vocoder<B> {
    /// Zero state for `batch_size` utterances.
    pub fn init_state(&self, batch_size: usize, device: &B::Device) -> VocoderState<B> {
        VocoderState {
            hidden: self.rnn.init_hidden(batch_size, device),
            previous: Tensor::zeros([batch_size, 1], device),
        }
    }

    /// Per-sample conditioning from `[batch, 1 + frames, order]` (leading context frame).
    ///
    /// Returns `[batch, frames * hop, cond_dim]`.
    pub fn conditioning(&self, frames_with_context: Tensor<B, 3>) -> Tensor<B, 3> {
        let [_, total, _] = frames_with_context.dims();
        let frames = total.saturating_sub(1);
        let projected = self.cond_proj.forward(frames_with_context);
        lagging_interpolate(projected, self.hop).narrow(1, self.hop, frames * self.hop)
    }

    fn predict(&self, hidden: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let out = self.output.forward(relu(self.hidden_proj.forward(hidden)));
        let mean = out.clone().narrow(1, 0, 1);
        let log_scale = out.narrow(1, 1, 1).clamp_min(self.log_scale_min);
        (mean, log_scale)
    }

    /// Teacher-forced pass over `[batch, samples]` normalized audio.
    ///
    /// Returns `(mean, log_scale)`, both `[batch, samples]`, predicting each sample from
    /// the true previous samples.
    pub fn teacher_forced(
        &self,
        conditioning: Tensor<B, 3>,
        waveform: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, samples, cond_dim] = conditioning.dims();
        let device = conditioning.device();
        let mut hidden = self.rnn.init_hidden(batch, &device);
        let mut previous = Tensor::<B, 2>::zeros([batch, 1], &device);
        let mut means = Vec::with_capacity(samples);
        let mut scales = Vec::with_capacity(samples);
        for t in 0..samples {
            let cond = conditioning.clone().narrow(1, t, 1).reshape([batch, cond_dim]);
            hidden = self.rnn.step(Tensor::cat(vec![cond, previous], 1), hidden);
            let (mean, log_scale) = self.predict(hidden.clone());
            means.push(mean);
            scales.push(log_scale);
            previous = waveform.clone().narrow(1, t, 1);
        }
        (Tensor::cat(means, 1), Tensor::cat(scales, 1))
    }

    /// Training objective on a batch of crops.
    ///
    /// `frames_with_context` is `[batch, 1 + frames, order]`, `waveform` is
    /// `[batch, frames * hop]` normalized audio.
    pub fn nll_loss(&self, frames_with_context: Tensor<B, 3>, waveform: Tensor<B, 2>) -> Tensor<B, 1> {
        let conditioning = self.conditioning(frames_with_context);
        let (mean, log_scale) = self.teacher_forced(conditioning, waveform.clone());
        gaussian_nll(mean, log_scale, waveform)
    }

    /// Generate a PCM-scale waveform from acoustic frames.
    ///
    /// One sequential chain over every sample of the utterance; `temperature` scales the
    /// sampling variance and 0 yields the mean.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        features: &FeatureMatrix,
        temperature: f32,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Vec<f32>> {
        let mut waveforms = self.generate_batch(std::slice::from_ref(features), temperature, rng, device)?;
        waveforms.pop().ok_or(TtsError::EmptyInput)
    }

    /// Generate several utterances side by side, one batch row each.
    ///
    /// Every row carries its own state across all of its samples; shorter utterances
    /// are padded with zero conditioning and trimmed afterwards.
    pub fn generate_batch<R: Rng + ?Sized>(
        &self,
        utterances: &[FeatureMatrix],
        temperature: f32,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Vec<Vec<f32>>> {
        let _span = perf::span(Metric::VocoderGenerate);
        if utterances.is_empty() {
            return Ok(Vec::new());
        }
        if utterances.iter().any(|features| features.frames() == 0) {
            return Err(TtsError::EmptyInput);
        }
        let lengths: Vec<usize> = utterances
            .iter()
            .map(|features| features.frames() * self.hop)
            .collect();
        let longest = lengths.iter().copied().max().unwrap_or(0);
        let rows = utterances.len();

        let mut parts = Vec::with_capacity(rows);
        for (features, &len) in utterances.iter().zip(&lengths) {
            let frames = features.to_tensor::<B>(device);
            let context = frames.clone().narrow(1, 0, 1);
            let mut part = self.conditioning(with_context_frame(frames, context));
            if len < longest {
                let cond_dim = part.dims()[2];
                let padding = Tensor::<B, 3>::zeros([1, longest - len, cond_dim], device);
                part = Tensor::cat(vec![part, padding], 1);
            }
            parts.push(part);
        }
        let conditioning = Tensor::cat(parts, 0);
        let cond_dim = conditioning.dims()[2];

        let noise_scale = temperature.max(0.0).sqrt();
        let mut state = self.init_state(rows, device);
        let mut outputs = Vec::with_capacity(longest);
        for t in 0..longest {
            let noise: Vec<f32> = if noise_scale > 0.0 {
                standard_normal(rng, rows)
                    .into_iter()
                    .map(|value| value * noise_scale)
                    .collect()
            } else {
                vec![0.0; rows]
            };
            let input = VocoderInput {
                conditioning: conditioning.clone().narrow(1, t, 1).reshape([rows, cond_dim]),
                noise: Tensor::from_data(TensorData::new(noise, [rows, 1]), device),
            };
            let (next, sample) = self.step(state, input);
            state = next;
            outputs.push(sample);
        }
        perf::add_count(Metric::VocoderSamples, lengths.iter().sum::<usize>() as u64);

        let values: Vec<f32> = Tensor::cat(outputs, 1).into_data().iter::<f32>().collect();
        Ok(lengths
            .iter()
            .enumerate()
            .map(|(row, &len)| {
                values[row * longest..row * longest + len]
                    .iter()
                    .map(|value| value * PCM_SCALE)
                    .collect()
            })
            .collect())
    }

    /// Orthonormal recurrent initialization for a fresh model.
    pub fn orthonormalize<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        Self {
            rnn: self.rnn.orthonormalize(rng),
            ..self
        }
    }

    /// Magnitude-prune the recurrent matrix to `fraction`.
    pub fn prune(mut self, fraction: f32) -> Self {
        self.rnn.recurrent.weight = prune_param(self.rnn.recurrent.weight, fraction);
        self
    }
}

impl<B: Backend> StepModule<B> for Vocoder<B> {
    type State = VocoderState<B>;
    type Input = VocoderInput<B>;
    type Output = Tensor<B, 2>;

    /// Sample = mean + exp(log_scale) * noise; the sample becomes the next `previous`.
    fn step(&self, state: Self::State, input: Self::Input) -> (Self::State, Self::Output) {
        let x = Tensor::cat(vec![input.conditioning, state.previous], 1);
        let hidden = self.rnn.step(x, state.hidden);
        let (mean, log_scale) = self.predict(hidden.clone());
        let sample = mean.add(log_scale.exp().mul(input.noise));
        (
            VocoderState {
                hidden,
                previous: sample.clone(),
            },
            sample,
        )
    }
}
