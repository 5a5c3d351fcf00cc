//! Distilled parallel vocoder.
//!
//! The student is a stack of inverse-autoregressive affine flows. Each flow reads the
//! current noise sequence through causal dilated convolutions whose first layer excludes
//! the current position, so every output depends only on earlier noise values and the
//! conditioning. All positions are produced in one pass.
//!
//! Because each flow is affine in its input, the composed transform is
//! `x = z * S + M`, and the student's per-sample distribution is `N(M, S)`.

use crate::audio::io::PCM_SCALE;
use crate::config::ParallelVocoderConfig;
use crate::error::{Result, TtsError};
use crate::features::FeatureMatrix;
use crate::model::vocoder::{with_context_frame, Vocoder};
use crate::modules::causal_conv::{CausalConv1d, CausalConv1dConfig};
use crate::modules::init::standard_normal;
use crate::modules::upsample::lagging_interpolate;
use crate::perf::{self, Metric};
use burn::module::Module;
use burn::tensor::activation::tanh;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_nn::{Linear, LinearConfig};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct ParallelVocoderModelConfig {
    pub model: ParallelVocoderConfig,
    pub mgc_order: usize,
    pub hop: usize,
}

impl ParallelVocoderModelConfig {
    pub fn new(model: &ParallelVocoderConfig, mgc_order: usize, hop: usize) -> Self {
        Self {
            model: model.clone(),
            mgc_order,
            hop,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ParallelVocoder<B> {
        let m = &self.model;
        let flows = (0..m.num_flows)
            .map(|_| {
                let input = CausalConv1dConfig::new(1, m.channels, m.kernel_size)
                    .with_shifted(true)
                    .init(device);
                let layers = m
                    .dilations
                    .iter()
                    .map(|dilation| {
                        CausalConv1dConfig::new(m.channels, m.channels, m.kernel_size)
                            .with_dilation(*dilation)
                            .init(device)
                    })
                    .collect();
                AffineFlow {
                    input,
                    cond: LinearConfig::new(m.cond_dim, m.channels).init(device),
                    layers,
                    output: LinearConfig::new(m.channels, 2).init(device),
                    log_scale_min: m.log_scale_min,
                }
            })
            .collect();
        ParallelVocoder {
            cond_proj: LinearConfig::new(self.mgc_order, m.cond_dim).init(device),
            flows,
            hop: self.hop,
        }
    }
}

/// One inverse-autoregressive affine flow.
#[derive(Module, Debug)]
pub struct AffineFlow<B: Backend> {
    /// Shifted causal conv over the noise, `1 -> channels`.
    pub input: CausalConv1d<B>,
    /// Conditioning projection, `cond_dim -> channels`.
    pub cond: Linear<B>,
    pub layers: Vec<CausalConv1d<B>>,
    /// `channels -> [shift, log_scale]`
    pub output: Linear<B>,
    pub log_scale_min: f32,
}

impl<B: Backend> AffineFlow<B> {
    /// `noise` `[batch, samples]`, `conditioning` `[batch, samples, cond_dim]`.
    ///
    /// Returns `(shift, log_scale)` for every position, each `[batch, samples]`.
    pub fn forward(&self, noise: Tensor<B, 2>, conditioning: Tensor<B, 3>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, samples] = noise.dims();
        let cond = self.cond.forward(conditioning).swap_dims(1, 2);
        let mut hidden = tanh(self.input.forward(noise.unsqueeze_dim::<3>(1)).add(cond));
        for layer in &self.layers {
            hidden = hidden.clone().add(tanh(layer.forward(hidden)));
        }
        let out = self.output.forward(hidden.swap_dims(1, 2));
        let shift = out.clone().narrow(2, 0, 1).reshape([batch, samples]);
        let log_scale = out
            .narrow(2, 1, 1)
            .reshape([batch, samples])
            .clamp_min(self.log_scale_min);
        (shift, log_scale)
    }
}

/// Student output for a noise draw.
#[derive(Debug, Clone)]
pub struct FlowOutput<B: Backend> {
    /// Normalized samples `[batch, samples]`.
    pub samples: Tensor<B, 2>,
    /// Mean of the per-sample distribution.
    pub mean: Tensor<B, 2>,
    /// Log standard deviation of the per-sample distribution.
    pub log_scale: Tensor<B, 2>,
}

#[derive(Module, Debug)]
pub struct ParallelVocoder<B: Backend> {
    pub cond_proj: Linear<B>,
    pub flows: Vec<AffineFlow<B>>,
    pub hop: usize,
}

impl<B: Backend> ParallelVocoder<B> {
    /// Per-sample conditioning from `[batch, 1 + frames, order]`.
    pub fn conditioning(&self, frames_with_context: Tensor<B, 3>) -> Tensor<B, 3> {
        let [_, total, _] = frames_with_context.dims();
        let frames = total.saturating_sub(1);
        let projected = self.cond_proj.forward(frames_with_context);
        lagging_interpolate(projected, self.hop).narrow(1, self.hop, frames * self.hop)
    }

    /// Push `noise` `[batch, samples]` through every flow in one pass.
    pub fn transform(&self, noise: Tensor<B, 2>, conditioning: Tensor<B, 3>) -> FlowOutput<B> {
        let device = noise.device();
        let dims = noise.dims();
        let mut x = noise;
        let mut mean = Tensor::<B, 2>::zeros(dims, &device);
        let mut log_scale = Tensor::<B, 2>::zeros(dims, &device);
        for flow in &self.flows {
            let (shift, flow_log_scale) = flow.forward(x.clone(), conditioning.clone());
            let scale = flow_log_scale.clone().exp();
            x = x.mul(scale.clone()).add(shift.clone());
            mean = mean.mul(scale).add(shift);
            log_scale = log_scale.add(flow_log_scale);
        }
        FlowOutput {
            samples: x,
            mean,
            log_scale,
        }
    }

    /// Generate a PCM-scale waveform in a single parallel pass.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        features: &FeatureMatrix,
        temperature: f32,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Vec<f32>> {
        let _span = perf::span(Metric::ParallelGenerate);
        if features.frames() == 0 {
            return Err(TtsError::EmptyInput);
        }
        let frames = features.to_tensor::<B>(device);
        let context = frames.clone().narrow(1, 0, 1);
        let conditioning = self.conditioning(with_context_frame(frames, context));
        let samples = conditioning.dims()[1];
        let noise_scale = temperature.max(0.0).sqrt();
        let noise: Vec<f32> = standard_normal(rng, samples)
            .into_iter()
            .map(|value| value * noise_scale)
            .collect();
        let noise = Tensor::<B, 2>::from_data(TensorData::new(noise, [1, samples]), device);
        let output = self.transform(noise, conditioning);
        perf::add_count(Metric::VocoderSamples, samples as u64);
        Ok(output
            .samples
            .into_data()
            .iter::<f32>()
            .map(|value| value * PCM_SCALE)
            .collect())
    }
}

/// Individual distillation loss terms.
#[derive(Debug, Clone)]
pub struct DistillationLoss<B: Backend> {
    /// Mean KL(student || teacher).
    pub kl: Tensor<B, 1>,
    /// Mean squared log-scale difference.
    pub log_scale: Tensor<B, 1>,
}

impl<B: Backend> DistillationLoss<B> {
    pub fn total(&self) -> Tensor<B, 1> {
        self.kl.clone().add(self.log_scale.clone())
    }
}

/// Closed-form KL between per-sample Gaussians, averaged.
pub fn gaussian_kl<B: Backend>(
    student_mean: Tensor<B, 2>,
    student_log_scale: Tensor<B, 2>,
    teacher_mean: Tensor<B, 2>,
    teacher_log_scale: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let student_var = student_log_scale.clone().mul_scalar(2.0).exp();
    let teacher_var = teacher_log_scale.clone().mul_scalar(2.0).exp();
    let mean_diff = student_mean.sub(teacher_mean).powf_scalar(2.0);
    teacher_log_scale
        .sub(student_log_scale)
        .add(student_var.add(mean_diff).div(teacher_var.mul_scalar(2.0)))
        .sub_scalar(0.5)
        .mean()
}

/// Frozen autoregressive teacher paired with a trainable parallel student.
#[derive(Debug)]
pub struct Distiller<B: Backend> {
    teacher: Vocoder<B>,
    pub student: ParallelVocoder<B>,
}

impl<B: Backend> Distiller<B> {
    /// The teacher's parameters stop tracking gradients.
    pub fn new(teacher: Vocoder<B>, student: ParallelVocoder<B>) -> Self {
        Self {
            teacher: teacher.no_grad(),
            student,
        }
    }

    pub fn teacher(&self) -> &Vocoder<B> {
        &self.teacher
    }

    /// Swap in the student after an optimizer step.
    pub fn with_student(self, student: ParallelVocoder<B>) -> Self {
        Self {
            teacher: self.teacher,
            student,
        }
    }

    /// Distillation objective on crops: `frames_with_context` `[batch, 1 + frames, order]`.
    ///
    /// The teacher scores the student's own samples teacher-forced.
    pub fn loss<R: Rng + ?Sized>(&self, frames_with_context: Tensor<B, 3>, rng: &mut R) -> DistillationLoss<B> {
        let device = frames_with_context.device();
        let student_cond = self.student.conditioning(frames_with_context.clone());
        let [batch, samples, _] = student_cond.dims();
        let noise = Tensor::<B, 2>::from_data(
            TensorData::new(standard_normal(rng, batch * samples), [batch, samples]),
            &device,
        );
        let student = self.student.transform(noise, student_cond);

        let teacher_cond = self.teacher.conditioning(frames_with_context);
        let (teacher_mean, teacher_log_scale) =
            self.teacher.teacher_forced(teacher_cond, student.samples.clone());

        let kl = gaussian_kl(
            student.mean,
            student.log_scale.clone(),
            teacher_mean,
            teacher_log_scale.clone(),
        );
        let log_scale = student.log_scale.sub(teacher_log_scale).powf_scalar(2.0).mean();
        DistillationLoss { kl, log_scale }
    }
}
