//! Sequence-to-spectrogram attention encoder.
//!
//! Characters and their context tags are embedded, a bidirectional GRU turns them into
//! encoder states, and an attention decoder emits one acoustic frame per step while
//! attending over those states.

use crate::config::EncoderConfig;
use crate::encodings::{EncodedInput, Encodings};
use crate::error::{Result, TtsError};
use crate::features::FeatureMatrix;
use crate::modules::attention::{AdditiveAttention, AdditiveAttentionConfig};
use crate::modules::gru::{BiGru, BiGruConfig, GruCell, GruCellConfig};
use crate::perf::{self, Metric};
use crate::state::StepModule;
use burn::module::Module;
use burn::tensor::activation::{relu, sigmoid, softplus};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use burn_nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use rand::Rng;

/// When decoding stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeBound {
    /// Decode exactly `steps` frames; the stop signal is ignored.
    Fixed { steps: usize },
    /// Stop once the stop probability exceeds `threshold`. Running `ceiling` steps
    /// without that happening is an error.
    Learned { threshold: f32, ceiling: usize },
}

impl DecodeBound {
    /// Fixed bound proportional to the input length.
    pub fn proportional(input_len: usize, frames_per_token: f32) -> Self {
        let steps = (input_len as f32 * frames_per_token).ceil().max(1.0) as usize;
        DecodeBound::Fixed { steps }
    }

    /// Bound selected by the `--no-bounds` switch.
    pub fn for_input(input_len: usize, config: &EncoderConfig, unbounded: bool) -> Self {
        if unbounded {
            DecodeBound::Learned {
                threshold: config.stop_threshold,
                ceiling: config.max_decode_steps,
            }
        } else {
            Self::proportional(input_len, config.frames_per_token)
        }
    }
}

/// Result of free-running synthesis.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Predicted frames `[steps, order]`.
    pub frames: FeatureMatrix,
    /// One attention row per decode step, each over all encoder positions.
    pub alignment: Vec<Vec<f32>>,
    /// Stop probability per step.
    pub stop_probs: Vec<f32>,
}

/// Tensors produced by a teacher-forced pass.
#[derive(Debug, Clone)]
pub struct TeacherForced<B: Backend> {
    /// `[1, steps, order]`
    pub frames: Tensor<B, 3>,
    /// `[1, steps]`
    pub stop_logits: Tensor<B, 2>,
    /// `[1, steps, positions]`
    pub alignment: Tensor<B, 3>,
}

/// Architecture plus vocabulary sizes.
#[derive(Debug, Clone)]
pub struct Seq2SpecConfig {
    pub model: EncoderConfig,
    pub mgc_order: usize,
    pub num_characters: usize,
    pub context_rows: usize,
    pub num_speakers: usize,
}

impl Seq2SpecConfig {
    pub fn new(model: &EncoderConfig, mgc_order: usize, encodings: &Encodings) -> Self {
        Self {
            model: model.clone(),
            mgc_order,
            num_characters: encodings.characters.len().max(1),
            context_rows: encodings.context_rows(),
            num_speakers: encodings.speakers.len().max(1),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Seq2Spec<B> {
        let m = &self.model;
        let memory_dim = 2 * m.encoder_hidden;
        Seq2Spec {
            symbol_embedding: EmbeddingConfig::new(self.num_characters, m.embedding_dim).init(device),
            context_embedding: EmbeddingConfig::new(self.context_rows, m.embedding_dim).init(device),
            speaker_embedding: EmbeddingConfig::new(self.num_speakers, m.speaker_dim).init(device),
            encoder: BiGruConfig::new(m.embedding_dim + m.speaker_dim, m.encoder_hidden).init(device),
            prenet: LinearConfig::new(self.mgc_order, m.prenet_dim).init(device),
            attention_rnn: GruCellConfig::new(m.prenet_dim + memory_dim, m.decoder_hidden)
                .init(device),
            attention: AdditiveAttentionConfig::new(m.decoder_hidden, memory_dim, m.attention_dim)
                .init(device),
            decoder_rnn: GruCellConfig::new(m.decoder_hidden + memory_dim, m.decoder_hidden)
                .init(device),
            frame_proj: LinearConfig::new(m.decoder_hidden + memory_dim, self.mgc_order).init(device),
            stop_proj: LinearConfig::new(m.decoder_hidden + memory_dim, 1).init(device),
            mgc_order: self.mgc_order,
        }
    }
}

/// Attention encoder-decoder mapping token ids to acoustic frames.
#[derive(Module, Debug)]
pub struct Seq2Spec<B: Backend> {
    pub symbol_embedding: Embedding<B>,
    /// Shared by speaker and casing tags; row 0 is "no tag".
    pub context_embedding: Embedding<B>,
    pub speaker_embedding: Embedding<B>,
    pub encoder: BiGru<B>,
    pub prenet: Linear<B>,
    pub attention_rnn: GruCell<B>,
    pub attention: AdditiveAttention<B>,
    pub decoder_rnn: GruCell<B>,
    pub frame_proj: Linear<B>,
    pub stop_proj: Linear<B>,
    pub mgc_order: usize,
}

/// Decoder state threaded between steps.
#[derive(Debug, Clone)]
pub struct DecoderState<B: Backend> {
    pub attention_hidden: Tensor<B, 2>,
    pub decoder_hidden: Tensor<B, 2>,
    /// Context vector from the previous step.
    pub context: Tensor<B, 2>,
    /// Encoder states `[batch, positions, 2 * encoder_hidden]`.
    pub memory: Tensor<B, 3>,
    /// Attention projection of `memory`.
    pub processed_memory: Tensor<B, 3>,
}

/// Output of one decoder step.
#[derive(Debug, Clone)]
pub struct DecoderStep<B: Backend> {
    /// `[batch, order]`, values in `[0, 1]`.
    pub frame: Tensor<B, 2>,
    /// `[batch, 1]`
    pub stop_logit: Tensor<B, 2>,
    /// `[batch, positions]`, rows sum to 1.
    pub alignment: Tensor<B, 2>,
}

fn int_row<B: Backend>(ids: &[i64], device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::from_data(TensorData::new(ids.to_vec(), [1, ids.len()]), device)
}

impl<B: Backend> Seq2Spec<B> {
    /// Encode ids into encoder states `[1, positions, 2 * encoder_hidden]`.
    pub fn encode(&self, input: &EncodedInput, device: &B::Device) -> Result<Tensor<B, 3>> {
        if input.is_empty() {
            return Err(TtsError::EmptyInput);
        }
        let positions = input.len();
        let symbols = self.symbol_embedding.forward(int_row(&input.symbols, device));
        let speaker_tags = self.context_embedding.forward(int_row(&input.speaker_tags, device));
        let case_tags = self.context_embedding.forward(int_row(&input.case_tags, device));
        let speaker = self
            .speaker_embedding
            .forward(int_row(&[input.speaker], device))
            .repeat_dim(1, positions);
        let embedded = Tensor::cat(vec![symbols.add(speaker_tags).add(case_tags), speaker], 2);
        Ok(self.encoder.forward(embedded))
    }

    /// Initial decoder state for the given encoder states.
    pub fn init_decoder(&self, memory: Tensor<B, 3>) -> DecoderState<B> {
        let [batch, _, memory_dim] = memory.dims();
        let device = memory.device();
        DecoderState {
            attention_hidden: self.attention_rnn.init_hidden(batch, &device),
            decoder_hidden: self.decoder_rnn.init_hidden(batch, &device),
            context: Tensor::zeros([batch, memory_dim], &device),
            processed_memory: self.attention.project_memory(memory.clone()),
            memory,
        }
    }

    /// One decode step from the previous frame.
    pub fn decoder_step(
        &self,
        state: DecoderState<B>,
        previous_frame: Tensor<B, 2>,
    ) -> (DecoderState<B>, DecoderStep<B>) {
        let prenet = relu(self.prenet.forward(previous_frame));
        let attention_input = Tensor::cat(vec![prenet, state.context], 1);
        let attention_hidden = self.attention_rnn.step(attention_input, state.attention_hidden);
        let (context, alignment) = self.attention.forward(
            attention_hidden.clone(),
            state.processed_memory.clone(),
            state.memory.clone(),
        );
        let decoder_input = Tensor::cat(vec![attention_hidden.clone(), context.clone()], 1);
        let decoder_hidden = self.decoder_rnn.step(decoder_input, state.decoder_hidden);
        let projection_input = Tensor::cat(vec![decoder_hidden.clone(), context.clone()], 1);
        let frame = sigmoid(self.frame_proj.forward(projection_input.clone()));
        let stop_logit = self.stop_proj.forward(projection_input);

        let next = DecoderState {
            attention_hidden,
            decoder_hidden,
            context,
            memory: state.memory,
            processed_memory: state.processed_memory,
        };
        (
            next,
            DecoderStep {
                frame,
                stop_logit,
                alignment,
            },
        )
    }

    /// Decode against ground-truth frames `[1, steps, order]`, feeding each target frame
    /// back as the next input.
    pub fn forward_teacher_forced(
        &self,
        input: &EncodedInput,
        target: Tensor<B, 3>,
    ) -> Result<TeacherForced<B>> {
        let device = target.device();
        let [batch, steps, order] = target.dims();
        let memory = self.encode(input, &device)?;
        let mut state = self.init_decoder(memory);
        let mut previous = Tensor::<B, 2>::zeros([batch, order], &device);
        let mut frames = Vec::with_capacity(steps);
        let mut stops = Vec::with_capacity(steps);
        let mut rows = Vec::with_capacity(steps);
        for t in 0..steps {
            let (next, out) = self.decoder_step(state, previous);
            state = next;
            frames.push(out.frame);
            stops.push(out.stop_logit);
            rows.push(out.alignment);
            previous = target.clone().narrow(1, t, 1).reshape([batch, order]);
        }
        Ok(TeacherForced {
            frames: Tensor::stack(frames, 1),
            stop_logits: Tensor::cat(stops, 1),
            alignment: Tensor::stack(rows, 1),
        })
    }

    /// Free-running synthesis under a decode bound.
    ///
    /// # Errors
    ///
    /// [`TtsError::SynthesisLength`] when a learned bound reaches its ceiling.
    pub fn synthesize(
        &self,
        input: &EncodedInput,
        bound: DecodeBound,
        device: &B::Device,
    ) -> Result<EncoderOutput> {
        let _span = perf::span(Metric::EncoderSynthesize);
        let memory = self.encode(input, device)?;
        let mut state = self.init_decoder(memory);
        let mut previous = Tensor::<B, 2>::zeros([1, self.mgc_order], device);
        let mut frames = Vec::new();
        let mut alignment = Vec::new();
        let mut stop_probs = Vec::new();

        let limit = match bound {
            DecodeBound::Fixed { steps } => steps,
            DecodeBound::Learned { ceiling, .. } => ceiling,
        };
        let mut stopped = false;
        for _ in 0..limit {
            let (next, out) = self.decoder_step(state, previous);
            state = next;
            previous = out.frame.clone();
            frames.extend(out.frame.into_data().iter::<f32>());
            alignment.push(out.alignment.into_data().iter::<f32>().collect::<Vec<f32>>());
            let stop_prob: f32 = sigmoid(out.stop_logit)
                .into_data()
                .iter::<f32>()
                .next()
                .unwrap_or(0.0);
            stop_probs.push(stop_prob);
            if let DecodeBound::Learned { threshold, .. } = bound {
                if stop_prob > threshold {
                    stopped = true;
                    break;
                }
            }
        }
        if let DecodeBound::Learned { ceiling, .. } = bound {
            if !stopped {
                return Err(TtsError::SynthesisLength { ceiling });
            }
        }

        perf::add_count(Metric::EncoderFrames, stop_probs.len() as u64);
        let steps = stop_probs.len();
        Ok(EncoderOutput {
            frames: FeatureMatrix::new(frames, steps, self.mgc_order)?,
            alignment,
            stop_probs,
        })
    }

    /// Apply orthonormal initialization to every recurrent matrix.
    pub fn orthonormalize<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        Self {
            encoder: self.encoder.orthonormalize(rng),
            attention_rnn: self.attention_rnn.orthonormalize(rng),
            decoder_rnn: self.decoder_rnn.orthonormalize(rng),
            ..self
        }
    }
}

impl<B: Backend> StepModule<B> for Seq2Spec<B> {
    type State = DecoderState<B>;
    type Input = Tensor<B, 2>;
    type Output = DecoderStep<B>;

    fn step(&self, state: Self::State, input: Self::Input) -> (Self::State, Self::Output) {
        self.decoder_step(state, input)
    }
}

/// Guided-attention penalty weights `[1, steps, positions]`.
///
/// `W[t, n] = 1 - exp(-(n / N - t / T)^2 / (2 g^2))`, small near the diagonal.
pub fn guided_attention_weights<B: Backend>(
    steps: usize,
    positions: usize,
    sigma: f32,
    device: &B::Device,
) -> Tensor<B, 3> {
    let mut values = Vec::with_capacity(steps * positions);
    for t in 0..steps {
        for n in 0..positions {
            let diff = n as f32 / positions as f32 - t as f32 / steps as f32;
            values.push(1.0 - (-(diff * diff) / (2.0 * sigma * sigma)).exp());
        }
    }
    Tensor::from_data(TensorData::new(values, [1, steps, positions]), device)
}

/// Individual encoder loss terms.
#[derive(Debug, Clone)]
pub struct EncoderLoss<B: Backend> {
    pub frames: Tensor<B, 1>,
    pub stop: Tensor<B, 1>,
    pub attention: Option<Tensor<B, 1>>,
}

impl<B: Backend> EncoderLoss<B> {
    /// L1 frame loss, stop BCE (positive only at the final step) and, when `guided_sigma`
    /// is set, the guided-attention penalty.
    pub fn compute(output: &TeacherForced<B>, target: Tensor<B, 3>, guided_sigma: Option<f32>) -> Self {
        let device = target.device();
        let [_, steps, _] = target.dims();
        let frames = output.frames.clone().sub(target).abs().mean();

        let mut labels = vec![0.0f32; steps];
        if let Some(last) = labels.last_mut() {
            *last = 1.0;
        }
        let labels = Tensor::<B, 2>::from_data(TensorData::new(labels, [1, steps]), &device);
        let logits = output.stop_logits.clone();
        let stop = softplus(logits.clone(), 1.0).sub(logits.mul(labels)).mean();

        let attention = guided_sigma.map(|sigma| {
            let [_, steps, positions] = output.alignment.dims();
            let weights = guided_attention_weights::<B>(steps, positions, sigma, &device);
            output.alignment.clone().mul(weights).mean()
        });

        Self {
            frames,
            stop,
            attention,
        }
    }

    pub fn total(&self) -> Tensor<B, 1> {
        let total = self.frames.clone().add(self.stop.clone());
        match &self.attention {
            Some(attention) => total.add(attention.clone()),
            None => total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioner::text::encode_text;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type B = NdArray<f32>;

    fn tiny_config() -> EncoderConfig {
        EncoderConfig {
            embedding_dim: 8,
            speaker_dim: 4,
            encoder_hidden: 6,
            attention_dim: 5,
            prenet_dim: 6,
            decoder_hidden: 7,
            max_decode_steps: 12,
            ..EncoderConfig::default()
        }
    }

    fn tiny_model(device: &NdArrayDevice) -> (Seq2Spec<B>, EncodedInput) {
        let tokens = encode_text("Ab", "S1").expect("encode");
        let mut encodings = Encodings::default();
        encodings.update(&tokens);
        let input = encodings.encode_tokens(&tokens, "S1").expect("ids");
        let model = Seq2SpecConfig::new(&tiny_config(), 4, &encodings).init::<B>(device);
        (model, input)
    }

    #[test]
    fn fixed_bound_decodes_exact_steps() {
        let device = NdArrayDevice::default();
        let (model, input) = tiny_model(&device);
        let output = model
            .synthesize(&input, DecodeBound::Fixed { steps: 5 }, &device)
            .expect("synthesize");
        assert_eq!(output.frames.frames(), 5);
        assert_eq!(output.alignment.len(), 5);
        for row in &output.alignment {
            assert_eq!(row.len(), 4);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert!(output.frames.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn learned_bound_without_stop_hits_ceiling() {
        let device = NdArrayDevice::default();
        let (model, input) = tiny_model(&device);
        let err = model
            .synthesize(
                &input,
                DecodeBound::Learned {
                    threshold: 1.0,
                    ceiling: 3,
                },
                &device,
            )
            .unwrap_err();
        assert!(matches!(err, TtsError::SynthesisLength { ceiling: 3 }));
    }

    #[test]
    fn learned_bound_stops_on_signal() {
        let device = NdArrayDevice::default();
        let (model, input) = tiny_model(&device);
        let output = model
            .synthesize(
                &input,
                DecodeBound::Learned {
                    threshold: -1.0,
                    ceiling: 3,
                },
                &device,
            )
            .expect("synthesize");
        assert_eq!(output.frames.frames(), 1);
    }

    #[test]
    fn proportional_bound_scales_with_input() {
        assert_eq!(DecodeBound::proportional(10, 2.5), DecodeBound::Fixed { steps: 25 });
        assert_eq!(DecodeBound::proportional(0, 2.5), DecodeBound::Fixed { steps: 1 });
    }

    #[test]
    fn guided_weights_vanish_on_diagonal() {
        let device = NdArrayDevice::default();
        let weights: Vec<f32> = guided_attention_weights::<B>(4, 4, 0.2, &device)
            .into_data()
            .iter::<f32>()
            .collect();
        for i in 0..4 {
            assert!(weights[i * 4 + i].abs() < 1e-6);
        }
        assert!(weights[3] > 0.9);
    }

    #[test]
    fn teacher_forced_losses_are_finite() {
        let device = NdArrayDevice::default();
        let (model, input) = tiny_model(&device);
        let target = Tensor::<B, 3>::full([1, 6, 4], 0.5, &device);
        let output = model
            .forward_teacher_forced(&input, target.clone())
            .expect("forward");
        assert_eq!(output.alignment.dims(), [1, 6, 4]);
        let loss = EncoderLoss::compute(&output, target, Some(0.2));
        let total: f32 = loss.total().into_scalar();
        assert!(total.is_finite() && total > 0.0);
    }
}
