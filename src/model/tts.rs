//! End-to-end text-to-speech model orchestration.
//!
//! Wires context encoding, the attention encoder and one of the two vocoders into a
//! single text-to-waveform call.

use crate::conditioner::text::encode_text;
use crate::config::Config;
use crate::encodings::Encodings;
use crate::error::Result;
use crate::features::FeatureMatrix;
use crate::model::encoder::{DecodeBound, Seq2Spec};
use crate::model::parallel_vocoder::ParallelVocoder;
use crate::model::vocoder::Vocoder;
use crate::perf::{self, Metric};
use burn::tensor::backend::Backend;
use rand::Rng;

/// The vocoder used for synthesis.
#[derive(Debug)]
pub enum SynthesisVocoder<B: Backend> {
    /// Distilled student, one parallel pass.
    Parallel(ParallelVocoder<B>),
    /// One sequential chain per utterance; utterances may share a batch.
    Autoregressive(Vocoder<B>),
}

impl<B: Backend> SynthesisVocoder<B> {
    pub fn name(&self) -> &'static str {
        match self {
            SynthesisVocoder::Parallel(_) => "parallel",
            SynthesisVocoder::Autoregressive(_) => "autoregressive",
        }
    }

    /// PCM-scale waveform for the given frames.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        features: &FeatureMatrix,
        temperature: f32,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Vec<f32>> {
        match self {
            SynthesisVocoder::Parallel(vocoder) => vocoder.generate(features, temperature, rng, device),
            SynthesisVocoder::Autoregressive(vocoder) => vocoder.generate(features, temperature, rng, device),
        }
    }

    /// PCM-scale waveforms for several utterances, in input order.
    ///
    /// The autoregressive vocoder runs up to `batch_size` utterances per batch.
    pub fn generate_batch<R: Rng + ?Sized>(
        &self,
        utterances: &[FeatureMatrix],
        batch_size: usize,
        temperature: f32,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Vec<Vec<f32>>> {
        match self {
            SynthesisVocoder::Parallel(vocoder) => utterances
                .iter()
                .map(|features| vocoder.generate(features, temperature, rng, device))
                .collect(),
            SynthesisVocoder::Autoregressive(vocoder) => {
                let mut waveforms = Vec::with_capacity(utterances.len());
                for group in utterances.chunks(batch_size.max(1)) {
                    waveforms.extend(vocoder.generate_batch(group, temperature, rng, device)?);
                }
                Ok(waveforms)
            }
        }
    }
}

/// Generation options for one synthesis call.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisOptions {
    /// Sampling temperature (0.0 = mean of the output distribution).
    pub temperature: f32,
    /// Utterances the autoregressive vocoder generates together in a batch call.
    pub batch_size: usize,
    /// Disable the length-proportional decode bound and rely on the stop signal.
    pub unbounded: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            batch_size: 32,
            unbounded: false,
        }
    }
}

/// Everything produced for one utterance.
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// PCM-scale samples at the model sample rate.
    pub waveform: Vec<f32>,
    pub features: FeatureMatrix,
    pub alignment: Vec<Vec<f32>>,
}

/// Encoder plus vocoder plus the vocabulary they were trained with.
#[derive(Debug)]
pub struct TtsModel<B: Backend> {
    pub config: Config,
    pub encodings: Encodings,
    pub encoder: Seq2Spec<B>,
    pub vocoder: SynthesisVocoder<B>,
}

impl<B: Backend> TtsModel<B> {
    pub fn new(
        config: Config,
        encodings: Encodings,
        encoder: Seq2Spec<B>,
        vocoder: SynthesisVocoder<B>,
    ) -> Self {
        Self {
            config,
            encodings,
            encoder,
            vocoder,
        }
    }

    /// Acoustic frames for `text` spoken by `speaker`.
    pub fn text_to_features(
        &self,
        text: &str,
        speaker: &str,
        unbounded: bool,
        device: &B::Device,
    ) -> Result<(FeatureMatrix, Vec<Vec<f32>>)> {
        let tokens = encode_text(text, speaker)?;
        let input = self.encodings.encode_tokens(&tokens, speaker)?;
        perf::add_count(Metric::TtsTokens, input.len() as u64);
        let bound = DecodeBound::for_input(input.len(), &self.config.encoder, unbounded);
        let output = self.encoder.synthesize(&input, bound, device)?;
        Ok((output.frames, output.alignment))
    }

    /// Full text-to-waveform synthesis.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        text: &str,
        speaker: &str,
        options: SynthesisOptions,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Synthesis> {
        let _span = perf::span(Metric::TtsSynthesize);
        let (features, alignment) = self.text_to_features(text, speaker, options.unbounded, device)?;
        let waveform = self.vocoder.generate(&features, options.temperature, rng, device)?;
        tracing::debug!(
            frames = features.frames(),
            samples = waveform.len(),
            vocoder = self.vocoder.name(),
            "synthesized utterance"
        );
        Ok(Synthesis {
            waveform,
            features,
            alignment,
        })
    }

    /// Synthesize several texts for one speaker, batching the vocoder calls.
    pub fn synthesize_batch<R: Rng + ?Sized>(
        &self,
        texts: &[&str],
        speaker: &str,
        options: SynthesisOptions,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Vec<Synthesis>> {
        let _span = perf::span(Metric::TtsSynthesize);
        let mut utterances = Vec::with_capacity(texts.len());
        let mut alignments = Vec::with_capacity(texts.len());
        for text in texts {
            let (features, alignment) = self.text_to_features(text, speaker, options.unbounded, device)?;
            utterances.push(features);
            alignments.push(alignment);
        }
        let waveforms =
            self.vocoder
                .generate_batch(&utterances, options.batch_size, options.temperature, rng, device)?;
        Ok(waveforms
            .into_iter()
            .zip(utterances)
            .zip(alignments)
            .map(|((waveform, features), alignment)| Synthesis {
                waveform,
                features,
                alignment,
            })
            .collect())
    }
}
