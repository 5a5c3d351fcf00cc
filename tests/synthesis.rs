mod common;

use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArrayDevice;
use common::{assert_close, tiny_config, TestBackend};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;
use tempfile::tempdir;
use vocalis::conditioner::text::encode_text;
use vocalis::config::EncoderConfig;
use vocalis::encodings::Encodings;
use vocalis::features::FeatureMatrix;
use vocalis::model::encoder::{DecodeBound, Seq2SpecConfig};
use vocalis::model::parallel_vocoder::ParallelVocoderModelConfig;
use vocalis::model::tts::{SynthesisOptions, SynthesisVocoder, TtsModel};
use vocalis::model::vocoder::{with_context_frame, VocoderModelConfig};
use vocalis::TtsRuntime;

fn encodings_for(text: &str, speaker: &str) -> Encodings {
    let mut encodings = Encodings::default();
    encodings.update(&encode_text(text, speaker).expect("encode"));
    encodings
}

#[test]
fn two_step_alignment_over_three_positions() {
    let device = NdArrayDevice::default();
    let tokens = encode_text("a", "S1").expect("encode");
    assert_eq!(tokens.len(), 3);
    let encodings = encodings_for("a", "S1");
    let input = encodings.encode_tokens(&tokens, "S1").expect("ids");
    let config = EncoderConfig {
        embedding_dim: 6,
        speaker_dim: 2,
        encoder_hidden: 5,
        attention_dim: 4,
        prenet_dim: 4,
        decoder_hidden: 6,
        ..EncoderConfig::default()
    };
    let model = Seq2SpecConfig::new(&config, 4, &encodings).init::<TestBackend>(&device);
    let output = model
        .synthesize(&input, DecodeBound::Fixed { steps: 2 }, &device)
        .expect("synthesize");

    assert_eq!(output.frames.frames(), 2);
    assert_eq!(output.frames.order(), 4);
    assert_eq!(output.alignment.len(), 2);
    for row in &output.alignment {
        assert_eq!(row.len(), 3);
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}

#[test]
fn teacher_forced_alignment_rows_are_distributions() {
    let device = NdArrayDevice::default();
    let text = "Context matters, Really.";
    let encodings = encodings_for(text, "anca");
    let tokens = encode_text(text, "anca").expect("encode");
    let input = encodings.encode_tokens(&tokens, "anca").expect("ids");
    let model = Seq2SpecConfig::new(&tiny_config().encoder, 8, &encodings).init::<TestBackend>(&device);
    let target = Tensor::<TestBackend, 3>::full([1, 6, 8], 0.5, &device);
    let output = model.forward_teacher_forced(&input, target).expect("forward");
    assert_eq!(output.alignment.dims(), [1, 6, tokens.len()]);
    let sums = output.alignment.sum_dim(2);
    let ones = Tensor::<TestBackend, 3>::ones([1, 6, 1], &device);
    assert_close(&sums.into_data(), &ones.into_data(), 1e-5);
}

#[test]
fn vocoder_samples_ignore_later_conditioning() {
    let device = NdArrayDevice::default();
    let config = tiny_config();
    let hop = 4;
    let vocoder = VocoderModelConfig::new(&config.vocoder, 8, hop).init::<TestBackend>(&device);

    let base: Vec<f32> = (0..5 * 8).map(|i| (i % 5) as f32 / 5.0).collect();
    let mut edited = base.clone();
    for value in &mut edited[4 * 8..] {
        *value = 1.0 - *value;
    }
    let to_features = |data: Vec<f32>| FeatureMatrix::new(data, 5, 8).expect("features");
    let a = vocoder
        .generate(&to_features(base), 0.0, &mut StdRng::seed_from_u64(9), &device)
        .expect("generate");
    let b = vocoder
        .generate(&to_features(edited), 0.0, &mut StdRng::seed_from_u64(9), &device)
        .expect("generate");
    assert_eq!(a.len(), 20);
    assert_eq!(a[..16], b[..16]);
    assert_ne!(a[16..], b[16..]);
}

#[test]
fn vocoder_batch_size_does_not_change_utterances() {
    let device = NdArrayDevice::default();
    let config = tiny_config();
    let hop = 4;
    let vocoder = VocoderModelConfig::new(&config.vocoder, 8, hop).init::<TestBackend>(&device);
    let utterance = |frames: usize, shift: usize| {
        let data = (0..frames * 8).map(|i| ((i + shift) % 7) as f32 / 7.0).collect();
        FeatureMatrix::new(data, frames, 8).expect("features")
    };
    let utterances = vec![utterance(8, 0), utterance(3, 2), utterance(6, 5)];
    let singles: Vec<Vec<f32>> = utterances
        .iter()
        .map(|features| {
            vocoder
                .generate(features, 0.0, &mut StdRng::seed_from_u64(9), &device)
                .expect("generate")
        })
        .collect();
    assert_eq!(singles[0].len(), 8 * hop);
    assert_eq!(singles[1].len(), 3 * hop);

    let synthesis = SynthesisVocoder::Autoregressive(vocoder.clone());
    for batch_size in [1, 2, 32] {
        let batched = synthesis
            .generate_batch(&utterances, batch_size, 0.0, &mut StdRng::seed_from_u64(9), &device)
            .expect("generate batch");
        assert_eq!(batched.len(), singles.len());
        for (batch, single) in batched.iter().zip(&singles) {
            // PCM scale, so the tolerance is loose in absolute terms
            assert_close(
                &TensorData::new(batch.clone(), [batch.len()]),
                &TensorData::new(single.clone(), [single.len()]),
                1e-2,
            );
        }
    }

    // State runs across the whole utterance: the first frame reaches the last samples.
    let mut edited: Vec<f32> = (0..8 * 8).map(|i| (i % 7) as f32 / 7.0).collect();
    for value in &mut edited[..8] {
        *value = 1.0 - *value;
    }
    let edited = FeatureMatrix::new(edited, 8, 8).expect("features");
    let changed = vocoder
        .generate(&edited, 0.0, &mut StdRng::seed_from_u64(9), &device)
        .expect("generate");
    assert_ne!(changed[7 * hop..], singles[0][7 * hop..]);
}

#[test]
fn teacher_forced_vocoder_is_causal_in_the_waveform() {
    let device = NdArrayDevice::default();
    let config = tiny_config();
    let vocoder = VocoderModelConfig::new(&config.vocoder, 8, 4).init::<TestBackend>(&device);
    let frames = Tensor::<TestBackend, 3>::full([1, 3, 8], 0.4, &device);
    let cond = vocoder.conditioning(frames);
    let mut wave: Vec<f32> = vec![0.1; 8];
    let run = |wave: Vec<f32>| -> Vec<f32> {
        let wave = Tensor::<TestBackend, 2>::from_data(TensorData::new(wave, [1, 8]), &device);
        vocoder
            .teacher_forced(cond.clone(), wave)
            .0
            .into_data()
            .iter::<f32>()
            .collect()
    };
    let before = run(wave.clone());
    wave[5] = -0.9;
    let after = run(wave);
    assert_eq!(before[..6], after[..6]);
    assert_ne!(before[6], after[6]);
}

#[test]
fn parallel_vocoder_outpaces_sequential_generation() {
    let device = NdArrayDevice::default();
    let config = tiny_config();
    let hop = 32;
    let frames = 48;
    let features = FeatureMatrix::new(vec![0.3; frames * 8], frames, 8).expect("features");
    let vocoder = VocoderModelConfig::new(&config.vocoder, 8, hop).init::<TestBackend>(&device);
    let student =
        ParallelVocoderModelConfig::new(&config.parallel_vocoder, 8, hop).init::<TestBackend>(&device);

    let start = Instant::now();
    let sequential = vocoder
        .generate(&features, 0.7, &mut StdRng::seed_from_u64(9), &device)
        .expect("sequential");
    let sequential_time = start.elapsed();

    let start = Instant::now();
    let parallel = student
        .generate(&features, 0.7, &mut StdRng::seed_from_u64(9), &device)
        .expect("parallel");
    let parallel_time = start.elapsed();

    assert_eq!(sequential.len(), frames * hop);
    assert_eq!(parallel.len(), frames * hop);
    assert!(
        parallel_time < sequential_time,
        "parallel {parallel_time:?} vs sequential {sequential_time:?}"
    );
}

#[test]
fn conditioning_uses_a_leading_context_frame() {
    let device = NdArrayDevice::default();
    let config = tiny_config();
    let vocoder = VocoderModelConfig::new(&config.vocoder, 8, 3).init::<TestBackend>(&device);
    let frames = Tensor::<TestBackend, 3>::full([1, 2, 8], 0.2, &device);
    let context = frames.clone().narrow(1, 0, 1);
    let cond = vocoder.conditioning(with_context_frame(frames, context));
    assert_eq!(cond.dims(), [1, 6, config.vocoder.cond_dim]);
}

#[test]
fn runtime_writes_waveform_and_spectrogram() {
    let device = NdArrayDevice::default();
    let dir = tempdir().expect("tempdir");
    let config = tiny_config();
    let encodings = encodings_for("Hi", "S1");
    let encoder = Seq2SpecConfig::new(&config.encoder, 8, &encodings).init::<TestBackend>(&device);
    let student = ParallelVocoderModelConfig::new(&config.parallel_vocoder, 8, config.audio.hop_length)
        .init::<TestBackend>(&device);
    let model = TtsModel::new(config.clone(), encodings, encoder, SynthesisVocoder::Parallel(student));
    let mut runtime = TtsRuntime::from_model(model, SynthesisOptions::default(), 9, &device);

    let output = dir.path().join("hi.wav");
    let synthesis = runtime.synthesize_to_file("hi", "S1", &output).expect("synthesize");
    // "hi" -> 4 tokens, 7 frames per token
    assert_eq!(synthesis.features.frames(), 28);
    assert_eq!(synthesis.waveform.len(), 28 * config.audio.hop_length);
    assert!(output.exists());
    assert!(dir.path().join("hi.wav.png").exists());

    let reader = hound::WavReader::open(&output).expect("open wav");
    assert_eq!(reader.spec().sample_rate, 8000);
    assert_eq!(reader.spec().bits_per_sample, 16);
}

#[test]
fn runtime_batches_utterances_through_the_autoregressive_vocoder() {
    let device = NdArrayDevice::default();
    let config = tiny_config();
    let encodings = encodings_for("Hi ho", "S1");
    let encoder = Seq2SpecConfig::new(&config.encoder, 8, &encodings).init::<TestBackend>(&device);
    let vocoder = VocoderModelConfig::new(&config.vocoder, 8, config.audio.hop_length)
        .init::<TestBackend>(&device);
    let model = TtsModel::new(config.clone(), encodings, encoder, SynthesisVocoder::Autoregressive(vocoder));
    let options = SynthesisOptions {
        batch_size: 2,
        ..SynthesisOptions::default()
    };
    let mut runtime = TtsRuntime::from_model(model, options, 9, &device);

    let batch = runtime.synthesize_batch(&["hi", "ho"], "S1").expect("synthesize batch");
    assert_eq!(batch.len(), 2);
    for synthesis in &batch {
        assert_eq!(synthesis.waveform.len(), synthesis.features.frames() * config.audio.hop_length);
    }
}
