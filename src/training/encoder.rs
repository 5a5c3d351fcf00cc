//! Sequence-to-spectrogram encoder training.
//!
//! A fresh run rebuilds the vocabulary from every train label file and initializes the
//! recurrent matrices orthonormally. A resumed run keeps the persisted vocabulary and
//! the loaded weights as they are; train examples the frozen vocabulary does not cover
//! are skipped with a warning.

use crate::audio::render::{save_png, RenderScale};
use crate::conditioner::text::utterance_speaker;
use crate::dataset::Dataset;
use crate::encodings::{EncodedInput, Encodings, ENCODINGS_FILE};
use crate::error::{Result, TtsError};
use crate::model::encoder::{DecodeBound, EncoderLoss, Seq2Spec, Seq2SpecConfig};
use crate::perf::{self, Metric};
use crate::training::checkpoint::{CheckpointStore, TrainingProgress, ENCODER_CHECKPOINT};
use crate::training::session::{epoch_order, loss_value, open_nonempty, LossMeter};
use crate::training::{Split, TrainingOptions};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Encoded labels of one example.
pub fn encode_example(dataset: &Dataset, index: usize, encodings: &Encodings) -> Result<EncodedInput> {
    let tokens = dataset.tokens(index)?;
    let speaker = utterance_speaker(&tokens).ok_or_else(|| {
        TtsError::DataIntegrity(format!(
            "{} carries no speaker tag",
            dataset.paths(index).lab().display()
        ))
    })?;
    encodings.encode_tokens(&tokens, speaker)
}

/// Vocabulary covering every train label file.
pub fn build_encodings(train: &Dataset) -> Result<Encodings> {
    let mut encodings = Encodings::default();
    for index in 0..train.len() {
        encodings.update(&train.tokens(index)?);
    }
    tracing::info!(
        characters = encodings.characters.len(),
        context = encodings.context.len(),
        speakers = encodings.speakers.len(),
        "encodings built"
    );
    Ok(encodings)
}

/// Encoded train examples, keyed by dataset index.
///
/// Examples with characters or speakers outside `encodings` are left out.
pub fn covered_examples(train: &Dataset, encodings: &Encodings) -> Result<Vec<(usize, EncodedInput)>> {
    let mut covered = Vec::with_capacity(train.len());
    for index in 0..train.len() {
        match encode_example(train, index, encodings) {
            Ok(input) => covered.push((index, input)),
            Err(err @ (TtsError::UnknownSymbol(_) | TtsError::UnknownSpeaker(_))) => {
                tracing::warn!(example = %train.names()[index], %err, "train example not covered, skipping");
            }
            Err(err) => return Err(err),
        }
    }
    if covered.is_empty() {
        return Err(TtsError::DataIntegrity(
            "no train example is covered by the encodings".into(),
        ));
    }
    Ok(covered)
}

/// Encoder to train: the saved checkpoint when resuming, otherwise a fresh
/// orthonormally initialized model.
pub fn encoder_model<B: Backend, R: Rng + ?Sized>(
    options: &TrainingOptions,
    store: &CheckpointStore,
    encodings: &Encodings,
    rng: &mut R,
    device: &B::Device,
) -> Result<Seq2Spec<B>> {
    let fresh = Seq2SpecConfig::new(&options.config.encoder, options.config.audio.mgc_order, encodings)
        .init::<B>(device);
    if options.resume {
        store.load(ENCODER_CHECKPOINT, fresh, device)
    } else {
        Ok(fresh.orthonormalize(rng))
    }
}

/// Mean teacher-forced loss over dev examples the vocabulary covers.
pub fn dev_loss<B: Backend>(
    model: &Seq2Spec<B>,
    dev: &Dataset,
    encodings: &Encodings,
    guided_sigma: Option<f32>,
    device: &B::Device,
) -> Result<Option<f32>> {
    let _span = perf::span(Metric::DevEvaluation);
    let order = model.mgc_order;
    let mut meter = LossMeter::default();
    for index in 0..dev.len() {
        let input = match encode_example(dev, index, encodings) {
            Ok(input) => input,
            Err(err @ (TtsError::UnknownSymbol(_) | TtsError::UnknownSpeaker(_))) => {
                tracing::debug!(example = %dev.names()[index], %err, "dev example not covered");
                continue;
            }
            Err(err) => return Err(err),
        };
        let target = dev.features_of_order(index, order)?.to_tensor::<B>(device);
        let output = model.forward_teacher_forced(&input, target.clone())?;
        meter.add(loss_value(&EncoderLoss::compute(&output, target, guided_sigma).total()));
    }
    Ok(meter.mean())
}

/// Train (or resume) the `rnn_encoder` checkpoint.
pub fn train_encoder<B: AutodiffBackend>(
    options: &TrainingOptions,
    device: &B::Device,
) -> Result<TrainingProgress> {
    let config = &options.config;
    let order = config.audio.mgc_order;
    let batch_size = options.batch_size();
    let guided_sigma = options
        .guided_attention
        .then_some(config.encoder.guided_attention_sigma);

    let train = open_nonempty(&options.processed_split(Split::Train))?;
    let dev = Dataset::open(options.processed_split(Split::Dev))?;
    let mut session = options.session(ENCODER_CHECKPOINT)?;
    let mut rng = StdRng::seed_from_u64(options.seed);

    let encodings_path = options.models_dir().join(ENCODINGS_FILE);
    let encodings = if options.resume {
        Encodings::load(&encodings_path)?
    } else {
        let encodings = build_encodings(&train)?;
        encodings.save(&encodings_path)?;
        encodings
    };
    let examples = covered_examples(&train, &encodings)?;
    let mut model = encoder_model::<B, _>(options, &session.store, &encodings, &mut rng, device)?;
    let mut optim = AdamConfig::new().init::<B, Seq2Spec<B>>();

    tracing::info!(
        train = examples.len(),
        skipped = train.len() - examples.len(),
        dev = dev.len(),
        batch_size,
        guided_attention = guided_sigma.is_some(),
        "training encoder"
    );

    for epoch in session.progress.epoch..options.epochs() {
        let _epoch_span = perf::span(Metric::TrainEpoch);
        let mut meter = LossMeter::default();
        for chunk in epoch_order(examples.len(), epoch, options.seed).chunks(batch_size) {
            let _step_span = perf::span(Metric::TrainStep);
            let mut losses = Vec::with_capacity(chunk.len());
            for &position in chunk {
                let (index, input) = &examples[position];
                let target = train.features_of_order(*index, order)?.to_tensor::<B>(device);
                let output = model.forward_teacher_forced(input, target.clone())?;
                losses.push(EncoderLoss::compute(&output, target, guided_sigma).total());
            }
            let loss = Tensor::cat(losses, 0).mean();
            meter.add(loss_value(&loss));
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(options.learning_rate, model, grads);

            let events = session.advance(chunk.len());
            if events.preview {
                let source = if dev.is_empty() { &train } else { &dev };
                preview(&model.valid(), source, &encodings, options, &session.preview_path("png")?, device)?;
            }
            if events.checkpoint {
                session.save(&model)?;
            }
        }
        let dev_loss = dev_loss(&model.valid(), &dev, &encodings, guided_sigma, device)?;
        session.finish_epoch(&model, meter.mean(), dev_loss)?;
    }
    Ok(session.progress)
}

/// Free-running spectrogram of the first example, saved as a PNG.
///
/// A decode that never stops is logged and skipped.
fn preview<B: Backend>(
    model: &Seq2Spec<B>,
    source: &Dataset,
    encodings: &Encodings,
    options: &TrainingOptions,
    path: &std::path::Path,
    device: &B::Device,
) -> Result<()> {
    let input = match encode_example(source, 0, encodings) {
        Ok(input) => input,
        Err(err @ (TtsError::UnknownSymbol(_) | TtsError::UnknownSpeaker(_))) => {
            tracing::warn!(%err, "preview example not covered by the vocabulary");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    let bound = DecodeBound::for_input(input.len(), &options.config.encoder, options.unbounded);
    match model.synthesize(&input, bound, device) {
        Ok(output) => {
            save_png(path, &output.frames.rows(), RenderScale::Clip)?;
            tracing::info!(path = %path.display(), frames = output.frames.frames(), "encoder preview written");
            Ok(())
        }
        Err(TtsError::SynthesisLength { ceiling }) => {
            tracing::warn!(ceiling, "preview decode never stopped");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
