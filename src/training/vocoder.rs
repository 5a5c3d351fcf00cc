//! Autoregressive vocoder training with scheduled magnitude pruning.

use crate::audio::io::WavIo;
use crate::dataset::{random_segment, segment_at, stack_segments, Dataset, Segment};
use crate::error::Result;
use crate::model::vocoder::{Vocoder, VocoderModelConfig};
use crate::modules::sparsity::SparsitySchedule;
use crate::perf::{self, Metric};
use crate::training::checkpoint::{TrainingProgress, VOCODER_CHECKPOINT};
use crate::training::session::{epoch_order, loss_value, open_nonempty, LossMeter};
use crate::training::{Split, TrainingOptions};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Temperature used for preview waveforms.
pub const PREVIEW_TEMPERATURE: f32 = 0.7;

/// Crop of `dataset[index]`, drawn at random or taken from the middle of the utterance.
pub fn crop<R: Rng + ?Sized>(
    dataset: &Dataset,
    index: usize,
    segment_frames: usize,
    hop: usize,
    order: usize,
    rng: Option<&mut R>,
) -> Result<Segment> {
    let features = dataset.features_of_order(index, order)?;
    let waveform = dataset.waveform(index)?;
    Ok(match rng {
        Some(rng) => random_segment(&features, &waveform, segment_frames, hop, rng),
        None => {
            let start = features.frames().saturating_sub(segment_frames) / 2;
            segment_at(&features, &waveform, start, segment_frames, hop)
        }
    })
}

/// Mean NLL over fixed mid-utterance crops of every dev example.
pub fn dev_loss<B: Backend>(
    model: &Vocoder<B>,
    dev: &Dataset,
    segment_frames: usize,
    order: usize,
    batch_size: usize,
    device: &B::Device,
) -> Result<Option<f32>> {
    let _span = perf::span(Metric::DevEvaluation);
    let mut meter = LossMeter::default();
    let indices: Vec<usize> = (0..dev.len()).collect();
    for chunk in indices.chunks(batch_size) {
        let segments = chunk
            .iter()
            .map(|&idx| crop::<StdRng>(dev, idx, segment_frames, model.hop, order, None))
            .collect::<Result<Vec<_>>>()?;
        let (frames, samples) = stack_segments::<B>(&segments, segment_frames, order, device);
        meter.add(loss_value(&model.nll_loss(frames, samples)));
    }
    Ok(meter.mean())
}

/// Train (or resume) the `nn_vocoder` checkpoint.
pub fn train_vocoder<B: AutodiffBackend>(
    options: &TrainingOptions,
    device: &B::Device,
) -> Result<TrainingProgress> {
    let config = &options.config;
    let order = config.audio.mgc_order;
    let hop = config.audio.hop_length;
    let segment_frames = config.vocoder.segment_frames;
    let batch_size = options.batch_size();

    let train = open_nonempty(&options.processed_split(Split::Train))?;
    let dev = Dataset::open(options.processed_split(Split::Dev))?;
    let mut session = options.session(VOCODER_CHECKPOINT)?;
    let mut rng = StdRng::seed_from_u64(options.seed);

    let fresh = VocoderModelConfig::new(&config.vocoder, order, hop).init::<B>(device);
    let mut model = if options.resume {
        session.store.load(VOCODER_CHECKPOINT, fresh, device)?
    } else {
        fresh.orthonormalize(&mut rng)
    };
    let mut sparsity = SparsitySchedule::new(
        options.sparsity.target,
        options.sparsity.step,
        options.sparsity.increase_at,
    )
    .resumed_at(session.progress.sparsity, session.progress.files_processed);
    let mut optim = AdamConfig::new().init::<B, Vocoder<B>>();

    tracing::info!(
        train = train.len(),
        dev = dev.len(),
        batch_size,
        sparsity = sparsity.current,
        "training vocoder"
    );

    for epoch in session.progress.epoch..options.epochs() {
        let _epoch_span = perf::span(Metric::TrainEpoch);
        let mut meter = LossMeter::default();
        for chunk in epoch_order(train.len(), epoch, options.seed).chunks(batch_size) {
            let _step_span = perf::span(Metric::TrainStep);
            let segments = chunk
                .iter()
                .map(|&idx| crop(&train, idx, segment_frames, hop, order, Some(&mut rng)))
                .collect::<Result<Vec<_>>>()?;
            let (frames, samples) = stack_segments::<B>(&segments, segment_frames, order, device);

            let loss = model.nll_loss(frames, samples);
            meter.add(loss_value(&loss));
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(options.learning_rate, model, grads);

            if sparsity.advance(chunk.len()) {
                tracing::info!(sparsity = sparsity.current, "sparsity raised");
            }
            if sparsity.current > 0.0 {
                model = model.prune(sparsity.fraction());
            }
            session.progress.sparsity = sparsity.current;

            let events = session.advance(chunk.len());
            if events.preview {
                let source = if dev.is_empty() { &train } else { &dev };
                let features = source.features_of_order(0, order)?;
                let waveform = model
                    .valid()
                    .generate(&features, PREVIEW_TEMPERATURE, &mut rng, device)?;
                let path = session.preview_path("wav")?;
                WavIo::write_pcm_scaled(&path, &waveform, config.audio.sample_rate)?;
                tracing::info!(path = %path.display(), "vocoder preview written");
            }
            if events.checkpoint {
                session.save(&model)?;
            }
        }
        let dev_loss = dev_loss(&model.valid(), &dev, segment_frames, order, batch_size, device)?;
        session.finish_epoch(&model, meter.mean(), dev_loss)?;
    }
    Ok(session.progress)
}
