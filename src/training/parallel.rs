//! Distillation of the autoregressive vocoder into the parallel student.

use crate::audio::io::WavIo;
use crate::dataset::{stack_segments, Dataset};
use crate::error::Result;
use crate::model::parallel_vocoder::{Distiller, ParallelVocoder, ParallelVocoderModelConfig};
use crate::model::vocoder::VocoderModelConfig;
use crate::perf::{self, Metric};
use crate::training::checkpoint::{TrainingProgress, PARALLEL_VOCODER_CHECKPOINT, VOCODER_CHECKPOINT};
use crate::training::session::{epoch_order, loss_value, open_nonempty, LossMeter};
use crate::training::vocoder::{crop, PREVIEW_TEMPERATURE};
use crate::training::{Split, TrainingOptions};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Mean distillation loss over fixed mid-utterance dev crops, with noise drawn from `seed`.
pub fn dev_loss<B: Backend>(
    distiller: &Distiller<B>,
    dev: &Dataset,
    segment_frames: usize,
    order: usize,
    batch_size: usize,
    seed: u64,
    device: &B::Device,
) -> Result<Option<f32>> {
    let _span = perf::span(Metric::DevEvaluation);
    let mut rng = StdRng::seed_from_u64(seed);
    let hop = distiller.student.hop;
    let mut meter = LossMeter::default();
    let indices: Vec<usize> = (0..dev.len()).collect();
    for chunk in indices.chunks(batch_size) {
        let segments = chunk
            .iter()
            .map(|&idx| crop::<StdRng>(dev, idx, segment_frames, hop, order, None))
            .collect::<Result<Vec<_>>>()?;
        let (frames, _) = stack_segments::<B>(&segments, segment_frames, order, device);
        meter.add(loss_value(&distiller.loss(frames, &mut rng).total()));
    }
    Ok(meter.mean())
}

/// Train (or resume) the `pnn_vocoder` checkpoint against the saved `nn_vocoder`.
pub fn train_parallel_vocoder<B: AutodiffBackend>(
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
    let mut session = options.session(PARALLEL_VOCODER_CHECKPOINT)?;
    let mut rng = StdRng::seed_from_u64(options.seed);

    let teacher = session.store.load(
        VOCODER_CHECKPOINT,
        VocoderModelConfig::new(&config.vocoder, order, hop).init::<B>(device),
        device,
    )?;
    let fresh = ParallelVocoderModelConfig::new(&config.parallel_vocoder, order, hop).init::<B>(device);
    let student = if options.resume {
        session.store.load(PARALLEL_VOCODER_CHECKPOINT, fresh, device)?
    } else {
        fresh
    };
    let mut distiller = Distiller::new(teacher, student);
    let mut optim = AdamConfig::new().init::<B, ParallelVocoder<B>>();

    tracing::info!(
        train = train.len(),
        dev = dev.len(),
        batch_size,
        "distilling parallel vocoder"
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
            let (frames, _) = stack_segments::<B>(&segments, segment_frames, order, device);

            let loss = distiller.loss(frames, &mut rng).total();
            meter.add(loss_value(&loss));
            let grads = GradientsParams::from_grads(loss.backward(), &distiller.student);
            let student = optim.step(options.learning_rate, distiller.student.clone(), grads);
            distiller = distiller.with_student(student);

            let events = session.advance(chunk.len());
            if events.preview {
                let source = if dev.is_empty() { &train } else { &dev };
                let features = source.features_of_order(0, order)?;
                let waveform = distiller.student.valid().generate(
                    &features,
                    PREVIEW_TEMPERATURE,
                    &mut rng,
                    device,
                )?;
                let path = session.preview_path("wav")?;
                WavIo::write_pcm_scaled(&path, &waveform, config.audio.sample_rate)?;
                tracing::info!(path = %path.display(), "parallel vocoder preview written");
            }
            if events.checkpoint {
                session.save(&distiller.student)?;
            }
        }
        let evaluation = Distiller::new(distiller.teacher().valid(), distiller.student.valid());
        let dev_loss = dev_loss(&evaluation, &dev, segment_frames, order, batch_size, options.seed, device)?;
        session.finish_epoch(&distiller.student, meter.mean(), dev_loss)?;
    }
    Ok(session.progress)
}
