mod common;

use burn::backend::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use common::{assert_close, tiny_config, write_raw_pairs, TestBackend};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use vocalis::conditioner::text::{encode_text, write_lab};
use vocalis::corpus::PairingPolicy;
use vocalis::model::encoder::{Seq2Spec, Seq2SpecConfig};
use vocalis::encodings::{Encodings, ENCODINGS_FILE};
use vocalis::modules::sparsity::measure_sparsity;
use vocalis::training::checkpoint::{CheckpointStore, ENCODER_CHECKPOINT, VOCODER_CHECKPOINT};
use vocalis::training::encoder::encoder_model;
use vocalis::training::{run_phase, Phase, PhaseOutcome, SparsityOptions, TrainingOptions};
use vocalis::{RuntimeParams, TtsError, TtsRuntime};

type TrainBackend = Autodiff<NdArray<f32>>;

fn raw_corpus(root: &Path) {
    write_raw_pairs(
        &root.join("raw/train"),
        &[("anca_0001", "Hello there."), ("anca_0002", "Hello, here.")],
        8000,
    );
    write_raw_pairs(&root.join("raw/dev"), &[("anca_0003", "There.")], 8000);
}

fn options(phase: Phase, root: &Path) -> TrainingOptions {
    let mut options = TrainingOptions::new(phase, root.join("data"));
    options.config = tiny_config();
    options.epochs = Some(1);
    options.batch_size = Some(2);
    options.output_at = 0;
    options.checkpoint_every = 1;
    options
}

fn run(options: &TrainingOptions) -> vocalis::Result<PhaseOutcome> {
    run_phase::<TrainBackend>(options, &NdArrayDevice::default())
}

fn prepare(root: &Path) -> PhaseOutcome {
    let mut prep = options(Phase::CorpusPrep, root);
    prep.train_folder = Some(root.join("raw/train"));
    prep.dev_folder = Some(root.join("raw/dev"));
    run(&prep).expect("corpus prep")
}

#[test]
fn corpus_preparation_is_idempotent() {
    let dir = tempdir().expect("tempdir");
    raw_corpus(dir.path());
    fs::write(dir.path().join("raw/train/orphan.txt"), "no audio").expect("orphan");

    let first = prepare(dir.path());
    let lab = dir.path().join("data/processed/train/anca_0001.lab");
    let first_lab = fs::read(&lab).expect("lab");
    let second = prepare(dir.path());
    assert_eq!(first, second);
    assert_eq!(fs::read(&lab).expect("lab"), first_lab);

    let PhaseOutcome::Corpus(report) = first else {
        panic!("expected a corpus report");
    };
    assert_eq!(report.train.processed.len(), 2);
    assert_eq!(report.dev.processed.len(), 1);
    assert_eq!(report.train.unpaired, vec!["orphan".to_string()]);
}

#[test]
fn strict_pairing_aborts_on_orphans() {
    let dir = tempdir().expect("tempdir");
    raw_corpus(dir.path());
    fs::write(dir.path().join("raw/dev/orphan.wav"), "").expect("orphan");
    let mut prep = options(Phase::CorpusPrep, dir.path());
    prep.train_folder = Some(dir.path().join("raw/train"));
    prep.dev_folder = Some(dir.path().join("raw/dev"));
    prep.pairing = PairingPolicy::Fatal;
    let err = run(&prep).unwrap_err();
    assert!(matches!(err, TtsError::DataIntegrity(_)));
}

#[test]
fn training_without_processed_data_is_missing_path() {
    let dir = tempdir().expect("tempdir");
    let err = run(&options(Phase::TrainVocoder, dir.path())).unwrap_err();
    assert_eq!(err.exit_code(), 8);
}

#[test]
fn resume_without_checkpoint_fails() {
    let dir = tempdir().expect("tempdir");
    raw_corpus(dir.path());
    prepare(dir.path());
    let mut encoder = options(Phase::TrainEncoder, dir.path());
    encoder.resume = true;
    let err = run(&encoder).unwrap_err();
    assert_eq!(err.exit_code(), 5);
}

/// Add a processed train example reusing `anca_0001`'s audio under a new transcript.
fn add_processed_example(root: &Path, name: &str, text: &str) {
    let train = root.join("data/processed/train");
    for suffix in [".orig.wav", ".mgc"] {
        fs::copy(
            train.join(format!("anca_0001{suffix}")),
            train.join(format!("{name}{suffix}")),
        )
        .expect("copy example file");
    }
    fs::write(train.join(format!("{name}.txt")), text).expect("txt");
    write_lab(
        train.join(format!("{name}.lab")),
        &encode_text(text, "anca").expect("encode"),
    )
    .expect("lab");
}

#[test]
fn resumed_encoder_keeps_vocabulary_and_weights() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    raw_corpus(root);
    prepare(root);
    let models = root.join("data/models");
    let device = NdArrayDevice::default();

    run(&options(Phase::TrainEncoder, root)).expect("train encoder");
    let encodings_path = models.join(ENCODINGS_FILE);
    let saved_encodings = fs::read(&encodings_path).expect("encodings");

    // 'z' never appears in the original transcripts
    add_processed_example(root, "anca_0009", "Zoo.");

    let mut resumed = options(Phase::TrainEncoder, root);
    resumed.resume = true;
    let encodings = Encodings::load(&encodings_path).expect("encodings");
    let store = CheckpointStore::new(&models);
    let checkpoint: Seq2Spec<TestBackend> = store
        .load(
            ENCODER_CHECKPOINT,
            Seq2SpecConfig::new(&resumed.config.encoder, resumed.config.audio.mgc_order, &encodings)
                .init::<TestBackend>(&device),
            &device,
        )
        .expect("load encoder");
    let model = encoder_model::<TestBackend, _>(
        &resumed,
        &store,
        &encodings,
        &mut StdRng::seed_from_u64(resumed.seed),
        &device,
    )
    .expect("resume model");
    for (loaded, saved) in [
        (&model.attention_rnn.recurrent.weight, &checkpoint.attention_rnn.recurrent.weight),
        (&model.decoder_rnn.recurrent.weight, &checkpoint.decoder_rnn.recurrent.weight),
    ] {
        assert_close(&loaded.val().into_data(), &saved.val().into_data(), 0.0);
    }

    resumed.epochs = Some(2);
    let PhaseOutcome::Trained(progress) = run(&resumed).expect("resume encoder") else {
        panic!("expected training progress");
    };
    assert_eq!(progress.epoch, 2);
    // The uncovered example is skipped, so only the two original files count.
    assert_eq!(progress.files_processed, 4);
    assert_eq!(fs::read(&encodings_path).expect("encodings"), saved_encodings);
}

#[test]
fn distillation_needs_a_trained_vocoder() {
    let dir = tempdir().expect("tempdir");
    raw_corpus(dir.path());
    prepare(dir.path());
    let err = run(&options(Phase::TrainParallelVocoder, dir.path())).unwrap_err();
    assert!(matches!(err, TtsError::ModelLoad(_)));
}

#[test]
fn full_training_lifecycle_then_synthesis() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    raw_corpus(root);
    prepare(root);
    let models = root.join("data/models");

    let mut vocoder = options(Phase::TrainVocoder, root);
    vocoder.output_at = 2;
    vocoder.sparsity = SparsityOptions {
        target: 50.0,
        step: 50.0,
        increase_at: 1,
    };
    let PhaseOutcome::Trained(progress) = run(&vocoder).expect("train vocoder") else {
        panic!("expected training progress");
    };
    assert_eq!(progress.epoch, 1);
    assert_eq!(progress.files_processed, 2);
    assert_eq!(progress.sparsity, 50.0);
    assert!(models.join("config.yaml").exists());
    assert!(root.join("data/output/nn_vocoder_00000002.wav").exists());

    let device = NdArrayDevice::default();
    let config = tiny_config();
    let store = CheckpointStore::new(&models);
    let saved = store
        .load(
            VOCODER_CHECKPOINT,
            vocalis::model::vocoder::VocoderModelConfig::new(&config.vocoder, 8, 80)
                .init::<TestBackend>(&device),
            &device,
        )
        .expect("load vocoder");
    assert!(measure_sparsity(saved.rnn.recurrent.weight.val()) >= 0.5 - 1e-6);

    vocoder.resume = true;
    vocoder.epochs = Some(2);
    let PhaseOutcome::Trained(resumed) = run(&vocoder).expect("resume vocoder") else {
        panic!("expected training progress");
    };
    assert_eq!(resumed.epoch, 2);
    assert_eq!(resumed.files_processed, 4);

    let encoder_run = run(&options(Phase::TrainEncoder, root)).expect("train encoder");
    let PhaseOutcome::Trained(encoder) = encoder_run else {
        panic!("expected training progress");
    };
    assert_eq!(encoder.epoch, 1);
    assert!(encoder.best_dev_loss.is_some());
    let encodings = Encodings::load(models.join(ENCODINGS_FILE)).expect("encodings");
    assert_eq!(encodings.speakers.id("anca"), Some(0));

    run(&options(Phase::TrainParallelVocoder, root)).expect("distill");
    assert!(models.join("pnn_vocoder.mpk").exists());

    let mut runtime =
        TtsRuntime::<TestBackend>::from_model_dir(&models, RuntimeParams::default(), &device)
            .expect("load runtime");
    assert_eq!(runtime.config(), &config);
    let output = root.join("hello.wav");
    let synthesis = runtime
        .synthesize_to_file("Hello there.", "anca", &output)
        .expect("synthesize");
    assert_eq!(synthesis.waveform.len(), synthesis.features.frames() * 80);
    assert!(output.exists());
}
