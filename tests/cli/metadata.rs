use std::process::{Command, Output};
use tempfile::tempdir;

fn vocalis(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vocalis"))
        .args(args)
        .output()
        .expect("run vocalis")
}

#[test]
fn cli_help_lists_commands() {
    let output = vocalis(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("synthesize"));
    assert!(stdout.contains("train"));
}

#[test]
fn synthesize_without_input_is_a_configuration_error() {
    let output = vocalis(&["synthesize", "--speaker", "anca", "--output-file", "out.wav"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--input-file"));
}

#[test]
fn synthesize_with_missing_input_file_is_missing_path() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("missing.txt");
    let output_file = dir.path().join("out.wav");
    let output = vocalis(&[
        "synthesize",
        "--input-file",
        missing.to_str().expect("utf8 path"),
        "--speaker",
        "anca",
        "--output-file",
        output_file.to_str().expect("utf8 path"),
    ]);
    assert_eq!(output.status.code(), Some(8));
    assert!(!output_file.exists());
}

#[test]
fn train_without_phase_is_a_configuration_error() {
    let output = vocalis(&["train"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--phase"));
}

#[test]
fn corpus_prep_without_source_folders_is_a_configuration_error() {
    let dir = tempdir().expect("tempdir");
    let output = vocalis(&[
        "train",
        "--phase",
        "corpus-prep",
        "--data-dir",
        dir.path().to_str().expect("utf8 path"),
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn vocoder_training_without_a_corpus_is_missing_path() {
    let dir = tempdir().expect("tempdir");
    let output = vocalis(&[
        "train",
        "--phase",
        "train-vocoder",
        "--data-dir",
        dir.path().to_str().expect("utf8 path"),
    ]);
    assert_eq!(output.status.code(), Some(8));
}
