//! # vocalis - context-aware text-to-speech
//!
//! A Rust text-to-speech engine built on burn: characters are tagged with speaker and
//! casing context, an attention encoder turns them into acoustic frames, and a neural
//! vocoder turns the frames into a waveform.
//!
//! ## Architecture Overview
//!
//! 1. **Context encoding** ([`conditioner::text`]): text becomes a `START`/`STOP`
//!    delimited token sequence, each character tagged with `SPEAKER:<id>` and
//!    `CASE:{upper,lower,symb}`. [`Encodings`] maps symbols, tags and speakers to ids.
//!
//! 2. **Seq2Spec encoder** ([`model::encoder`]): a bidirectional GRU over the tokens,
//!    additive attention and an autoregressive frame decoder with a learned stop signal.
//!
//! 3. **Vocoders**: the autoregressive GRU vocoder ([`model::vocoder`]) produces one
//!    sample per step; the distilled parallel vocoder ([`model::parallel_vocoder`])
//!    produces every sample in one pass and is preferred for synthesis when present.
//!
//! 4. **Training** ([`training`]): corpus preparation followed by separately invoked
//!    vocoder, encoder and parallel-vocoder phases with checkpoint/resume.
//!
//! ## Quick Start
//!
//! ```no_run
//! use burn_ndarray::{NdArray, NdArrayDevice};
//! use vocalis::{RuntimeParams, TtsRuntime};
//!
//! let device = NdArrayDevice::default();
//! let mut runtime =
//!     TtsRuntime::<NdArray<f32>>::from_model_dir("data/models", RuntimeParams::default(), &device)
//!         .unwrap();
//! runtime.synthesize_to_file("Hello, world!", "anca", "hello.wav").unwrap();
//! ```
//!
//! ## Configuration
//!
//! Model hyperparameters live in a YAML file (see [`Config`]); training writes the
//! effective configuration next to its checkpoints and synthesis reads it back.

pub mod audio;
pub mod config;
pub mod error;
pub mod perf;
pub mod runtime;

// Internal modules - exposed for integration tests but not part of stable API.
#[doc(hidden)]
pub mod conditioner;
#[doc(hidden)]
pub mod corpus;
#[doc(hidden)]
pub mod dataset;
#[doc(hidden)]
pub mod encodings;
#[doc(hidden)]
pub mod features;
#[doc(hidden)]
pub mod model;
#[doc(hidden)]
pub mod modules;
#[doc(hidden)]
pub mod state;
#[doc(hidden)]
pub mod training;

pub use config::{load_config, Config};
pub use encodings::Encodings;
pub use error::{Result, TtsError};
pub use model::tts::{Synthesis, SynthesisOptions, TtsModel};
pub use runtime::{RuntimeParams, TtsRuntime};
pub use training::{run_phase, Phase, PhaseOutcome, TrainingOptions};
