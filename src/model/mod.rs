//! Model components: the attention encoder, both vocoders and the combined TTS stack.
//!
//! The encoder produces acoustic frames from encoded text, the vocoders turn frames
//! into samples, and `tts` wires them together for synthesis.

pub mod encoder;
pub mod parallel_vocoder;
pub mod tts;
pub mod vocoder;
