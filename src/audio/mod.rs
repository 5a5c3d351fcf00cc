//! Audio I/O, resampling, feature analysis and spectrogram rendering.
//!
//! These helpers keep signal handling separate from the models, focusing on
//! reading/writing waveforms, converting sample rates, computing acoustic frames
//! and turning frames into preview images.

pub mod io;
pub mod mel;
pub mod render;
pub mod resample;
