//! Context encoding of raw text.
//!
//! Conditioners turn text plus a speaker identity into the tagged token sequence
//! consumed by the encoder.

pub mod text;
