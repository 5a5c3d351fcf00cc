//! Low-level neural network building blocks.
//!
//! Recurrent cells, attention, causal convolutions and conditioning upsampling
//! shared by the encoder and both vocoders, plus the pruning used during
//! vocoder training.

pub mod attention;
pub mod causal_conv;
pub mod gru;
pub mod init;
pub mod sparsity;
pub mod upsample;
