//! Explicit state threading for step-wise generation.
//!
//! Autoregressive components never hide recurrent state inside themselves: a step
//! consumes the previous state by value and returns the next one alongside its output.

use burn::tensor::backend::Backend;

/// Implemented by modules that generate one step at a time.
pub trait StepModule<B: Backend> {
    /// Recurrent state carried between steps.
    type State;
    /// Per-step input.
    type Input;
    /// Per-step output.
    type Output;

    /// Advance one step.
    fn step(&self, state: Self::State, input: Self::Input) -> (Self::State, Self::Output);
}
