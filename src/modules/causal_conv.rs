//! Causal dilated 1D convolution.
//!
//! Inputs are left-padded with zeros so output `t` only sees inputs `<= t`, or
//! strictly `< t` when the layer is built with `shifted`.

use burn::module::{Module, Param};
use burn::tensor::{
    backend::Backend,
    module::conv1d,
    ops::{ConvOptions, PadMode},
    Distribution, Tensor,
};

/// Configuration for [`CausalConv1d`].
#[derive(Debug, Clone)]
pub struct CausalConv1dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub dilation: usize,
    /// Exclude the current timestep from the receptive field.
    pub shifted: bool,
}

impl CausalConv1dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            dilation: 1,
            shifted: false,
        }
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation.max(1);
        self
    }

    pub fn with_shifted(mut self, shifted: bool) -> Self {
        self.shifted = shifted;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CausalConv1d<B> {
        let bound = 1.0 / ((self.in_channels * self.kernel_size) as f64).sqrt();
        let weight = Tensor::<B, 3>::random(
            [self.out_channels, self.in_channels, self.kernel_size],
            Distribution::Uniform(-bound, bound),
            device,
        );
        let bias = Tensor::<B, 1>::zeros([self.out_channels], device);
        CausalConv1d {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
            kernel_size: self.kernel_size,
            dilation: self.dilation,
            shifted: self.shifted,
        }
    }
}

/// Causal convolution over `[batch, channels, time]`.
#[derive(Module, Debug)]
pub struct CausalConv1d<B: Backend> {
    /// Weight `[out, in, kernel]`.
    pub weight: Param<Tensor<B, 3>>,
    pub bias: Param<Tensor<B, 1>>,
    pub kernel_size: usize,
    pub dilation: usize,
    pub shifted: bool,
}

impl<B: Backend> CausalConv1d<B> {
    /// Number of past inputs each output can see.
    pub fn receptive_field(&self) -> usize {
        (self.kernel_size - 1) * self.dilation + usize::from(self.shifted)
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let time = input.dims()[2];
        let left = (self.kernel_size - 1) * self.dilation + usize::from(self.shifted);
        let padded = input.pad((left, 0, 0, 0), PadMode::Constant(0.0));
        let output = conv1d(
            padded,
            self.weight.val(),
            Some(self.bias.val()),
            ConvOptions::new([1], [0], [self.dilation], 1),
        );
        // shifted layers produce one extra trailing output
        output.narrow(2, 0, time)
    }
}
