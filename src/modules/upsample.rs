//! Frame-to-sample conditioning upsampler.
//!
//! Sample `j` of frame `k` (0-based, `hop` samples per frame) is
//! `(1 - a) * frame[k - 1] + a * frame[k]` with `a = (j + 1) / hop`; frame `-1` is frame 0.
//! The interpolation lags by one frame, so no sample ever sees a later frame.

use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Upsample `[batch, frames, channels]` to `[batch, frames * hop, channels]`.
pub fn lagging_interpolate<B: Backend>(frames: Tensor<B, 3>, hop: usize) -> Tensor<B, 3> {
    let [batch, num_frames, channels] = frames.dims();
    if num_frames == 0 || hop == 0 {
        return Tensor::zeros([batch, 0, channels], &frames.device());
    }
    let device = frames.device();
    let first = frames.clone().narrow(1, 0, 1);
    let previous = if num_frames > 1 {
        Tensor::cat(vec![first, frames.clone().narrow(1, 0, num_frames - 1)], 1)
    } else {
        first
    };

    let alphas: Vec<f32> = (1..=hop).map(|j| j as f32 / hop as f32).collect();
    let alpha = Tensor::<B, 4>::from_data(TensorData::new(alphas, [1, 1, hop, 1]), &device);
    let current = frames.unsqueeze_dim::<4>(2).repeat_dim(2, hop);
    let previous = previous.unsqueeze_dim::<4>(2).repeat_dim(2, hop);
    let mixed = previous
        .clone()
        .add(current.sub(previous).mul(alpha));
    mixed.reshape([batch, num_frames * hop, channels])
}

#[cfg(test)]
mod tests {
    use super::lagging_interpolate;
    use burn::tensor::{Tensor, TensorData};
    use burn_ndarray::{NdArray, NdArrayDevice};

    type B = NdArray<f32>;

    #[test]
    fn interpolates_towards_current_frame() {
        let device = NdArrayDevice::default();
        let frames = Tensor::<B, 3>::from_data(TensorData::new(vec![0.0, 4.0], [1, 2, 1]), &device);
        let samples: Vec<f32> = lagging_interpolate(frames, 4)
            .into_data()
            .iter::<f32>()
            .collect();
        assert_eq!(samples, vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn later_frames_do_not_leak_backwards() {
        let device = NdArrayDevice::default();
        let a = Tensor::<B, 3>::from_data(TensorData::new(vec![1.0, 2.0, 3.0], [1, 3, 1]), &device);
        let b = Tensor::<B, 3>::from_data(TensorData::new(vec![1.0, 2.0, 9.0], [1, 3, 1]), &device);
        let a: Vec<f32> = lagging_interpolate(a, 3).into_data().iter::<f32>().collect();
        let b: Vec<f32> = lagging_interpolate(b, 3).into_data().iter::<f32>().collect();
        assert_eq!(a[..6], b[..6]);
        assert_ne!(a[6..], b[6..]);
    }
}
