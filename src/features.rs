//! Acoustic feature matrices and their `.mgc` persistence.
//!
//! A `.mgc` file is a SafeTensors container holding one `f32` tensor named `mgc`
//! with shape `[frames, order]`.

use crate::error::{Result, TtsError};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const MGC_TENSOR: &str = "mgc";

/// Time-ordered acoustic frames, row-major `[frames, order]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    frames: usize,
    order: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Wrap a flat row-major buffer.
    pub fn new(data: Vec<f32>, frames: usize, order: usize) -> Result<Self> {
        if data.len() != frames * order {
            return Err(TtsError::DataIntegrity(format!(
                "feature buffer of {} values does not match [{frames}, {order}]",
                data.len()
            )));
        }
        Ok(Self {
            frames,
            order,
            data,
        })
    }

    /// Build from per-frame rows.
    pub fn from_rows(rows: &[Vec<f32>], order: usize) -> Result<Self> {
        if rows.iter().any(|row| row.len() != order) {
            return Err(TtsError::DataIntegrity(format!(
                "feature rows must all have order {order}"
            )));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::new(data, rows.len(), order)
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Values per frame.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Flat row-major values.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// One frame.
    pub fn row(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.order..(frame + 1) * self.order]
    }

    /// Per-frame rows, as consumed by the renderer.
    pub fn rows(&self) -> Vec<Vec<f32>> {
        self.data.chunks(self.order.max(1)).map(<[f32]>::to_vec).collect()
    }

    /// Contiguous frame range `[start, start + len)`.
    pub fn slice_frames(&self, start: usize, len: usize) -> Self {
        let end = (start + len).min(self.frames);
        let start = start.min(end);
        Self {
            frames: end - start,
            order: self.order,
            data: self.data[start * self.order..end * self.order].to_vec(),
        }
    }

    /// Tensor of shape `[1, frames, order]`.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [1, self.frames, self.order]),
            device,
        )
    }

    /// Read back the first batch item of a `[batch, frames, order]` tensor.
    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 3>) -> Result<Self> {
        let [_, frames, order] = tensor.dims();
        let first = tensor.narrow(0, 0, 1);
        let data: Vec<f32> = first.into_data().iter::<f32>().collect();
        Self::new(data, frames, order)
    }

    /// Save as a `.mgc` SafeTensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut bytes = Vec::with_capacity(self.data.len() * 4);
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let view = safetensors::tensor::TensorView::new(
            Dtype::F32,
            vec![self.frames, self.order],
            &bytes,
        )?;
        let mut tensors = HashMap::new();
        tensors.insert(MGC_TENSOR.to_string(), view);
        let serialized = safetensors::serialize(&tensors, &None)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Load a `.mgc` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TtsError::MissingPath(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let tensors = SafeTensors::deserialize(&bytes)?;
        let tensor = tensors.tensor(MGC_TENSOR)?;
        if tensor.dtype() != Dtype::F32 || tensor.shape().len() != 2 {
            return Err(TtsError::DataIntegrity(format!(
                "{} does not hold a 2D f32 feature matrix",
                path.display()
            )));
        }
        let data = tensor
            .data()
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::new(data, tensor.shape()[0], tensor.shape()[1])
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureMatrix;
    use crate::error::TtsError;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use tempfile::tempdir;

    #[test]
    fn mgc_file_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.mgc");
        let features = FeatureMatrix::new(vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.1], 3, 2)
            .expect("features");
        features.save(&path).expect("save");
        assert_eq!(FeatureMatrix::load(&path).expect("load"), features);
    }

    #[test]
    fn tensor_round_trip_keeps_layout() {
        let device = NdArrayDevice::default();
        let features = FeatureMatrix::new((0..8).map(|v| v as f32).collect(), 2, 4)
            .expect("features");
        let tensor = features.to_tensor::<NdArray<f32>>(&device);
        assert_eq!(tensor.dims(), [1, 2, 4]);
        let back = FeatureMatrix::from_tensor(tensor).expect("from tensor");
        assert_eq!(back.row(1), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let err = FeatureMatrix::new(vec![0.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, TtsError::DataIntegrity(_)));
    }

    #[test]
    fn slicing_clamps_to_length() {
        let features = FeatureMatrix::new(vec![1.0; 12], 4, 3).expect("features");
        assert_eq!(features.slice_frames(3, 5).frames(), 1);
        assert_eq!(features.slice_frames(9, 2).frames(), 0);
    }
}
