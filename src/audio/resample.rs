use crate::error::{Result, TtsError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

#[derive(Debug, Default)]
pub struct AudioResampler;

impl AudioResampler {
    /// Convert channel layout, then sample rate.
    pub fn convert_audio(
        mut samples: Vec<Vec<f32>>,
        from_rate: u32,
        to_rate: u32,
        to_channels: usize,
    ) -> Result<Vec<Vec<f32>>> {
        samples = convert_channels(samples, to_channels)?;
        if from_rate == to_rate || samples.is_empty() || samples[0].is_empty() {
            return Ok(samples);
        }

        let channels = samples.len();
        let input_len = samples[0].len();
        let ratio = to_rate as f64 / from_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_len, channels)
            .map_err(|err| TtsError::Audio(err.to_string()))?;
        resampler
            .process(&samples, None)
            .map_err(|err| TtsError::Audio(err.to_string()))
    }

    /// Downmix to mono at `to_rate`.
    pub fn to_mono(samples: Vec<Vec<f32>>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
        let mut output = Self::convert_audio(samples, from_rate, to_rate, 1)?;
        Ok(output.pop().unwrap_or_default())
    }
}

fn convert_channels(samples: Vec<Vec<f32>>, to_channels: usize) -> Result<Vec<Vec<f32>>> {
    if samples.is_empty() {
        return Ok(samples);
    }
    let from_channels = samples.len();
    if from_channels == to_channels {
        return Ok(samples);
    }
    if to_channels == 1 {
        let len = samples[0].len();
        let mut mixed = vec![0.0_f32; len];
        for channel in &samples {
            if channel.len() != len {
                return Err(TtsError::Audio(
                    "channel length mismatch in audio conversion".into(),
                ));
            }
            for (idx, value) in channel.iter().enumerate() {
                mixed[idx] += *value;
            }
        }
        let scale = 1.0 / from_channels as f32;
        for value in &mut mixed {
            *value *= scale;
        }
        return Ok(vec![mixed]);
    }
    Err(TtsError::Audio(format!(
        "unsupported channel conversion from {from_channels} to {to_channels}"
    )))
}

#[cfg(test)]
mod tests {
    use super::AudioResampler;

    #[test]
    fn downmixes_and_resamples() {
        let samples = vec![vec![0.0_f32; 480], vec![0.2_f32; 480]];
        let output = AudioResampler::to_mono(samples, 48000, 24000).expect("convert audio");
        assert!(!output.is_empty());
        assert!(output.len() < 480);
    }

    #[test]
    fn same_rate_only_downmixes() {
        let samples = vec![vec![1.0_f32, 0.0], vec![0.0, 1.0]];
        let output = AudioResampler::to_mono(samples, 16000, 16000).expect("convert audio");
        assert_eq!(output, vec![0.5, 0.5]);
    }
}
