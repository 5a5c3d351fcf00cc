//! Host-side random initialization helpers.

use rand::Rng;
use rand_distr::StandardNormal;

/// Draw `count` standard normal values from `rng`.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<f32> {
    rng.sample_iter(StandardNormal).take(count).collect()
}

/// Random `n x n` orthonormal matrix, row-major.
///
/// Modified Gram-Schmidt over the rows of a Gaussian matrix.
pub fn orthonormal<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<f32> {
    let mut rows: Vec<Vec<f32>> = (0..n).map(|_| standard_normal(rng, n)).collect();
    for i in 0..n {
        for j in 0..i {
            let (done, rest) = rows.split_at_mut(i);
            let dot: f32 = rest[0].iter().zip(done[j].iter()).map(|(a, b)| a * b).sum();
            for (value, basis) in rest[0].iter_mut().zip(done[j].iter()) {
                *value -= dot * basis;
            }
        }
        let norm = rows[i].iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
        for value in &mut rows[i] {
            *value /= norm;
        }
    }
    rows.into_iter().flatten().collect()
}

/// `[n, gates * n]` matrix made of `gates` orthonormal `n x n` blocks side by side.
pub fn orthonormal_gates<R: Rng + ?Sized>(rng: &mut R, n: usize, gates: usize) -> Vec<f32> {
    let blocks: Vec<Vec<f32>> = (0..gates).map(|_| orthonormal(rng, n)).collect();
    let mut values = Vec::with_capacity(n * n * gates);
    for row in 0..n {
        for block in &blocks {
            values.extend_from_slice(&block[row * n..(row + 1) * n]);
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn orthonormal_rows_have_unit_dot_products() {
        let mut rng = StdRng::seed_from_u64(9);
        let n = 6;
        let m = orthonormal(&mut rng, n);
        for i in 0..n {
            for j in 0..n {
                let dot: f32 = (0..n).map(|k| m[i * n + k] * m[j * n + k]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "({i},{j}) = {dot}");
            }
        }
    }

    #[test]
    fn normal_draws_are_roughly_standard() {
        let mut rng = StdRng::seed_from_u64(1);
        let values = standard_normal(&mut rng, 20_001);
        assert_eq!(values.len(), 20_001);
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.1);
    }

    #[test]
    fn gate_blocks_are_laid_out_side_by_side() {
        let mut rng = StdRng::seed_from_u64(3);
        let values = orthonormal_gates(&mut rng, 4, 3);
        assert_eq!(values.len(), 4 * 12);
    }
}
