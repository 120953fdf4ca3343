//! Mask-weighted mean pooling and L2 normalization
//!
//! Pure math shared by every backend so output semantics do not depend on
//! which inference path produced the token representations.

use ndarray::ArrayView2;

/// Denominator floor for mean pooling over an all-padding mask
const POOL_EPSILON: f32 = 1e-9;

/// Norm floor so all-zero pooled vectors never divide by zero
const NORM_EPSILON: f32 = 1e-12;

/// Mean-pool token representations weighted by the attention mask
///
/// `hidden` is `[seq_len, hidden_size]` for one sequence; only positions
/// where the mask is 1 contribute. The denominator is floored rather than
/// erroring so a degenerate all-padding row yields a zero vector instead
/// of poisoning the whole batch.
pub fn mean_pool(hidden: ArrayView2<'_, f32>, attention_mask: &[u32]) -> Vec<f32> {
    let seq_len = hidden.shape()[0].min(attention_mask.len());
    let hidden_size = hidden.shape()[1];

    let mut pooled = vec![0.0f32; hidden_size];
    let mut valid_tokens = 0usize;

    for seq_idx in 0..seq_len {
        if attention_mask[seq_idx] == 1 {
            for hidden_idx in 0..hidden_size {
                pooled[hidden_idx] += hidden[[seq_idx, hidden_idx]];
            }
            valid_tokens += 1;
        }
    }

    let denom = (valid_tokens as f32).max(POOL_EPSILON);
    for val in &mut pooled {
        *val /= denom;
    }

    pooled
}

/// Scale a vector to unit Euclidean length in place
///
/// The norm is floored at `NORM_EPSILON`, so a zero vector stays zero.
pub fn l2_normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm = norm.max(NORM_EPSILON);
    for val in embedding.iter_mut() {
        *val /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mean_pool_ignores_padding() {
        let hidden = array![[2.0, 4.0], [6.0, 8.0], [100.0, 100.0]];
        let mask = [1u32, 1, 0];

        let pooled = mean_pool(hidden.view(), &mask);
        assert_eq!(pooled, vec![4.0, 6.0]);
    }

    #[test]
    fn test_mean_pool_all_padding_is_finite() {
        let hidden = array![[1.0, 2.0], [3.0, 4.0]];
        let mask = [0u32, 0];

        let pooled = mean_pool(hidden.view(), &mask);
        assert!(pooled.iter().all(|v| v.is_finite()));
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| x.is_finite()));
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
