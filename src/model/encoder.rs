//! Conditioning encoders.
//!
//! The denoiser treats the encoder as a black box behind [`ConditionEncoder`]:
//! token ids and an attention mask go in, per-position states and a pooled
//! summary come out.
//!
//! - [`bert`]: pretrained BERT backbone (candle-transformers) plus pooler

pub mod bert;

use candle_core::Tensor;

use crate::Result;

pub use bert::BertConditionEncoder;

/// Output of a conditioning encoder.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[B, L, H]` per-position contextual states.
    pub last_hidden_state: Tensor,
    /// `[B, H]` pooled summary.
    pub pooler_output: Tensor,
}

impl EncoderOutput {
    /// `last_hidden_state + 0 * pooler_output[:, None, :]`.
    ///
    /// The pooled term adds nothing to the value but keeps the pooler in the
    /// autograd graph, so its parameters still receive (zero) gradients.
    pub fn combined(&self) -> Result<Tensor> {
        let pooled = (self.pooler_output.unsqueeze(1)? * 0.0)?;
        self.last_hidden_state
            .broadcast_add(&pooled)
            .map_err(Into::into)
    }
}

/// Encodes the conditioning sequence the denoiser cross-attends to.
pub trait ConditionEncoder: Send + Sync {
    /// - `input_ids`: `[B, L]` token ids in the encoder's own vocabulary
    /// - `attention_mask`: `[B, L]`, 1 = attend, 0 = padding
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<EncoderOutput>;

    /// Width of `last_hidden_state`.
    fn hidden_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn combined_ignores_pooled_value() {
        let dev = Device::Cpu;
        let last = Tensor::randn(0f32, 1.0, (2, 3, 4), &dev).unwrap();
        let out = EncoderOutput {
            last_hidden_state: last.clone(),
            pooler_output: Tensor::full(123.0f32, (2, 4), &dev).unwrap(),
        };
        let combined = out.combined().unwrap();
        assert_eq!(combined.dims(), &[2, 3, 4]);
        let a: Vec<f32> = combined.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = last.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
        assert_eq!(combined.dtype(), DType::F32);
    }
}
