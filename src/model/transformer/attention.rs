//! Multi-head scaled dot-product attention.
//!
//! One type serves both roles in a decoder block:
//! - self-attention: keys/values from the decoder state itself
//! - cross-attention: keys/values from the conditioning encoder output

use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{Dropout, VarBuilder};

use crate::Result;

/// Scaled dot-product attention with bias-free q/k/v projections.
///
/// Weight layout follows the diffusers `Attention` module:
/// `to_q`, `to_k`, `to_v`, `to_out.0`.
#[derive(Debug, Clone)]
pub struct Attention {
    to_q: candle_nn::Linear,
    to_k: candle_nn::Linear,
    to_v: candle_nn::Linear,
    to_out: candle_nn::Linear,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl Attention {
    /// `cross_dim` is the key/value input width; `None` means self-attention.
    pub fn load(
        vb: VarBuilder,
        query_dim: usize,
        cross_dim: Option<usize>,
        num_heads: usize,
        head_dim: usize,
        dropout: f64,
    ) -> Result<Self> {
        let inner_dim = num_heads * head_dim;
        let kv_dim = cross_dim.unwrap_or(query_dim);
        let to_q = candle_nn::linear_no_bias(query_dim, inner_dim, vb.pp("to_q"))?;
        let to_k = candle_nn::linear_no_bias(kv_dim, inner_dim, vb.pp("to_k"))?;
        let to_v = candle_nn::linear_no_bias(kv_dim, inner_dim, vb.pp("to_v"))?;
        let to_out = candle_nn::linear(inner_dim, query_dim, vb.pp("to_out.0"))?;
        Ok(Self {
            to_q,
            to_k,
            to_v,
            to_out,
            dropout: Dropout::new(dropout as f32),
            num_heads,
            head_dim,
        })
    }

    /// Forward pass.
    ///
    /// - `hidden_states`: `[B, S_q, query_dim]`
    /// - `context`: `[B, S_kv, cross_dim]`, or `None` to attend over `hidden_states`
    ///
    /// Returns `[B, S_q, query_dim]`.
    pub fn forward(&self, hidden_states: &Tensor, context: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let context = context.unwrap_or(hidden_states);
        let (batch, seq_q, _) = hidden_states.dims3()?;
        let (_, seq_kv, _) = context.dims3()?;

        let q = self.to_q.forward(hidden_states)?;
        let k = self.to_k.forward(context)?;
        let v = self.to_v.forward(context)?;

        // Reshape to [B, H, S, D]
        let q = q
            .reshape((batch, seq_q, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((batch, seq_kv, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((batch, seq_kv, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let scale = (self.head_dim as f64).sqrt();

        // Attention scores: Q · K^T / sqrt(d)
        let attn_weights = (q.matmul(&k.t()?)? / scale)?;
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;
        let out = attn_weights.matmul(&v)?; // [B, H, S_q, D]

        // Reshape: [B, S_q, H*D]
        let out = out
            .transpose(1, 2)?
            .reshape((batch, seq_q, self.num_heads * self.head_dim))?;

        let out = self.to_out.forward(&out)?;
        self.dropout.forward_t(&out, train).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn make_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    #[test]
    fn self_attention_output_shape() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);

        let attn = Attention::load(vb, 32, None, 4, 8, 0.0).unwrap();
        let x = Tensor::randn(0.0_f32, 1.0, (2, 7, 32), &device).unwrap();

        let out = attn.forward(&x, None, false).unwrap();
        assert_eq!(out.dims(), &[2, 7, 32]);
    }

    #[test]
    fn cross_attention_output_shape() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);

        let attn = Attention::load(vb, 32, Some(48), 4, 8, 0.0).unwrap();
        let q_input = Tensor::randn(0.0_f32, 1.0, (2, 5, 32), &device).unwrap();
        let kv_input = Tensor::randn(0.0_f32, 1.0, (2, 11, 48), &device).unwrap();

        let out = attn.forward(&q_input, Some(&kv_input), false).unwrap();
        assert_eq!(out.dims(), &[2, 5, 32]);
    }

    #[test]
    fn cross_attention_depends_on_context() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);

        let attn = Attention::load(vb, 16, Some(16), 2, 8, 0.0).unwrap();
        let q_input = Tensor::randn(0.0_f32, 1.0, (1, 3, 16), &device).unwrap();
        let ctx_a = Tensor::randn(0.0_f32, 1.0, (1, 4, 16), &device).unwrap();
        let ctx_b = Tensor::randn(0.0_f32, 1.0, (1, 4, 16), &device).unwrap();

        let out_a = attn.forward(&q_input, Some(&ctx_a), false).unwrap();
        let out_b = attn.forward(&q_input, Some(&ctx_b), false).unwrap();
        let diff: f32 = (out_a - out_b)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff > 0.0);
    }
}
