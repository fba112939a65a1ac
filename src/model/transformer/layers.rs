//! Cross-attention decoder block.
//!
//! - [`GeGlu`] / [`FeedForward`]: gated-GELU MLP (`ff.net.0.proj`, `ff.net.2`)
//! - [`BasicTransformerBlock`]: pre-norm self-attention + cross-attention + MLP

use candle_core::{Module, ModuleT, Tensor, D};
use candle_nn::{Dropout, LayerNorm, VarBuilder};

use super::attention::Attention;
use crate::Result;

/// diffusers' `nn.LayerNorm` default.
const BLOCK_NORM_EPS: f64 = 1e-5;

// ---------------------------------------------------------------------------
// Feed-forward
// ---------------------------------------------------------------------------

/// GELU-gated projection: `hidden * gelu(gate)` with `[hidden, gate] = proj(x)`.
#[derive(Debug, Clone)]
pub struct GeGlu {
    proj: candle_nn::Linear,
}

impl GeGlu {
    pub fn new(dim_in: usize, dim_out: usize, vb: VarBuilder) -> Result<Self> {
        let proj = candle_nn::linear(dim_in, dim_out * 2, vb.pp("proj"))?;
        Ok(Self { proj })
    }
}

impl Module for GeGlu {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let projected = self.proj.forward(xs)?;
        let chunks = projected.chunk(2, D::Minus1)?;
        &chunks[0] * chunks[1].gelu_erf()?
    }
}

/// GEGLU → dropout → Linear, with a 4× inner width.
#[derive(Debug, Clone)]
pub struct FeedForward {
    geglu: GeGlu,
    dropout: Dropout,
    proj_out: candle_nn::Linear,
}

impl FeedForward {
    pub fn new(dim: usize, dropout: f64, vb: VarBuilder) -> Result<Self> {
        let inner_dim = dim * 4;
        let geglu = GeGlu::new(dim, inner_dim, vb.pp("net.0"))?;
        let proj_out = candle_nn::linear(inner_dim, dim, vb.pp("net.2"))?;
        Ok(Self {
            geglu,
            dropout: Dropout::new(dropout as f32),
            proj_out,
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.geglu.forward(xs)?;
        let h = self.dropout.forward_t(&h, train)?;
        self.proj_out.forward(&h).map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Decoder block
// ---------------------------------------------------------------------------

/// Transformer block refining the decoder state against a fixed context.
///
/// Three sub-layers, each `x = x + sublayer(norm(x))`:
/// 1. self-attention over the decoder state
/// 2. cross-attention, queries from the decoder state, keys/values from the context
/// 3. GEGLU feed-forward
#[derive(Debug, Clone)]
pub struct BasicTransformerBlock {
    norm1: LayerNorm,
    attn1: Attention,
    norm2: LayerNorm,
    attn2: Attention,
    norm3: LayerNorm,
    ff: FeedForward,
}

impl BasicTransformerBlock {
    pub fn new(
        dim: usize,
        num_attention_heads: usize,
        attention_head_dim: usize,
        cross_attention_dim: usize,
        dropout: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            norm1: candle_nn::layer_norm(dim, BLOCK_NORM_EPS, vb.pp("norm1"))?,
            attn1: Attention::load(
                vb.pp("attn1"),
                dim,
                None,
                num_attention_heads,
                attention_head_dim,
                dropout,
            )?,
            norm2: candle_nn::layer_norm(dim, BLOCK_NORM_EPS, vb.pp("norm2"))?,
            attn2: Attention::load(
                vb.pp("attn2"),
                dim,
                Some(cross_attention_dim),
                num_attention_heads,
                attention_head_dim,
                dropout,
            )?,
            norm3: candle_nn::layer_norm(dim, BLOCK_NORM_EPS, vb.pp("norm3"))?,
            ff: FeedForward::new(dim, dropout, vb.pp("ff"))?,
        })
    }

    /// Forward pass.
    ///
    /// - `hidden_states`: [B, S, D] decoder state
    /// - `encoder_hidden_states`: [B, E, cross_dim] conditioning tensor
    pub fn forward(&self, hidden_states: &Tensor, encoder_hidden_states: &Tensor, train: bool) -> Result<Tensor> {
        // 1. Self-attention
        let norm_h = self.norm1.forward(hidden_states)?;
        let attn_out = self.attn1.forward(&norm_h, None, train)?;
        let h = (attn_out + hidden_states)?;

        // 2. Cross-attention
        let norm_h = self.norm2.forward(&h)?;
        let cross_out = self.attn2.forward(&norm_h, Some(encoder_hidden_states), train)?;
        let h = (cross_out + &h)?;

        // 3. Feed-forward
        let norm_h = self.norm3.forward(&h)?;
        let ff_out = self.ff.forward(&norm_h, train)?;
        (ff_out + &h).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_geglu_gates_with_gelu() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let geglu = GeGlu::new(4, 3, vb).unwrap();
        // Zero weights → both halves are zero → output zero.
        let x = Tensor::randn(0f32, 1.0, (2, 4), &dev).unwrap();
        let y = geglu.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 3]);
        let sum: f32 = y.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(sum, 0.0);
    }

    #[test]
    fn test_feed_forward_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let ff = FeedForward::new(16, 0.0, vb.pp("ff")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 5, 16), &dev).unwrap();
        assert_eq!(ff.forward(&x, false).unwrap().dims(), &[2, 5, 16]);
        // net.0.proj doubles the 4× inner width.
        let data = varmap.data().lock().unwrap();
        assert_eq!(data["ff.net.0.proj.weight"].dims(), &[128, 16]);
        assert_eq!(data["ff.net.2.weight"].dims(), &[16, 64]);
    }

    #[test]
    fn test_block_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let block = BasicTransformerBlock::new(16, 2, 8, 16, 0.0, vb.pp("block")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 8, 16), &dev).unwrap();
        let enc = Tensor::randn(0f32, 1.0, (2, 12, 16), &dev).unwrap();
        let y = block.forward(&x, &enc, false).unwrap();
        assert_eq!(y.dims(), &[2, 8, 16]);
    }

    #[test]
    fn test_zero_block_is_identity() {
        // Zero weights zero every sub-layer output, leaving only the residual path.
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let block = BasicTransformerBlock::new(16, 2, 8, 16, 0.0, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 4, 16), &dev).unwrap();
        let enc = Tensor::randn(0f32, 1.0, (1, 3, 16), &dev).unwrap();
        let y = block.forward(&x, &enc, false).unwrap();
        let diff: f32 = (y - &x).unwrap().abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(diff, 0.0);
    }
}
