//! Sinusoidal timestep embedding for diffusion conditioning.
//!
//! Converts a diffusion step per sequence to a hidden-size vector:
//! sinusoidal encoding (width `hidden_t_dim`) → Linear(4×) → SiLU → Linear(hidden).

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

/// Raw sinusoidal embedding of integer or float timesteps.
///
/// `t`: [B] → [B, dim], laid out as `[cos | sin]`. Odd widths get a trailing
/// zero column. Always computed in f32.
pub fn timestep_embedding(t: &Tensor, dim: usize, max_period: f64, dev: &Device) -> Result<Tensor> {
    let half = dim / 2;

    // freqs = exp(-log(max_period) * arange(0, half) / half)
    let freqs: Vec<f32> = (0..half)
        .map(|i| (-(max_period.ln()) * i as f64 / half as f64).exp() as f32)
        .collect();
    let freqs = Tensor::new(freqs.as_slice(), dev)?;

    // args = t[:, None] * freqs[None, :]
    let t_f32 = t.to_dtype(DType::F32)?;
    let args = t_f32.unsqueeze(1)?.broadcast_mul(&freqs.unsqueeze(0)?)?;

    let emb = Tensor::cat(&[&args.cos()?, &args.sin()?], 1)?;
    if dim % 2 == 1 {
        let pad = Tensor::zeros((emb.dim(0)?, 1), DType::F32, dev)?;
        Tensor::cat(&[&emb, &pad], 1)
    } else {
        Ok(emb)
    }
}

/// Timestep embedding module (`time_embed` in the checkpoint).
#[derive(Debug, Clone)]
pub struct TimestepEmbedding {
    linear_1: nn::Linear,
    linear_2: nn::Linear,
    in_channels: usize,
}

impl TimestepEmbedding {
    /// Create a new timestep embedding.
    ///
    /// - `in_channels`: width of the sinusoidal embedding (`hidden_t_dim`)
    /// - `out_channels`: output width (`hidden_size`)
    pub fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let time_embed_dim = in_channels * 4;
        let linear_1 = nn::linear(in_channels, time_embed_dim, vb.pp("0"))?;
        let linear_2 = nn::linear(time_embed_dim, out_channels, vb.pp("2"))?;
        Ok(Self {
            linear_1,
            linear_2,
            in_channels,
        })
    }

    /// Forward pass: t [B] → [B, out_channels] in `dtype`.
    pub fn forward(&self, t: &Tensor, dtype: DType) -> Result<Tensor> {
        let t_freq = timestep_embedding(t, self.in_channels, 10000.0, t.device())?.to_dtype(dtype)?;
        let h = self.linear_1.forward(&t_freq)?.silu()?;
        self.linear_2.forward(&h)
    }
}
