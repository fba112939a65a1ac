//! Tanh MLP projector between embedding space and hidden space.
//!
//! Used twice: `input_up_proj` (embedding → hidden) and `output_down_proj`
//! (hidden → output). The first linear layer's input width is fixed at
//! construction; a mismatched input is reported as a shape error.

use candle_core::{Module, Tensor, D};
use candle_nn::VarBuilder;

use crate::{Error, Result};

/// Linear → tanh → Linear.
#[derive(Debug, Clone)]
pub struct TanhProjection {
    linear_1: candle_nn::Linear,
    linear_2: candle_nn::Linear,
    in_dims: usize,
    out_dims: usize,
}

impl TanhProjection {
    /// `hidden_dims` is the width between the two linears.
    pub fn new(in_dims: usize, hidden_dims: usize, out_dims: usize, vb: VarBuilder) -> Result<Self> {
        let linear_1 = candle_nn::linear(in_dims, hidden_dims, vb.pp("0"))?;
        let linear_2 = candle_nn::linear(hidden_dims, out_dims, vb.pp("2"))?;
        Ok(Self {
            linear_1,
            linear_2,
            in_dims,
            out_dims,
        })
    }

    pub fn in_dims(&self) -> usize {
        self.in_dims
    }

    pub fn out_dims(&self) -> usize {
        self.out_dims
    }

    /// `[.., in_dims]` → `[.., out_dims]`.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let width = xs.dim(D::Minus1)?;
        if width != self.in_dims {
            return Err(Error::Shape(format!(
                "projector expects feature width {}, got {width}",
                self.in_dims
            )));
        }
        let h = self.linear_1.forward(xs)?.tanh()?;
        self.linear_2.forward(&h).map_err(Into::into)
    }
}
