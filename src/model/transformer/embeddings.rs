//! Word embedding table, tied logits head and positional front-end.

use candle_core::{Device, Module, ModuleT, Tensor, D};
use candle_nn::{init::Init, Dropout, LayerNorm, VarBuilder};

use super::config::LogitsMode;
use crate::{Error, Result};

/// Token embedding table whose weight doubles as the logits head.
///
/// A single tensor backs both the lookup and the projection, so an in-place
/// update of `word_embedding.weight` is seen by both.
#[derive(Debug, Clone)]
pub struct TiedEmbedding {
    weight: Tensor,
    embedding: candle_nn::Embedding,
    lm_head: candle_nn::Linear,
    vocab_size: usize,
    dims: usize,
}

impl TiedEmbedding {
    pub fn new(vocab_size: usize, dims: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (vocab_size, dims),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        Self::from_tensor(weight)
    }

    /// Wrap an existing `[vocab_size, dims]` weight.
    pub fn from_tensor(weight: Tensor) -> Result<Self> {
        let (vocab_size, dims) = weight.dims2().map_err(|_| {
            Error::Shape(format!(
                "embedding weight must be [vocab_size, dims], got {:?}",
                weight.dims()
            ))
        })?;
        Ok(Self {
            embedding: candle_nn::Embedding::new(weight.clone(), dims),
            lm_head: candle_nn::Linear::new(weight.clone(), None),
            weight,
            vocab_size,
            dims,
        })
    }

    /// The shared `[vocab_size, dims]` parameter.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Token ids `[..]` → embeddings `[.., dims]`.
    pub fn embed(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.embedding.forward(token_ids).map_err(Into::into)
    }

    /// Hidden vectors `[.., dims]` → vocabulary scores `[.., vocab_size]`.
    pub fn logits(&self, hidden: &Tensor, mode: LogitsMode) -> Result<Tensor> {
        let dims = self.dims;
        let width = hidden.dim(D::Minus1)?;
        if width != dims {
            return Err(Error::Shape(format!(
                "logits head expects feature width {dims}, got {width}"
            )));
        }
        match mode {
            LogitsMode::Linear => self.lm_head.forward(hidden).map_err(Into::into),
            LogitsMode::Distance => self.distance_logits(hidden),
        }
    }

    /// `-sqrt(max(|w|² + |h|² - 2 w·h, 0))` for every embedding row `w`.
    fn distance_logits(&self, hidden: &Tensor) -> Result<Tensor> {
        let hidden = hidden.to_dtype(self.weight.dtype())?;
        let dims = hidden.dim(D::Minus1)?;
        let flat = hidden.reshape(((), dims))?; // [N, d]

        let emb_norm = self.weight.sqr()?.sum_keepdim(1)?; // [V, 1]
        let arr_norm = flat.sqr()?.sum_keepdim(1)?; // [N, 1]
        let cross = self.weight.matmul(&flat.t()?)?; // [V, N]
        let dist = (emb_norm.broadcast_add(&arr_norm.t()?)? - (cross * 2.0)?)?;

        // Rounding can push the squared distance of near-identical vectors below zero.
        let scores = dist.maximum(0.0)?.sqrt()?.t()?.neg()?; // [N, V]

        let mut shape = hidden.dims()[..hidden.rank() - 1].to_vec();
        shape.push(self.vocab_size());
        scores.reshape(shape).map_err(Into::into)
    }
}

/// Learned position embeddings + timestep broadcast, then LayerNorm and dropout.
#[derive(Debug, Clone)]
pub struct PositionalFrontEnd {
    position_embeddings: candle_nn::Embedding,
    position_ids: Tensor,
    layer_norm: LayerNorm,
    dropout: Dropout,
    max_position_embeddings: usize,
}

impl PositionalFrontEnd {
    /// Loads `position_embeddings` and `LayerNorm` from the root of `vb`.
    pub fn new(
        max_position_embeddings: usize,
        hidden_size: usize,
        layer_norm_eps: f64,
        dropout: f64,
        vb: VarBuilder,
        device: &Device,
    ) -> Result<Self> {
        let position_embeddings = candle_nn::embedding(
            max_position_embeddings,
            hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let position_ids = Tensor::arange(0u32, max_position_embeddings as u32, device)?;
        let layer_norm = candle_nn::layer_norm(hidden_size, layer_norm_eps, vb.pp("LayerNorm"))?;
        Ok(Self {
            position_embeddings,
            position_ids,
            layer_norm,
            dropout: Dropout::new(dropout as f32),
            max_position_embeddings,
        })
    }

    pub fn max_position_embeddings(&self) -> usize {
        self.max_position_embeddings
    }

    /// - `emb_x`: [B, S, H] projected input
    /// - `emb_t`: [B, H] timestep embedding
    ///
    /// Returns the initial decoder state [B, S, H].
    pub fn forward(&self, emb_x: &Tensor, emb_t: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, hidden) = emb_x.dims3()?;
        if seq_len > self.max_position_embeddings {
            return Err(Error::Shape(format!(
                "sequence length {seq_len} exceeds max_position_embeddings {}",
                self.max_position_embeddings
            )));
        }
        let position_ids = self.position_ids.narrow(0, 0, seq_len)?;
        let pos = self.position_embeddings.forward(&position_ids)?.unsqueeze(0)?; // [1, S, H]
        let emb_t = emb_t.unsqueeze(1)?.expand((batch, seq_len, hidden))?;

        let emb_inputs = pos.broadcast_add(emb_x)?.add(&emb_t)?;
        let h = self.layer_norm.forward(&emb_inputs)?;
        self.dropout.forward_t(&h, train).map_err(Into::into)
    }
}
