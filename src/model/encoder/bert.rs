//! BERT conditioning encoder.
//!
//! Wraps `candle_transformers::models::bert::BertModel` and adds the pooler
//! head (`pooler.dense` + tanh over the first token) that candle's model does
//! not expose. Weight paths: `embeddings.*`, `encoder.layer.*`,
//! `pooler.dense`, each optionally under a `bert.` prefix as in HuggingFace
//! `BertForMaskedLM` checkpoints.

use candle_core::{IndexOp, Module, Tensor};
use candle_nn::{self as nn, VarBuilder};
use candle_transformers::models::bert;

use super::{ConditionEncoder, EncoderOutput};
use crate::Result;

/// BERT encoder producing contextual states and a pooled summary.
pub struct BertConditionEncoder {
    model: bert::BertModel,
    pooler: nn::Linear,
    hidden_size: usize,
}

impl BertConditionEncoder {
    /// Load from a VarBuilder pointing at BERT weights.
    ///
    /// Only the first `cfg.num_hidden_layers` encoder layers are read, so a
    /// 12-layer checkpoint loads into a truncated encoder.
    pub fn new(cfg: &bert::Config, vb: VarBuilder) -> Result<Self> {
        let model = bert::BertModel::load(vb.clone(), cfg)?;
        let pooler_vb = if !vb.contains_tensor("pooler.dense.weight")
            && vb.contains_tensor("bert.pooler.dense.weight")
        {
            vb.pp("bert.pooler.dense")
        } else {
            vb.pp("pooler.dense")
        };
        let pooler = nn::linear(cfg.hidden_size, cfg.hidden_size, pooler_vb)?;
        Ok(Self {
            model,
            pooler,
            hidden_size: cfg.hidden_size,
        })
    }
}

impl ConditionEncoder for BertConditionEncoder {
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<EncoderOutput> {
        let token_type_ids = input_ids.zeros_like()?;
        let last_hidden_state = self
            .model
            .forward(input_ids, &token_type_ids, Some(attention_mask))?;

        // Pool the first ([CLS]) position.
        let first = last_hidden_state.i((.., 0))?.contiguous()?;
        let pooler_output = self.pooler.forward(&first)?.tanh()?;

        Ok(EncoderOutput {
            last_hidden_state,
            pooler_output,
        })
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}
