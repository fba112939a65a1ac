//! Denoiser configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for the diffusion transformer.
///
/// Defaults match the deployed model: 128-d word embeddings, a 6-layer
/// `bert-base-uncased` conditioning encoder and 6 cross-attention blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerNetConfig {
    /// Width of the diffused word embeddings.
    #[serde(default = "default_input_dims")]
    pub input_dims: usize,

    /// Width of the denoiser output.
    #[serde(default = "default_output_dims")]
    pub output_dims: usize,

    /// Width of the raw sinusoidal timestep embedding.
    #[serde(default = "default_hidden_t_dim")]
    pub hidden_t_dim: usize,

    /// Dropout for the front-end and every decoder block.
    #[serde(default)]
    pub dropout: f64,

    /// Size of the word embedding table / logits vocabulary.
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// 1 = tied linear head, 2 = negative euclidean distance.
    #[serde(default = "default_logits_mode")]
    pub logits_mode: usize,

    /// Whether forward calls carry a self-conditioning estimate.
    #[serde(default)]
    pub self_conditioning: SelfConditioning,

    /// Number of cross-attention decoder blocks.
    #[serde(default = "default_num_layers")]
    pub num_decoder_layers: usize,

    /// Number of layers kept from the conditioning encoder.
    #[serde(default = "default_num_layers")]
    pub num_encoder_layers: usize,

    /// Backbone preset (or hub repository for `from_hub`) read by
    /// `DiffusionTransformer::from_config_name` and `from_hub`.
    /// `DiffusionTransformer::new` takes an explicit backbone instead.
    #[serde(default = "default_config_name")]
    pub config_name: String,

    /// Where the conditioning encoder's parameters come from.
    #[serde(default)]
    pub backbone_init: BackboneInit,
}

impl Default for TransformerNetConfig {
    fn default() -> Self {
        Self {
            input_dims: default_input_dims(),
            output_dims: default_output_dims(),
            hidden_t_dim: default_hidden_t_dim(),
            dropout: 0.0,
            vocab_size: default_vocab_size(),
            logits_mode: default_logits_mode(),
            self_conditioning: SelfConditioning::default(),
            num_decoder_layers: default_num_layers(),
            num_encoder_layers: default_num_layers(),
            config_name: default_config_name(),
            backbone_init: BackboneInit::default(),
        }
    }
}

fn default_input_dims() -> usize {
    128
}
fn default_output_dims() -> usize {
    128
}
fn default_hidden_t_dim() -> usize {
    128
}
fn default_vocab_size() -> usize {
    30522
}
fn default_logits_mode() -> usize {
    1
}
fn default_num_layers() -> usize {
    6
}
fn default_config_name() -> String {
    "bert-base-uncased".to_string()
}

impl TransformerNetConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("input_dims", self.input_dims),
            ("output_dims", self.output_dims),
            ("hidden_t_dim", self.hidden_t_dim),
            ("vocab_size", self.vocab_size),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        LogitsMode::try_from(self.logits_mode)?;
        Ok(())
    }

    /// Feature width the input projector consumes.
    pub fn projector_in_dims(&self) -> usize {
        match self.self_conditioning {
            SelfConditioning::Disabled => self.input_dims,
            SelfConditioning::Required | SelfConditioning::ZeroFill => self.input_dims * 2,
        }
    }
}

/// How hidden vectors are scored against the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogitsMode {
    /// Linear projection through the tied embedding weight.
    Linear,
    /// Negative euclidean distance to every embedding row.
    Distance,
}

impl TryFrom<usize> for LogitsMode {
    type Error = Error;

    fn try_from(mode: usize) -> Result<Self> {
        match mode {
            1 => Ok(Self::Linear),
            2 => Ok(Self::Distance),
            other => Err(Error::NotImplemented(format!("logits_mode {other}"))),
        }
    }
}

/// Self-conditioning contract, fixed at construction.
///
/// Decides the input projector's width: `input_dims` when disabled,
/// `2 * input_dims` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfConditioning {
    /// Calls must not pass a self-conditioning tensor.
    Disabled,
    /// Every call must pass a self-conditioning tensor.
    #[default]
    Required,
    /// Missing self-conditioning is replaced by zeros.
    ZeroFill,
}

/// Initialization strategy for the conditioning encoder.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackboneInit {
    /// Encoder parameters come from the model's own VarBuilder (`input_transformers.*`).
    #[default]
    FromScratch,
    /// Encoder parameters are memory-mapped from a BERT safetensors checkpoint.
    ///
    /// They live outside the caller's `VarMap`, so a `VarMap` optimizer leaves
    /// the encoder frozen. To fine-tune it, build with `FromScratch` and copy
    /// the checkpoint in with `weights::load_backbone_into`.
    Pretrained { checkpoint: PathBuf },
}
