//! Backbone configuration for the conditioning encoder.
//!
//! Mirrors the fields of a HuggingFace BERT `config.json` that the diffusion
//! transformer reads: `hidden_size`, `num_attention_heads`,
//! `max_position_embeddings` and `layer_norm_eps` size the denoiser itself,
//! the rest only matter to the pretrained encoder.

use std::path::Path;

use candle_transformers::models::bert;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Named backbone presets understood by [`BackboneConfig::from_preset`].
pub const PRESET_NAMES: &[&str] = &[
    "bert-base-uncased",
    "bert-base-cased",
    "bert-large-uncased",
    "bert-large-cased",
    "bert-small",
    "bert-mini",
    "bert-tiny",
];

/// BERT-style encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
    #[serde(default = "default_hidden_dropout_prob")]
    pub hidden_dropout_prob: f64,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: usize,
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}
fn default_hidden_dropout_prob() -> f64 {
    0.1
}
fn default_type_vocab_size() -> usize {
    2
}
fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl Default for BackboneConfig {
    /// `bert-base-uncased`.
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: default_hidden_act(),
            hidden_dropout_prob: default_hidden_dropout_prob(),
            max_position_embeddings: 512,
            type_vocab_size: default_type_vocab_size(),
            layer_norm_eps: default_layer_norm_eps(),
            pad_token_id: 0,
        }
    }
}

impl BackboneConfig {
    /// Resolve a named preset from the built-in registry.
    pub fn from_preset(name: &str) -> Result<Self> {
        let base = Self::default();
        let cfg = match name {
            "bert-base-uncased" => base,
            "bert-base-cased" => Self {
                vocab_size: 28996,
                ..base
            },
            "bert-large-uncased" => Self {
                hidden_size: 1024,
                num_hidden_layers: 24,
                num_attention_heads: 16,
                intermediate_size: 4096,
                ..base
            },
            "bert-large-cased" => Self {
                vocab_size: 28996,
                hidden_size: 1024,
                num_hidden_layers: 24,
                num_attention_heads: 16,
                intermediate_size: 4096,
                ..base
            },
            "bert-small" => Self::compact(4, 512, 8),
            "bert-mini" => Self::compact(4, 256, 4),
            "bert-tiny" => Self::compact(2, 128, 2),
            other => {
                return Err(Error::Config(format!(
                    "unknown backbone preset '{other}' (known: {})",
                    PRESET_NAMES.join(", ")
                )))
            }
        };
        Ok(cfg)
    }

    /// Google's compact uncased BERT family (`bert_uncased_L-{layers}_H-{hidden}_A-{heads}`).
    fn compact(layers: usize, hidden: usize, heads: usize) -> Self {
        Self {
            hidden_size: hidden,
            num_hidden_layers: layers,
            num_attention_heads: heads,
            intermediate_size: hidden * 4,
            ..Self::default()
        }
    }

    /// HuggingFace repository holding the weights for a preset name.
    ///
    /// Names that are not presets are assumed to already be repository ids.
    pub fn hub_repo(name: &str) -> String {
        match name {
            "bert-base-uncased" | "bert-base-cased" | "bert-large-uncased" | "bert-large-cased" => {
                format!("google-bert/{name}")
            }
            "bert-small" => "google/bert_uncased_L-4_H-512_A-8".to_string(),
            "bert-mini" => "google/bert_uncased_L-4_H-256_A-4".to_string(),
            "bert-tiny" => "google/bert_uncased_L-2_H-128_A-2".to_string(),
            other => other.to_string(),
        }
    }

    /// Load from a HuggingFace `config.json`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Return a copy whose `hidden_dropout_prob` is the denoiser's dropout.
    pub fn with_dropout(&self, dropout: f64) -> Self {
        Self {
            hidden_dropout_prob: dropout,
            ..self.clone()
        }
    }

    /// Per-head attention width.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 || self.num_attention_heads == 0 {
            return Err(Error::Config(
                "hidden_size and num_attention_heads must be non-zero".into(),
            ));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Config(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.max_position_embeddings == 0 {
            return Err(Error::Config("max_position_embeddings must be non-zero".into()));
        }
        Ok(())
    }

    /// Candle BERT config with the encoder truncated to `num_layers`.
    pub fn to_bert_config(&self, num_layers: usize) -> Result<bert::Config> {
        let value = serde_json::json!({
            "vocab_size": self.vocab_size,
            "hidden_size": self.hidden_size,
            "num_hidden_layers": num_layers,
            "num_attention_heads": self.num_attention_heads,
            "intermediate_size": self.intermediate_size,
            "hidden_act": self.hidden_act,
            "hidden_dropout_prob": self.hidden_dropout_prob,
            "max_position_embeddings": self.max_position_embeddings,
            "type_vocab_size": self.type_vocab_size,
            "initializer_range": 0.02,
            "layer_norm_eps": self.layer_norm_eps,
            "pad_token_id": self.pad_token_id,
            "model_type": "bert",
        });
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_bert_base() {
        let cfg = BackboneConfig::default();
        assert_eq!(cfg, BackboneConfig::from_preset("bert-base-uncased").unwrap());
        assert_eq!(cfg.hidden_size, 768);
        assert_eq!(cfg.num_attention_heads, 12);
        assert_eq!(cfg.head_dim(), 64);
        assert_eq!(cfg.max_position_embeddings, 512);
    }

    #[test]
    fn test_every_preset_resolves_and_validates() {
        for name in PRESET_NAMES {
            let cfg = BackboneConfig::from_preset(name).unwrap();
            cfg.validate().unwrap();
            assert_eq!(cfg.head_dim() * cfg.num_attention_heads, cfg.hidden_size);
        }
        assert_eq!(BackboneConfig::from_preset("bert-tiny").unwrap().hidden_size, 128);
        assert_eq!(BackboneConfig::from_preset("bert-base-cased").unwrap().vocab_size, 28996);
    }

    #[test]
    fn test_unknown_preset_is_config_error() {
        let err = BackboneConfig::from_preset("gpt-7").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("gpt-7")));
    }

    #[test]
    fn test_hub_repo_mapping() {
        assert_eq!(BackboneConfig::hub_repo("bert-base-uncased"), "google-bert/bert-base-uncased");
        assert_eq!(BackboneConfig::hub_repo("bert-tiny"), "google/bert_uncased_L-2_H-128_A-2");
        assert_eq!(BackboneConfig::hub_repo("org/custom"), "org/custom");
    }

    #[test]
    fn test_with_dropout_overrides_hidden_dropout() {
        let cfg = BackboneConfig::default().with_dropout(0.0);
        assert_eq!(cfg.hidden_dropout_prob, 0.0);
        assert_eq!(cfg.hidden_size, 768);
    }

    #[test]
    fn test_indivisible_heads_rejected() {
        let cfg = BackboneConfig {
            hidden_size: 100,
            num_attention_heads: 3,
            ..BackboneConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_hf_config_json() {
        // Extra keys in a real config.json are ignored.
        let json = r#"{
            "architectures": ["BertForMaskedLM"],
            "vocab_size": 30522,
            "hidden_size": 128,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 512,
            "max_position_embeddings": 512,
            "model_type": "bert"
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        let cfg = BackboneConfig::from_file(&path).unwrap();
        assert_eq!(cfg.hidden_size, 128);
        assert_eq!(cfg.layer_norm_eps, 1e-12);
        assert_eq!(cfg.hidden_act, "gelu");
    }

    #[test]
    fn test_bert_config_layer_override() {
        let bert_cfg = BackboneConfig::default().to_bert_config(6).unwrap();
        assert_eq!(bert_cfg.num_hidden_layers, 6);
        assert_eq!(bert_cfg.hidden_size, 768);
    }
}
