//! Diffusion-LM denoiser for text in pure Rust.
//!
//! A candle implementation of the DiffuWords transformer: given a noisy
//! sequence of continuous word embeddings, a diffusion timestep and a
//! conditioning token sequence, it predicts the denoised embeddings. A word
//! embedding table shared with the logits head maps between tokens and the
//! continuous space.
//!
//! ## Architecture
//!
//! ```text
//! source tokens → BERT encoder (6 layers) ──────────────┐
//!                                                        ↓ cross-attention
//! noisy x (+ self-conditioning) → tanh MLP → +pos +t → 6 decoder blocks
//!                                                        ↓
//!                                               tanh MLP → denoised x
//!                                                        ↓
//!                                   tied embedding → logits (linear | -distance)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: BERT backbone configuration and presets
//! - [`model`]: denoiser and conditioning encoder
//! - [`weights`]: safetensors checkpoints and HuggingFace Hub downloads
//!
//! ## Example
//!
//! ```no_run
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use diffuwords_rs::{BackboneConfig, DiffusionTransformer, SelfConditioning, TransformerNetConfig};
//!
//! # fn main() -> diffuwords_rs::Result<()> {
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let cfg = TransformerNetConfig {
//!     self_conditioning: SelfConditioning::ZeroFill,
//!     ..TransformerNetConfig::default()
//! };
//! let model = DiffusionTransformer::new(&cfg, &BackboneConfig::default(), vb)?;
//!
//! let x = Tensor::randn(0f32, 1.0, (2, 5, 128), &device)?;
//! let t = Tensor::new(&[10u32, 500], &device)?;
//! let ids = Tensor::new(&[[101u32, 2023, 102], [101, 2003, 102]], &device)?;
//! let mask = Tensor::ones((2, 3), DType::U32, &device)?;
//! let denoised = model.forward(&x, &t, &ids, &mask, None)?;
//! let logits = model.get_logits(&denoised)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod model;
pub mod weights;

mod error;

pub use config::BackboneConfig;
pub use error::{Error, Result};
pub use model::encoder::{BertConditionEncoder, ConditionEncoder, EncoderOutput};
pub use model::transformer::config::{BackboneInit, LogitsMode, SelfConditioning, TransformerNetConfig};
pub use model::transformer::DiffusionTransformer;
