//! Diffusion denoiser over continuous word embeddings.
//!
//! A cross-attention transformer that predicts clean embeddings from noisy
//! ones, conditioned on a diffusion timestep and a BERT-encoded source
//! sequence.
//!
//! ## Forward pass
//!
//! ```text
//! timesteps ─→ sinusoidal(hidden_t_dim) → Linear → SiLU → Linear ──┐ emb_t [B, H]
//!                                                                   │
//! x [B,S,in] ─(concat self_conditions)─→ input_up_proj (tanh MLP) ─→ + pos emb + emb_t
//!                                                                   ↓
//!                                                          LayerNorm → Dropout
//!                                                                   ↓
//! input_id_x, mask ─→ BERT encoder ─→ cond [B,L,H] ─→ 6 × BasicTransformerBlock
//!                                                                   ↓
//!                                                    output_down_proj (tanh MLP)
//!                                                                   ↓
//!                                                         [B, S, output_dims]
//! ```
//!
//! ## Config (deployed model)
//!
//! ```text
//! input_dims:           128
//! hidden_t_dim:         128
//! output_dims:          128
//! hidden_size:          768   (bert-base-uncased)
//! num_attention_heads:  12
//! max_position_embeddings: 512
//! decoder blocks:       6
//! encoder layers:       6
//! vocab_size:           30522
//! ```

pub mod attention;
pub mod config;
pub mod embeddings;
pub mod layers;
pub mod projection;
pub mod timestep;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::config::BackboneConfig;
use crate::model::encoder::{BertConditionEncoder, ConditionEncoder};
use crate::{weights, Error, Result};
use config::{BackboneInit, LogitsMode, SelfConditioning, TransformerNetConfig};
use embeddings::{PositionalFrontEnd, TiedEmbedding};
use layers::BasicTransformerBlock;
use projection::TanhProjection;
use timestep::TimestepEmbedding;

/// Denoising transformer with a tied word-embedding table.
pub struct DiffusionTransformer {
    config: TransformerNetConfig,
    logits_mode: LogitsMode,
    hidden_size: usize,
    dtype: DType,
    device: Device,
    /// `[vocab_size, input_dims]`, shared by `get_embeds` and `get_logits`.
    word_embedding: TiedEmbedding,
    time_embed: TimestepEmbedding,
    /// Present when the projector input width differs from `hidden_size`.
    input_up_proj: Option<TanhProjection>,
    front_end: PositionalFrontEnd,
    encoder: Box<dyn ConditionEncoder>,
    transformer_blocks: Vec<BasicTransformerBlock>,
    /// Present when `output_dims != hidden_size`.
    output_down_proj: Option<TanhProjection>,
}

impl DiffusionTransformer {
    /// Build the model, creating the BERT conditioning encoder according to
    /// `cfg.backbone_init`.
    ///
    /// Every other parameter is read from `vb` (or created there when `vb`
    /// is backed by a `VarMap`).
    pub fn new(cfg: &TransformerNetConfig, backbone: &BackboneConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        backbone.validate()?;
        let backbone = backbone.with_dropout(cfg.dropout);
        let bert_cfg = backbone.to_bert_config(cfg.num_encoder_layers)?;

        let encoder = match &cfg.backbone_init {
            BackboneInit::FromScratch => {
                tracing::info!(
                    "Initializing {}-layer conditioning encoder from scratch",
                    cfg.num_encoder_layers
                );
                BertConditionEncoder::new(&bert_cfg, vb.pp("input_transformers"))?
            }
            BackboneInit::Pretrained { checkpoint } => {
                tracing::info!(
                    "Loading {}-layer conditioning encoder from {:?}",
                    cfg.num_encoder_layers,
                    checkpoint
                );
                let enc_vb = weights::load_checkpoint(&[checkpoint], vb.dtype(), vb.device())?;
                BertConditionEncoder::new(&bert_cfg, enc_vb).map_err(|e| {
                    Error::WeightLoad(format!("backbone {}: {e}", checkpoint.display()))
                })?
            }
        };

        Self::with_encoder(cfg, &backbone, Box::new(encoder), vb)
    }

    /// Build the model with the backbone preset named by `cfg.config_name`.
    ///
    /// Unknown names fail with `Error::Config`.
    pub fn from_config_name(cfg: &TransformerNetConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = BackboneConfig::from_preset(&cfg.config_name)?;
        tracing::info!("Using backbone preset {}", cfg.config_name);
        Self::new(cfg, &backbone, vb)
    }

    /// Download the backbone named by `cfg.config_name` from the HuggingFace
    /// Hub and build the model on its config and pretrained weights.
    ///
    /// Overrides `cfg.backbone_init` with the downloaded checkpoint.
    pub fn from_hub(cfg: &TransformerNetConfig, vb: VarBuilder) -> Result<Self> {
        let files = weights::fetch_pretrained(&cfg.config_name)?;
        let backbone = files.backbone_config()?;
        let cfg = TransformerNetConfig {
            backbone_init: BackboneInit::Pretrained {
                checkpoint: files.weights,
            },
            ..cfg.clone()
        };
        Self::new(&cfg, &backbone, vb)
    }

    /// Build the model around an existing conditioning encoder.
    ///
    /// `backbone` supplies the hidden size, head count, position-table length
    /// and LayerNorm eps; the encoder's output width must equal
    /// `backbone.hidden_size`.
    pub fn with_encoder(
        cfg: &TransformerNetConfig,
        backbone: &BackboneConfig,
        encoder: Box<dyn ConditionEncoder>,
        vb: VarBuilder,
    ) -> Result<Self> {
        cfg.validate()?;
        backbone.validate()?;
        let logits_mode = LogitsMode::try_from(cfg.logits_mode)?;
        let hidden_size = backbone.hidden_size;
        if encoder.hidden_size() != hidden_size {
            return Err(Error::Config(format!(
                "conditioning encoder width {} does not match hidden_size {hidden_size}",
                encoder.hidden_size()
            )));
        }

        let word_embedding = TiedEmbedding::new(cfg.vocab_size, cfg.input_dims, vb.pp("word_embedding"))?;
        let time_embed = TimestepEmbedding::new(cfg.hidden_t_dim, hidden_size, vb.pp("time_embed"))?;

        let proj_in = cfg.projector_in_dims();
        let input_up_proj = if proj_in != hidden_size {
            Some(TanhProjection::new(proj_in, hidden_size, hidden_size, vb.pp("input_up_proj"))?)
        } else {
            None
        };

        let front_end = PositionalFrontEnd::new(
            backbone.max_position_embeddings,
            hidden_size,
            backbone.layer_norm_eps,
            cfg.dropout,
            vb.clone(),
            vb.device(),
        )?;

        let transformer_blocks = (0..cfg.num_decoder_layers)
            .map(|i| {
                BasicTransformerBlock::new(
                    hidden_size,
                    backbone.num_attention_heads,
                    backbone.head_dim(),
                    hidden_size,
                    cfg.dropout,
                    vb.pp(format!("transformer_blocks.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let output_down_proj = if cfg.output_dims != hidden_size {
            Some(TanhProjection::new(
                hidden_size,
                hidden_size,
                cfg.output_dims,
                vb.pp("output_down_proj"),
            )?)
        } else {
            None
        };

        tracing::info!(
            "DiffusionTransformer: input_dims={}, hidden={}, output_dims={}, {} blocks × {} heads, \
             self_conditioning={:?}, logits={:?}",
            cfg.input_dims,
            hidden_size,
            cfg.output_dims,
            cfg.num_decoder_layers,
            backbone.num_attention_heads,
            cfg.self_conditioning,
            logits_mode
        );

        Ok(Self {
            config: cfg.clone(),
            logits_mode,
            hidden_size,
            dtype: vb.dtype(),
            device: vb.device().clone(),
            word_embedding,
            time_embed,
            input_up_proj,
            front_end,
            encoder,
            transformer_blocks,
            output_down_proj,
        })
    }

    /// Inference forward pass (dropout disabled).
    ///
    /// - `x`: `[B, S, input_dims]` noisy embeddings
    /// - `timesteps`: `[B]` diffusion steps
    /// - `input_id_x`: `[B, L]` conditioning token ids
    /// - `input_x_attention_mask`: `[B, L]`
    /// - `self_conditions`: `[B, S, input_dims]` previous estimate
    ///
    /// Returns `[B, S, output_dims]` in `x`'s dtype.
    pub fn forward(
        &self,
        x: &Tensor,
        timesteps: &Tensor,
        input_id_x: &Tensor,
        input_x_attention_mask: &Tensor,
        self_conditions: Option<&Tensor>,
    ) -> Result<Tensor> {
        self.forward_t(x, timesteps, input_id_x, input_x_attention_mask, self_conditions, false)
    }

    /// Forward pass with dropout active when `train` is true.
    pub fn forward_t(
        &self,
        x: &Tensor,
        timesteps: &Tensor,
        input_id_x: &Tensor,
        input_x_attention_mask: &Tensor,
        self_conditions: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let out_dtype = x.dtype();
        let device = x.device();
        let (batch, _seq_len, width) = x
            .dims3()
            .map_err(|_| Error::Shape(format!("x must be [batch, seq_len, features], got {:?}", x.dims())))?;
        if width != self.config.input_dims {
            return Err(Error::Shape(format!(
                "x has feature width {width}, expected input_dims {}",
                self.config.input_dims
            )));
        }
        tracing::debug!(
            "forward: x={:?}, cond={:?}, self_conditions={}",
            x.dims(),
            input_id_x.dims(),
            self_conditions.is_some()
        );

        // (a) co-locate auxiliary inputs with x
        let input_id_x = to_device(input_id_x, device)?;
        let attention_mask = to_device(input_x_attention_mask, device)?;
        let timesteps = to_device(timesteps, device)?;

        // (b) timestep embedding
        let t_len = timesteps.dims1().map_err(|_| {
            Error::Shape(format!("timesteps must be [batch], got {:?}", timesteps.dims()))
        })?;
        if t_len != batch {
            return Err(Error::Shape(format!(
                "timesteps has {t_len} entries for a batch of {batch}"
            )));
        }
        let emb_t = self.time_embed.forward(&timesteps, self.dtype)?;

        // (c) self-conditioning
        let x = self.with_self_conditions(&x.to_dtype(self.dtype)?, self_conditions)?;

        // (d) input projection
        let emb_x = match &self.input_up_proj {
            Some(proj) => proj.forward(&x)?,
            None => x,
        };

        // (e) positions + timestep → LayerNorm → dropout
        let mut hidden = self.front_end.forward(&emb_x, &emb_t, train)?;

        // (f) conditioning sequence, computed once for every block
        let cond = self.encoder.encode(&input_id_x, &attention_mask)?.combined()?;
        let cond_batch = cond.dim(0)?;
        if cond_batch != batch {
            return Err(Error::Shape(format!(
                "conditioning batch {cond_batch} does not match x batch {batch}"
            )));
        }

        // (g) decoder stack
        for block in &self.transformer_blocks {
            hidden = block.forward(&hidden, &cond, train)?;
        }

        // (h) output projection
        let out = match &self.output_down_proj {
            Some(proj) => proj.forward(&hidden)?,
            None => hidden,
        };

        // (i) back to the caller's dtype
        out.to_dtype(out_dtype).map_err(Into::into)
    }

    /// Concatenate (or zero-fill) the self-conditioning estimate along the feature axis.
    fn with_self_conditions(&self, x: &Tensor, self_conditions: Option<&Tensor>) -> Result<Tensor> {
        match (self.config.self_conditioning, self_conditions) {
            (SelfConditioning::Disabled, None) => Ok(x.clone()),
            (SelfConditioning::Disabled, Some(_)) => Err(Error::Shape(
                "self_conditions supplied but self-conditioning is disabled".into(),
            )),
            (SelfConditioning::Required, None) => Err(Error::Shape(
                "self-conditioning is required but self_conditions is missing".into(),
            )),
            (SelfConditioning::ZeroFill, None) => Ok(Tensor::cat(&[x, &x.zeros_like()?], 2)?),
            (SelfConditioning::Required | SelfConditioning::ZeroFill, Some(sc)) => {
                if sc.dims() != x.dims() {
                    return Err(Error::Shape(format!(
                        "self_conditions shape {:?} does not match x {:?}",
                        sc.dims(),
                        x.dims()
                    )));
                }
                let sc = to_device(sc, x.device())?.to_dtype(self.dtype)?;
                Ok(Tensor::cat(&[x, &sc], 2)?)
            }
        }
    }

    /// Token ids `[..]` → word embeddings `[.., input_dims]`.
    pub fn get_embeds(&self, token_ids: &Tensor) -> Result<Tensor> {
        let token_ids = to_device(token_ids, &self.device)?;
        self.word_embedding.embed(&token_ids)
    }

    /// Hidden representation `[.., input_dims]` → logits `[.., vocab_size]`.
    pub fn get_logits(&self, hidden_repr: &Tensor) -> Result<Tensor> {
        let hidden = to_device(hidden_repr, &self.device)?.to_dtype(self.dtype)?;
        self.word_embedding.logits(&hidden, self.logits_mode)
    }

    pub fn config(&self) -> &TransformerNetConfig {
        &self.config
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn logits_mode(&self) -> LogitsMode {
        self.logits_mode
    }

    /// The tied `[vocab_size, input_dims]` embedding weight.
    pub fn word_embedding(&self) -> &Tensor {
        self.word_embedding.weight()
    }

    /// Parameter dtype.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn to_device(t: &Tensor, device: &Device) -> Result<Tensor> {
    if t.device().same_device(device) {
        Ok(t.clone())
    } else {
        Ok(t.to_device(device)?)
    }
}
