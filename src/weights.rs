//! Checkpoint loading and HuggingFace Hub downloads.
//!
//! Weights are memory-mapped safetensors; parameters are converted to the
//! requested dtype when first read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use hf_hub::api::sync::Api;

use crate::config::BackboneConfig;
use crate::{Error, Result};

/// Files making up a pretrained BERT backbone.
#[derive(Debug, Clone)]
pub struct PretrainedBackbone {
    /// HuggingFace `config.json`.
    pub config: PathBuf,
    /// `model.safetensors`.
    pub weights: PathBuf,
}

impl PretrainedBackbone {
    /// Parse the downloaded `config.json`.
    pub fn backbone_config(&self) -> Result<BackboneConfig> {
        BackboneConfig::from_file(&self.config)
    }
}

/// Memory-map one or more safetensors files into a VarBuilder.
pub fn load_checkpoint<P: AsRef<Path>>(
    paths: &[P],
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    if paths.is_empty() {
        return Err(Error::WeightLoad("no checkpoint files given".into()));
    }
    let paths: Vec<&Path> = paths.iter().map(AsRef::as_ref).collect();
    for path in &paths {
        if !path.exists() {
            return Err(Error::WeightLoad(format!(
                "checkpoint not found: {}",
                path.display()
            )));
        }
    }
    tracing::info!("Loading weights from {:?}", paths);
    // SAFETY: the files are treated as read-only for the VarBuilder's lifetime.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&paths, dtype, device)
            .map_err(|e| Error::WeightLoad(format!("{}: {e}", paths[0].display())))?
    };
    Ok(vb)
}

/// Copy BERT checkpoint tensors into the encoder variables of a `VarMap`.
///
/// A model built with `BackboneInit::FromScratch` on `varmap` keeps its
/// encoder under `prefix` (`input_transformers`); after this call those
/// variables hold the pretrained values and stay trainable. Each variable
/// `{prefix}.{name}` is read from `{name}` or `bert.{name}`, falling back to
/// the `gamma`/`beta` LayerNorm names of older checkpoints. A missing pooler
/// only logs a warning since masked-LM checkpoints often omit it.
///
/// Returns the number of variables set.
pub fn load_backbone_into<P: AsRef<Path>>(varmap: &VarMap, checkpoint: P, prefix: &str) -> Result<usize> {
    let path = checkpoint.as_ref();
    if !path.exists() {
        return Err(Error::WeightLoad(format!(
            "checkpoint not found: {}",
            path.display()
        )));
    }
    tracing::info!("Copying backbone weights from {:?} into {prefix}.*", path);
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)
        .map_err(|e| Error::WeightLoad(format!("{}: {e}", path.display())))?;

    let vars = varmap
        .data()
        .lock()
        .map_err(|_| Error::WeightLoad("variable map lock poisoned".into()))?;
    let prefix = format!("{prefix}.");
    let mut loaded = 0;
    let mut missing = Vec::new();
    for (name, var) in vars.iter() {
        let Some(key) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(src) = find_backbone_tensor(&tensors, key) else {
            missing.push(key.to_string());
            continue;
        };
        if src.dims() != var.dims() {
            return Err(Error::WeightLoad(format!(
                "{key}: checkpoint shape {:?} does not match {:?}",
                src.dims(),
                var.dims()
            )));
        }
        var.set(&src.to_dtype(var.dtype())?.to_device(var.device())?)?;
        loaded += 1;
    }

    if loaded == 0 {
        return Err(Error::WeightLoad(format!(
            "no {prefix}* variables matched {}",
            path.display()
        )));
    }
    missing.sort();
    let (pooler, rest): (Vec<_>, Vec<_>) = missing.into_iter().partition(|k| k.starts_with("pooler."));
    if !rest.is_empty() {
        return Err(Error::WeightLoad(format!(
            "{} backbone tensors missing from {}: {}",
            rest.len(),
            path.display(),
            rest.join(", ")
        )));
    }
    if !pooler.is_empty() {
        tracing::warn!("Checkpoint has no pooler; keeping initialized {}", pooler.join(", "));
    }
    tracing::debug!("Set {loaded} backbone variables");
    Ok(loaded)
}

fn find_backbone_tensor<'a>(tensors: &'a HashMap<String, Tensor>, key: &str) -> Option<&'a Tensor> {
    let mut candidates = vec![key.to_string()];
    if let Some(stem) = key.strip_suffix(".weight") {
        candidates.push(format!("{stem}.gamma"));
    } else if let Some(stem) = key.strip_suffix(".bias") {
        candidates.push(format!("{stem}.beta"));
    }
    candidates
        .iter()
        .find_map(|k| tensors.get(k).or_else(|| tensors.get(&format!("bert.{k}"))))
}

/// Download (or reuse the local cache of) a BERT backbone from the Hub.
///
/// `name` is a preset name such as `bert-base-uncased` or a repository id.
pub fn fetch_pretrained(name: &str) -> Result<PretrainedBackbone> {
    let repo_id = BackboneConfig::hub_repo(name);
    tracing::info!("Fetching backbone {repo_id} from the HuggingFace Hub");
    let api = Api::new()?;
    let repo = api.model(repo_id);
    let config = repo.get("config.json")?;
    let weights = repo.get("model.safetensors")?;
    tracing::debug!("Backbone cached at {:?}", weights.parent());
    Ok(PretrainedBackbone { config, weights })
}
