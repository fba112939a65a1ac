//! Model components.
//!
//! - [`transformer`]: the diffusion denoiser: timestep embedding, projectors,
//!   cross-attention blocks and the tied logits head
//! - [`encoder`]: conditioning encoders the denoiser cross-attends to

pub mod encoder;
pub mod transformer;
