#[cfg(feature = "pretrained")]
mod download;
#[cfg(feature = "pretrained")]
pub(crate) use download::download;

pub mod activation;
pub mod checkpoint;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod head;
pub mod layer;
pub mod sampling;
pub mod skeleton;

mod model;
pub use model::*;

pub use activation::{FinalActivation, Mode};
pub use checkpoint::{save_checkpoint, CheckpointFormat, CheckpointSource, TrainingState};
pub use error::{Error, Result};
