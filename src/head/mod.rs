mod direction;
mod segmentation;

pub use direction::*;
pub use segmentation::*;

use burn::tensor::{backend::Backend, Tensor};

use crate::activation::Mode;

/// Turns the decoder output of an [`EncoderDecoder`](crate::skeleton::EncoderDecoder)
/// into the network's prediction.
pub trait Head<B: Backend> {
    type Output;
    fn forward(&self, features: Tensor<B, 5>, mode: Mode) -> Self::Output;
}
