mod distance_transform;
mod end_to_end;
mod tags;
mod unet;

pub use distance_transform::*;
pub use end_to_end::*;
pub use tags::*;
pub use unet::*;

use burn::prelude::*;

use crate::{
    activation::Mode,
    error::{Result, ShapeMismatchError},
    head::Head,
    sampling::spatial_dims,
    skeleton::EncoderDecoder,
};

/// A single feature map, or several that are concatenated along the channel
/// axis before the first encoder stage.
#[derive(Debug, Clone)]
pub enum NetworkInput<B: Backend> {
    Single(Tensor<B, 5>),
    Many(Vec<Tensor<B, 5>>),
}

impl<B: Backend> NetworkInput<B> {
    pub fn into_tensor(self) -> core::result::Result<Tensor<B, 5>, ShapeMismatchError> {
        let tensors = match self {
            Self::Single(x) => return Ok(x),
            Self::Many(tensors) => tensors,
        };

        let Some(first) = tensors.first() else {
            return Err(ShapeMismatchError::EmptyInput);
        };
        let batch = first.dims()[0];
        let spatial = spatial_dims(first);
        for tensor in &tensors[1..] {
            if tensor.dims()[0] != batch {
                return Err(ShapeMismatchError::Batch {
                    expected: batch,
                    actual: tensor.dims()[0],
                });
            }
            if spatial_dims(tensor) != spatial {
                return Err(ShapeMismatchError::spatial(
                    "input concatenation",
                    spatial,
                    spatial_dims(tensor),
                ));
            }
        }

        Ok(Tensor::cat(tensors, 1))
    }
}

impl<B: Backend> From<Tensor<B, 5>> for NetworkInput<B> {
    fn from(x: Tensor<B, 5>) -> Self {
        Self::Single(x)
    }
}

impl<B: Backend> From<Vec<Tensor<B, 5>>> for NetworkInput<B> {
    fn from(tensors: Vec<Tensor<B, 5>>) -> Self {
        Self::Many(tensors)
    }
}

/// Skeleton then head: the forward pass every network shares.
fn run<B: Backend, H: Head<B>>(
    skeleton: &EncoderDecoder<B>,
    head: &H,
    input: NetworkInput<B>,
    mode: Mode,
) -> Result<H::Output> {
    let x = input.into_tensor()?;
    let features = skeleton.forward(x)?;
    Ok(head.forward(features, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn many_inputs_concatenate_on_channels() {
        let device = Default::default();
        let input: NetworkInput<B> = vec![
            Tensor::zeros([2, 3, 4, 4, 4], &device),
            Tensor::ones([2, 3, 4, 4, 4], &device),
        ]
        .into();

        let x = input.into_tensor().unwrap();
        assert_eq!(x.dims(), [2, 6, 4, 4, 4]);
        assert_eq!(x.slice([0..2, 3..6]).min().into_scalar(), 1.0);
    }

    #[test]
    fn empty_input_is_rejected() {
        let input = NetworkInput::<B>::Many(Vec::new());
        assert_eq!(input.into_tensor().unwrap_err(), ShapeMismatchError::EmptyInput);
    }

    #[test]
    fn misaligned_inputs_are_rejected() {
        let device = Default::default();
        let input: NetworkInput<B> = vec![
            Tensor::zeros([1, 3, 4, 4, 4], &device),
            Tensor::zeros([1, 3, 4, 4, 2], &device),
        ]
        .into();

        assert!(matches!(
            input.into_tensor(),
            Err(ShapeMismatchError::Spatial { .. })
        ));
    }
}
