use burn::{
    nn::conv::{Conv3d, Conv3dConfig},
    prelude::*,
};

use crate::{
    activation::Mode,
    checkpoint::{child, ParameterShapes},
    error::ConfigurationError,
    layer::{LayerOrder, SingleConv, SingleConvConfig},
};

use super::Head;

/// Smallest norm a direction vector is divided by.
pub const MIN_NORM: f64 = 1e-8;

/// Scale every voxel of `x` to unit L2 norm across the channel axis.
///
/// The norm is detached: gradients reach `x` through the numerator only.
pub fn unit_normalize<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 5> {
    let norm = x
        .clone()
        .powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .detach()
        .clamp_min(MIN_NORM);
    x / norm
}

/// One conv sub-layer at constant width, then a 1x1x1 projection to a
/// direction vector.
#[derive(Module, Debug)]
pub struct DirectionHead<B: Backend> {
    conv1: SingleConv<B>,
    final_conv: Conv3d<B>,
}

impl<B: Backend> DirectionHead<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv1.forward(x);
        unit_normalize(self.final_conv.forward(x))
    }

    pub fn conv1(&self) -> &SingleConv<B> {
        &self.conv1
    }

    pub fn final_conv(&self) -> &Conv3d<B> {
        &self.final_conv
    }
}

impl<B: Backend> ParameterShapes for DirectionHead<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.conv1.parameter_shapes(&child(prefix, "conv1"), out);
        self.final_conv
            .parameter_shapes(&child(prefix, "final_conv"), out);
    }
}

/// Independent [`DirectionHead`]s sharing the decoder output, one per
/// direction field to learn.
#[derive(Module, Debug)]
pub struct DirectionHeads<B: Backend> {
    heads: Vec<DirectionHead<B>>,
}

impl<B: Backend> DirectionHeads<B> {
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    pub fn heads(&self) -> &[DirectionHead<B>] {
        &self.heads
    }
}

impl<B: Backend> Head<B> for DirectionHeads<B> {
    type Output = Vec<Tensor<B, 5>>;

    /// Unit vectors in both modes.
    fn forward(&self, features: Tensor<B, 5>, _mode: Mode) -> Self::Output {
        self.heads
            .iter()
            .map(|head| head.forward(features.clone()))
            .collect()
    }
}

impl<B: Backend> ParameterShapes for DirectionHeads<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.heads.parameter_shapes(&child(prefix, "heads"), out);
    }
}

#[derive(Config, Debug)]
pub struct DirectionHeadsConfig {
    in_channels: usize,
    out_channels: usize,
    num_heads: usize,
    order: LayerOrder,
    num_groups: usize,
}

impl DirectionHeadsConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DirectionHeads<B>, ConfigurationError> {
        if self.num_heads == 0 {
            return Err(ConfigurationError::Zero {
                what: "output head count",
            });
        }

        let heads = (0..self.num_heads)
            .map(|_| {
                Ok(DirectionHead {
                    conv1: SingleConvConfig::new(
                        self.in_channels,
                        self.in_channels,
                        self.order.clone(),
                        self.num_groups,
                    )
                    .init(device)?,
                    final_conv: Conv3dConfig::new([self.in_channels, self.out_channels], [1, 1, 1])
                        .init(device),
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        Ok(DirectionHeads { heads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type B = NdArray;

    #[test]
    fn normalized_vectors_have_unit_length() {
        let device = Default::default();
        let x = Tensor::<B, 5>::random([2, 3, 3, 3, 3], Distribution::Normal(0.0, 4.0), &device);

        let norm = unit_normalize(x).powf_scalar(2.0).sum_dim(1).sqrt();
        let ones = Tensor::<B, 5>::ones([2, 1, 3, 3, 3], &device);
        norm.into_data().assert_approx_eq(&ones.into_data(), 4);
    }

    #[test]
    fn zero_vectors_stay_finite() {
        let device = Default::default();
        let x = Tensor::<B, 5>::zeros([1, 3, 2, 2, 2], &device);

        let y = unit_normalize(x);
        assert_eq!(y.abs().max().into_scalar(), 0.0);
    }

    #[test]
    fn gradient_skips_the_norm() {
        let device = Default::default();
        let x = Tensor::<Autodiff<B>, 1>::from_floats([3.0, 4.0, 0.0], &device)
            .reshape([1, 3, 1, 1, 1])
            .require_grad();

        let grads = unit_normalize(x.clone()).sum().backward();
        let grad = x.grad(&grads).unwrap();

        // d(x_i / |x|)/dx_i with |x| held constant.
        let expected = Tensor::<B, 5>::full([1, 3, 1, 1, 1], 0.2, &device);
        grad.into_data().assert_approx_eq(&expected.into_data(), 5);
    }

    #[test]
    fn every_head_is_normalized() {
        let device = Default::default();
        let heads = DirectionHeadsConfig::new(4, 3, 2, LayerOrder::default(), 2)
            .init::<B>(&device)
            .unwrap();
        let x = Tensor::<B, 5>::random([1, 4, 4, 4, 4], Distribution::Normal(0.0, 1.0), &device);

        let fields = Head::forward(&heads, x, Mode::Eval);
        assert_eq!(fields.len(), 2);
        let ones = Tensor::<B, 5>::ones([1, 1, 4, 4, 4], &device);
        for field in fields {
            assert_eq!(field.dims(), [1, 3, 4, 4, 4]);
            let norm = field.powf_scalar(2.0).sum_dim(1).sqrt();
            norm.into_data().assert_approx_eq(&ones.to_data(), 4);
        }
    }
}
