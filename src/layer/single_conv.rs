use burn::{
    module::Ignored,
    nn::{
        conv::{Conv3d, Conv3dConfig},
        BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig, PaddingConfig3d, Relu,
    },
    prelude::*,
};

use crate::{
    checkpoint::{child, ParameterShapes},
    error::ConfigurationError,
};

use super::order::{LayerKind, LayerOrder};

/// Conv3d, ReLU and an optional normalization, applied in a configured order.
#[derive(Module, Debug)]
pub struct SingleConv<B: Backend> {
    conv: Conv3d<B>,
    relu: Relu,
    group_norm: Option<GroupNorm<B>>,
    batch_norm: Option<BatchNorm<B, 3>>,
    order: Ignored<LayerOrder>,
    pos: usize,
}

impl<B: Backend> SingleConv<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.order.layers().iter().fold(x, |x, kind| match kind {
            LayerKind::Conv => self.conv.forward(x),
            LayerKind::Relu => self.relu.forward(x),
            LayerKind::GroupNorm => match &self.group_norm {
                Some(norm) => norm.forward(x),
                None => x,
            },
            LayerKind::BatchNorm => match &self.batch_norm {
                Some(norm) => norm.forward(x),
                None => x,
            },
        })
    }

    /// `[out_channels, in_channels, k, k, k]`.
    pub fn weight_shape(&self) -> [usize; 5] {
        self.conv.weight.dims()
    }

    pub fn in_channels(&self) -> usize {
        self.weight_shape()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.weight_shape()[0]
    }

    /// 1-based index of this sub-layer within its block.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn conv(&self) -> &Conv3d<B> {
        &self.conv
    }

    pub fn group_norm(&self) -> Option<&GroupNorm<B>> {
        self.group_norm.as_ref()
    }

    pub fn batch_norm(&self) -> Option<&BatchNorm<B, 3>> {
        self.batch_norm.as_ref()
    }
}

impl<B: Backend> ParameterShapes for SingleConv<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.conv.parameter_shapes(&child(prefix, "conv"), out);
        if let Some(norm) = &self.group_norm {
            norm.parameter_shapes(&child(prefix, "group_norm"), out);
        }
        if let Some(norm) = &self.batch_norm {
            norm.parameter_shapes(&child(prefix, "batch_norm"), out);
        }
    }
}

#[derive(Config, Debug)]
pub struct SingleConvConfig {
    in_channels: usize,
    out_channels: usize,
    order: LayerOrder,
    num_groups: usize,
    #[config(default = 1)]
    pos: usize,
    #[config(default = 3)]
    kernel_size: usize,
}

impl SingleConvConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SingleConv<B>, ConfigurationError> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(ConfigurationError::Zero { what: "channel count" });
        }

        let mut group_norm = None;
        let mut batch_norm = None;
        for (index, kind) in self.order.layers().iter().enumerate() {
            let channels = self
                .order
                .norm_channels(index, self.in_channels, self.out_channels);
            match kind {
                LayerKind::GroupNorm => {
                    if self.num_groups == 0 || channels % self.num_groups != 0 {
                        return Err(ConfigurationError::IndivisibleGroups {
                            channels,
                            groups: self.num_groups,
                        });
                    }
                    group_norm = Some(GroupNormConfig::new(self.num_groups, channels).init(device));
                }
                LayerKind::BatchNorm => {
                    batch_norm = Some(BatchNormConfig::new(channels).init(device));
                }
                LayerKind::Conv | LayerKind::Relu => {}
            }
        }

        let padding = self.kernel_size / 2;
        let conv = Conv3dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size; 3],
        )
        .with_padding(PaddingConfig3d::Explicit(padding, padding, padding))
        .init(device);

        tracing::trace!(
            pos = self.pos,
            order = %self.order,
            in_channels = self.in_channels,
            out_channels = self.out_channels,
            "built conv sub-layer"
        );

        Ok(SingleConv {
            conv,
            relu: Relu::new(),
            group_norm,
            batch_norm,
            order: Ignored(self.order.clone()),
            pos: self.pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray;

    fn config(order: &str, in_channels: usize, out_channels: usize) -> SingleConvConfig {
        SingleConvConfig::new(in_channels, out_channels, order.parse().unwrap(), 2)
    }

    #[test]
    fn preserves_spatial_size() {
        let device = Default::default();
        let layer = config("crg", 2, 4).init::<B>(&device).unwrap();

        let x = Tensor::<B, 5>::random([1, 2, 5, 6, 7], Distribution::Default, &device);
        assert_eq!(layer.forward(x).dims(), [1, 4, 5, 6, 7]);
        assert_eq!(layer.weight_shape(), [4, 2, 3, 3, 3]);
    }

    #[test]
    fn relu_last_clamps_at_zero() {
        let device = Default::default();
        let layer = config("cgr", 2, 4).init::<B>(&device).unwrap();

        let x = Tensor::<B, 5>::random([1, 2, 4, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        assert!(layer.forward(x).min().into_scalar() >= 0.0);
    }

    #[test]
    fn pre_conv_batch_norm_uses_input_channels() {
        let device = Default::default();
        let layer = config("bcr", 3, 8).init::<B>(&device).unwrap();

        let mut shapes = Vec::new();
        layer.parameter_shapes("layer", &mut shapes);
        assert!(shapes.contains(&("layer.batch_norm.gamma".to_string(), vec![3])));

        let x = Tensor::<B, 5>::random([2, 3, 4, 4, 4], Distribution::Default, &device);
        assert_eq!(layer.forward(x).dims(), [2, 8, 4, 4, 4]);
    }

    #[test]
    fn indivisible_groups_are_rejected() {
        let device = Default::default();
        let err = SingleConvConfig::new(1, 3, "crg".parse().unwrap(), 2)
            .init::<B>(&device)
            .unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::IndivisibleGroups {
                channels: 3,
                groups: 2
            }
        );
    }

    #[test]
    fn group_norm_ignored_without_token() {
        let device = Default::default();
        // 3 output channels and 2 groups would be invalid if group norm were built.
        let layer = SingleConvConfig::new(1, 3, "cr".parse().unwrap(), 2)
            .init::<B>(&device)
            .unwrap();

        let mut shapes = Vec::new();
        layer.parameter_shapes("l", &mut shapes);
        assert_eq!(shapes.len(), 2);
    }
}
