use burn::{
    module::Ignored,
    nn::conv::{ConvTranspose3d, ConvTranspose3dConfig},
    prelude::*,
};

use crate::{
    checkpoint::{child, ParameterShapes},
    error::{ConfigurationError, ShapeMismatchError},
    layer::{DoubleConv, DoubleConvConfig, LayerOrder},
    sampling::{resize_nearest3d, spatial_dims},
};

/// How a decoder stage brings the deeper feature map up to the skip resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Upsampling {
    /// Nearest-neighbour resize to the skip feature's size.
    Nearest,
    /// Learned ConvTranspose3d with stride equal to the scale factor.
    Transposed,
}

/// Upsampling, concatenation with the matching encoder feature and a
/// channel-reducing [`DoubleConv`].
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    upsample: Option<ConvTranspose3d<B>>,
    double_conv: DoubleConv<B>,
    index: usize,
    upsampling: Ignored<Upsampling>,
}

impl<B: Backend> DecoderStage<B> {
    /// Combine `skip` (encoder side) with `x` (the deeper decoder input).
    pub fn forward(&self, skip: Tensor<B, 5>, x: Tensor<B, 5>) -> Result<Tensor<B, 5>, ShapeMismatchError> {
        let target = spatial_dims(&skip);

        let x = match &self.upsample {
            Some(upsample) => {
                let expected = upsample.weight.dims()[0];
                let actual = x.dims()[1];
                if expected != actual {
                    return Err(ShapeMismatchError::channels(self.name(), expected, actual));
                }
                upsample.forward(x)
            }
            None => resize_nearest3d(x, target),
        };

        let upsampled = spatial_dims(&x);
        if upsampled != target {
            return Err(ShapeMismatchError::spatial(self.name(), target, upsampled));
        }

        let x = Tensor::cat(vec![skip, x], 1);
        let expected = self.double_conv.in_channels();
        let actual = x.dims()[1];
        if expected != actual {
            return Err(ShapeMismatchError::channels(self.name(), expected, actual));
        }

        Ok(self.double_conv.forward(x))
    }

    pub fn upsampling(&self) -> Upsampling {
        self.upsampling.0
    }

    pub fn block(&self) -> &DoubleConv<B> {
        &self.double_conv
    }

    pub fn out_channels(&self) -> usize {
        self.double_conv.out_channels()
    }

    fn name(&self) -> String {
        format!("decoder stage {}", self.index)
    }
}

impl<B: Backend> ParameterShapes for DecoderStage<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        if let Some(upsample) = &self.upsample {
            upsample.parameter_shapes(&child(prefix, "upsample"), out);
        }
        self.double_conv
            .parameter_shapes(&child(prefix, "double_conv"), out);
    }
}

#[derive(Config, Debug)]
pub struct DecoderStageConfig {
    /// Channels after concatenation: skip plus upsampled.
    in_channels: usize,
    skip_channels: usize,
    out_channels: usize,
    order: LayerOrder,
    num_groups: usize,
    #[config(default = "Upsampling::Nearest")]
    upsampling: Upsampling,
    #[config(default = "[2, 2, 2]")]
    scale_factor: [usize; 3],
    #[config(default = 0)]
    index: usize,
}

impl DecoderStageConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DecoderStage<B>, ConfigurationError> {
        let upsampled_channels = self.in_channels.saturating_sub(self.skip_channels);
        if upsampled_channels == 0 {
            return Err(ConfigurationError::Zero {
                what: "upsampled channel count",
            });
        }

        let upsample = match self.upsampling {
            Upsampling::Nearest => None,
            // (D - 1) * stride - 2 * padding + kernel + output_padding, i.e. exactly
            // 2 * D for a 2x2x2 unpadded pooling.
            Upsampling::Transposed => Some(
                ConvTranspose3dConfig::new([upsampled_channels, upsampled_channels], [3, 3, 3])
                    .with_stride(self.scale_factor)
                    .with_padding([1, 1, 1])
                    .with_padding_out([1, 1, 1])
                    .init(device),
            ),
        };

        let block = DoubleConvConfig::new(
            self.in_channels,
            self.out_channels,
            self.order.clone(),
            self.num_groups,
        );
        tracing::debug!(
            index = self.index,
            skip_channels = self.skip_channels,
            plan = ?block.plan(),
            upsampling = ?self.upsampling,
            "decoder stage"
        );

        Ok(DecoderStage {
            upsample,
            double_conv: block.init(device)?,
            index: self.index,
            upsampling: Ignored(self.upsampling),
        })
    }
}
