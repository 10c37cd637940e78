//! The encoder-decoder trunk shared by every network in the crate.

use burn::{module::Ignored, prelude::*};

use crate::{
    checkpoint::{child, ParameterShapes},
    decoder::{DecoderStage, DecoderStageConfig, Upsampling},
    encoder::{EncoderStage, EncoderStageConfig, Pooling},
    error::{ConfigurationError, ShapeMismatchError},
    layer::LayerOrder,
    sampling::{spatial_dims, PoolKind},
};

/// Layout of an [`EncoderDecoder`].
///
/// Encoder stage `i` produces `init_channels * channel_growth^i` channels; all
/// but the first start with pooling. Decoder stages mirror the encoders, one
/// fewer than them, each returning to the channel count of its skip feature.
#[derive(Config, Debug)]
pub struct SkeletonConfig {
    pub in_channels: usize,
    #[config(default = 64)]
    pub init_channels: usize,
    #[config(default = 4)]
    pub depth: usize,
    #[config(default = 2)]
    pub channel_growth: usize,
    /// Order of the operations in every conv sub-layer, see [`LayerOrder`].
    #[config(default = "\"crg\".to_string()")]
    pub layer_order: String,
    #[config(default = "PoolKind::Max")]
    pub pool_kind: PoolKind,
    #[config(default = "[2, 2, 2]")]
    pub pool_kernel: [usize; 3],
    #[config(default = 1)]
    pub pool_padding: usize,
    #[config(default = "Upsampling::Nearest")]
    pub upsampling: Upsampling,
}

impl SkeletonConfig {
    /// GroupNorm group count, half the initial width capped at 32.
    pub fn num_groups(&self) -> usize {
        (self.init_channels / 2).clamp(1, 32)
    }

    /// Output channels of each encoder stage, shallowest first.
    pub fn stage_channels(&self) -> Vec<usize> {
        let mut channels = Vec::with_capacity(self.depth);
        let mut width = self.init_channels;
        for _ in 0..self.depth {
            channels.push(width);
            width *= self.channel_growth;
        }
        channels
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<EncoderDecoder<B>, ConfigurationError> {
        for (value, what) in [
            (self.in_channels, "input channel count"),
            (self.init_channels, "initial channel count"),
            (self.depth, "network depth"),
            (self.channel_growth, "channel growth factor"),
        ] {
            if value == 0 {
                return Err(ConfigurationError::Zero { what });
            }
        }

        let order: LayerOrder = self.layer_order.parse()?;
        let pooling = Pooling::new(self.pool_kind, self.pool_kernel, self.pool_padding)?;
        if self.upsampling == Upsampling::Transposed
            && (self.pool_padding != 0 || self.pool_kernel.iter().any(|k| *k != 2))
        {
            return Err(ConfigurationError::TransposedUpsampling {
                kernel: self.pool_kernel,
                padding: self.pool_padding,
            });
        }

        let num_groups = self.num_groups();
        let channels = self.stage_channels();
        tracing::debug!(%order, ?channels, num_groups, "building encoder-decoder");

        let mut in_channels = self.in_channels;
        let mut encoders = Vec::with_capacity(self.depth);
        for (i, out_channels) in channels.iter().enumerate() {
            let stage = EncoderStageConfig::new(in_channels, *out_channels, order.clone(), num_groups)
                .with_pooling((i > 0).then_some(pooling))
                .init(device)?;
            encoders.push(stage);
            in_channels = *out_channels;
        }

        let decoders = (0..self.depth.saturating_sub(1))
            .rev()
            .enumerate()
            .map(|(index, level)| {
                let skip_channels = channels[level];
                DecoderStageConfig::new(
                    skip_channels + channels[level + 1],
                    skip_channels,
                    skip_channels,
                    order.clone(),
                    num_groups,
                )
                .with_upsampling(self.upsampling)
                .with_scale_factor(self.pool_kernel)
                .with_index(index)
                .init(device)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EncoderDecoder {
            encoders,
            decoders,
            order: Ignored(order),
            pool_kernel: Ignored(self.pool_kernel),
        })
    }
}

/// Encoder stages, decoder stages and the skip connections between them.
#[derive(Module, Debug)]
pub struct EncoderDecoder<B: Backend> {
    encoders: Vec<EncoderStage<B>>,
    decoders: Vec<DecoderStage<B>>,
    order: Ignored<LayerOrder>,
    pool_kernel: Ignored<[usize; 3]>,
}

impl<B: Backend> EncoderDecoder<B> {
    /// Run the encoder path, then the decoder path over the encoder features in
    /// reverse. The deepest encoder output is the decoder's starting input and
    /// is never used as a skip connection.
    pub fn forward(&self, x: Tensor<B, 5>) -> Result<Tensor<B, 5>, ShapeMismatchError> {
        self.check_input(&x)?;

        let Some((deepest, shallower)) = self.encoders.split_last() else {
            return Ok(x);
        };

        let mut skips = Vec::with_capacity(shallower.len());
        let mut x = x;
        for encoder in shallower {
            x = encoder.forward(x);
            skips.push(x.clone());
        }
        let mut x = deepest.forward(x);

        for (decoder, skip) in self.decoders.iter().zip(skips.into_iter().rev()) {
            x = decoder.forward(skip, x)?;
        }

        Ok(x)
    }

    pub fn in_channels(&self) -> usize {
        self.encoders
            .first()
            .map(EncoderStage::in_channels)
            .unwrap_or_default()
    }

    /// Channels of the final decoder output.
    pub fn out_channels(&self) -> usize {
        self.encoders
            .first()
            .map(EncoderStage::out_channels)
            .unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.encoders.len()
    }

    pub fn encoders(&self) -> &[EncoderStage<B>] {
        &self.encoders
    }

    pub fn decoders(&self) -> &[DecoderStage<B>] {
        &self.decoders
    }

    pub fn layer_order(&self) -> &LayerOrder {
        &self.order
    }

    /// Each spatial input dimension must be a multiple of this.
    pub fn size_divisor(&self) -> [usize; 3] {
        let levels = self.depth().saturating_sub(1) as u32;
        self.pool_kernel.0.map(|k| k.pow(levels))
    }

    fn check_input(&self, x: &Tensor<B, 5>) -> Result<(), ShapeMismatchError> {
        let expected = self.in_channels();
        let actual = x.dims()[1];
        if expected != actual {
            return Err(ShapeMismatchError::channels("encoder stage 0", expected, actual));
        }

        let dims = spatial_dims(x);
        let factor = self.size_divisor();
        if dims.iter().zip(factor).any(|(d, f)| d % f != 0) {
            return Err(ShapeMismatchError::Indivisible { dims, factor });
        }
        Ok(())
    }
}

impl<B: Backend> ParameterShapes for EncoderDecoder<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.encoders.parameter_shapes(&child(prefix, "encoders"), out);
        self.decoders.parameter_shapes(&child(prefix, "decoders"), out);
    }
}
