use burn::{module::Ignored, prelude::*};

use crate::{
    checkpoint::{child, ParameterShapes},
    error::ConfigurationError,
    layer::{DoubleConv, DoubleConvConfig, LayerOrder},
    sampling::{pool3d, pooled_size, PoolKind},
};

/// Downsampling applied at the start of an encoder stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Pooling {
    pub kind: PoolKind,
    pub kernel: [usize; 3],
    pub padding: usize,
}

impl Pooling {
    pub fn new(kind: PoolKind, kernel: [usize; 3], padding: usize) -> Result<Self, ConfigurationError> {
        if kernel.contains(&0) {
            return Err(ConfigurationError::Zero { what: "pool kernel" });
        }
        if kernel.iter().any(|k| 2 * padding > *k) {
            return Err(ConfigurationError::PoolPadding { kernel, padding });
        }
        Ok(Self {
            kind,
            kernel,
            padding,
        })
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        pool3d(x, self.kind, self.kernel, self.padding)
    }

    pub fn output_size(&self, dims: [usize; 3]) -> [usize; 3] {
        pooled_size(dims, self.kernel, self.padding)
    }
}

/// Optional pooling followed by a [`DoubleConv`]. The output is kept by the
/// caller as a skip connection.
#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    pooling: Ignored<Option<Pooling>>,
    double_conv: DoubleConv<B>,
}

impl<B: Backend> EncoderStage<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = match self.pooling.0 {
            Some(pooling) => pooling.forward(x),
            None => x,
        };
        self.double_conv.forward(x)
    }

    pub fn pooling(&self) -> Option<Pooling> {
        self.pooling.0
    }

    pub fn block(&self) -> &DoubleConv<B> {
        &self.double_conv
    }

    pub fn in_channels(&self) -> usize {
        self.double_conv.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.double_conv.out_channels()
    }
}

impl<B: Backend> ParameterShapes for EncoderStage<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.double_conv
            .parameter_shapes(&child(prefix, "double_conv"), out);
    }
}

#[derive(Config, Debug)]
pub struct EncoderStageConfig {
    in_channels: usize,
    out_channels: usize,
    order: LayerOrder,
    num_groups: usize,
    pooling: Option<Pooling>,
}

impl EncoderStageConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<EncoderStage<B>, ConfigurationError> {
        let block = DoubleConvConfig::new(
            self.in_channels,
            self.out_channels,
            self.order.clone(),
            self.num_groups,
        );
        tracing::debug!(plan = ?block.plan(), pooling = ?self.pooling, "encoder stage");

        Ok(EncoderStage {
            pooling: Ignored(self.pooling),
            double_conv: block.init(device)?,
        })
    }
}
