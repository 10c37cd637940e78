use burn::prelude::*;

use crate::{
    checkpoint::{child, ParameterShapes},
    error::ConfigurationError,
};

use super::{
    order::LayerOrder,
    single_conv::{SingleConv, SingleConvConfig},
};

/// Input and output channels of the two sub-layers of a [`DoubleConv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPlan {
    pub conv1: [usize; 2],
    pub conv2: [usize; 2],
}

impl ChannelPlan {
    /// Widening blocks (encoder path) reach `out_channels / 2` first, narrowing
    /// blocks (decoder path) drop to `out_channels` straight away.
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        if in_channels < out_channels {
            let mid = out_channels / 2;
            Self {
                conv1: [in_channels, mid],
                conv2: [mid, out_channels],
            }
        } else {
            Self {
                conv1: [in_channels, out_channels],
                conv2: [out_channels, out_channels],
            }
        }
    }
}

/// Two consecutive [`SingleConv`] sub-layers.
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    conv1: SingleConv<B>,
    conv2: SingleConv<B>,
}

impl<B: Backend> DoubleConv<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv1.forward(x);
        self.conv2.forward(x)
    }

    pub fn in_channels(&self) -> usize {
        self.conv1.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.conv2.out_channels()
    }

    pub fn plan(&self) -> ChannelPlan {
        ChannelPlan {
            conv1: [self.conv1.in_channels(), self.conv1.out_channels()],
            conv2: [self.conv2.in_channels(), self.conv2.out_channels()],
        }
    }

    pub fn weight_shapes(&self) -> [[usize; 5]; 2] {
        [self.conv1.weight_shape(), self.conv2.weight_shape()]
    }

    pub fn conv1(&self) -> &SingleConv<B> {
        &self.conv1
    }

    pub fn conv2(&self) -> &SingleConv<B> {
        &self.conv2
    }
}

impl<B: Backend> ParameterShapes for DoubleConv<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.conv1.parameter_shapes(&child(prefix, "conv1"), out);
        self.conv2.parameter_shapes(&child(prefix, "conv2"), out);
    }
}

#[derive(Config, Debug)]
pub struct DoubleConvConfig {
    in_channels: usize,
    out_channels: usize,
    order: LayerOrder,
    num_groups: usize,
}

impl DoubleConvConfig {
    pub fn plan(&self) -> ChannelPlan {
        ChannelPlan::new(self.in_channels, self.out_channels)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DoubleConv<B>, ConfigurationError> {
        let plan = self.plan();
        let [in1, out1] = plan.conv1;
        let [in2, out2] = plan.conv2;

        Ok(DoubleConv {
            conv1: SingleConvConfig::new(in1, out1, self.order.clone(), self.num_groups)
                .with_pos(1)
                .init(device)?,
            conv2: SingleConvConfig::new(in2, out2, self.order.clone(), self.num_groups)
                .with_pos(2)
                .init(device)?,
        })
    }
}
