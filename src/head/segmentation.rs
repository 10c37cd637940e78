use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::conv::{Conv3d, Conv3dConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::{
    activation::{FinalActivation, Mode},
    checkpoint::{child, ParameterShapes},
};

use super::Head;

/// 1x1x1 projection to the class channels. The final activation is skipped in
/// training so losses always receive logits.
#[derive(Module, Debug)]
pub struct SegmentationHead<B: Backend> {
    final_conv: Conv3d<B>,
    activation: Ignored<FinalActivation>,
}

impl<B: Backend> SegmentationHead<B> {
    pub fn forward(&self, x: Tensor<B, 5>, mode: Mode) -> Tensor<B, 5> {
        let x = self.final_conv.forward(x);
        match mode {
            Mode::Train => x,
            Mode::Eval => self.activation.forward(x),
        }
    }

    pub fn activation(&self) -> FinalActivation {
        self.activation.0
    }

    pub fn final_conv(&self) -> &Conv3d<B> {
        &self.final_conv
    }
}

impl<B: Backend> Head<B> for SegmentationHead<B> {
    type Output = Tensor<B, 5>;
    fn forward(&self, features: Tensor<B, 5>, mode: Mode) -> Self::Output {
        SegmentationHead::forward(self, features, mode)
    }
}

impl<B: Backend> ParameterShapes for SegmentationHead<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.final_conv
            .parameter_shapes(&child(prefix, "final_conv"), out);
    }
}

#[derive(Config, Debug)]
pub struct SegmentationHeadConfig {
    in_channels: usize,
    out_channels: usize,
    activation: FinalActivation,
}

impl SegmentationHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegmentationHead<B> {
        SegmentationHead {
            final_conv: Conv3dConfig::new([self.in_channels, self.out_channels], [1, 1, 1])
                .init(device),
            activation: Ignored(self.activation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray;

    #[test]
    fn train_mode_returns_logits() {
        let device = Default::default();
        let head = SegmentationHeadConfig::new(4, 2, FinalActivation::Sigmoid).init::<B>(&device);
        let x = Tensor::<B, 5>::random([1, 4, 2, 2, 2], Distribution::Normal(0.0, 5.0), &device);

        let logits = head.forward(x.clone(), Mode::Train);
        let probs = head.forward(x, Mode::Eval);

        burn::tensor::activation::sigmoid(logits)
            .into_data()
            .assert_approx_eq(&probs.into_data(), 5);
    }
}
