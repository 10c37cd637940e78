use burn::prelude::*;

use crate::{
    activation::FinalActivation,
    sampling::PoolKind,
    skeleton::SkeletonConfig,
};

use super::{UNet3d, UNet3dConfig};

/// Shallow network predicting a distance transform to the object boundary,
/// usually from the direction fields of a [`TagsUNet3d`](super::TagsUNet3d).
///
/// It is a [`UNet3d`] with two levels and average pooling, so a quantized
/// transform can be trained as classification (softmax) and a continuous one
/// as regression on the raw output.
pub type DistanceTransformUNet3d<B> = UNet3d<B>;

#[derive(Config, Debug)]
pub struct DistanceTransformUNet3dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub final_activation: FinalActivation,
    #[config(default = 32)]
    pub init_channels: usize,
    #[config(default = "\"crg\".to_string()")]
    pub layer_order: String,
}

impl DistanceTransformUNet3dConfig {
    pub fn skeleton(&self) -> SkeletonConfig {
        SkeletonConfig::new(self.in_channels)
            .with_init_channels(self.init_channels)
            .with_depth(2)
            .with_layer_order(self.layer_order.clone())
            .with_pool_kind(PoolKind::Avg)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<DistanceTransformUNet3d<B>> {
        UNet3dConfig::new(self.skeleton(), self.out_channels, self.final_activation).init(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{activation::Mode, error::Error, error::ShapeMismatchError};
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray;

    fn net() -> DistanceTransformUNet3d<B> {
        DistanceTransformUNet3dConfig::new(6, 2, FinalActivation::Softmax)
            .with_init_channels(4)
            .init(&Default::default())
            .unwrap()
    }

    #[test]
    fn two_levels_with_average_pooling() {
        let net = net();
        let skeleton = net.skeleton();

        assert_eq!(skeleton.depth(), 2);
        assert_eq!(skeleton.decoders().len(), 1);
        let pooling = skeleton.encoders()[1].pooling().unwrap();
        assert_eq!(pooling.kind, PoolKind::Avg);
        assert!(skeleton.encoders()[0].pooling().is_none());
    }

    #[test]
    fn list_input_equals_concatenated_input() {
        let device = Default::default();
        let net = net();
        let a = Tensor::<B, 5>::random([1, 3, 8, 8, 8], Distribution::Normal(0.0, 1.0), &device);
        let b = Tensor::<B, 5>::random([1, 3, 8, 8, 8], Distribution::Normal(0.0, 1.0), &device);

        let from_list = net.forward(vec![a.clone(), b.clone()], Mode::Eval).unwrap();
        let from_tensor = net.forward(Tensor::cat(vec![a, b], 1), Mode::Eval).unwrap();

        assert_eq!(from_list.dims(), [1, 2, 8, 8, 8]);
        from_list
            .into_data()
            .assert_approx_eq(&from_tensor.into_data(), 5);
    }

    #[test]
    fn wrong_channel_total_is_reported() {
        let device = Default::default();
        let net = net();
        let a = Tensor::<B, 5>::zeros([1, 3, 8, 8, 8], &device);

        let err = net.forward(vec![a.clone(), a.clone(), a], Mode::Eval).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch(ShapeMismatchError::Channels { expected: 6, actual: 9, .. })
        ));
    }
}
