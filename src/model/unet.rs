use burn::prelude::*;

use crate::{
    activation::{FinalActivation, Mode},
    checkpoint::{
        self, child, escape_scope, skeleton_key_remaps, CheckpointSource, Checkpointed,
        ParameterShapes, TrainingState,
    },
    head::{SegmentationHead, SegmentationHeadConfig},
    skeleton::{EncoderDecoder, SkeletonConfig},
};

use super::{run, NetworkInput};

/// 3D U-Net from "3D U-Net: Learning Dense Volumetric Segmentation from Sparse
/// Annotation" (<https://arxiv.org/abs/1606.06650>).
///
/// `out_channels` may stand for mutually exclusive classes (use
/// [`FinalActivation::Softmax`] and a cross-entropy style loss) or independent
/// binary masks (use [`FinalActivation::Sigmoid`] and a BCE style loss).
#[derive(Module, Debug)]
pub struct UNet3d<B: Backend> {
    skeleton: EncoderDecoder<B>,
    head: SegmentationHead<B>,
}

impl<B: Backend> UNet3d<B> {
    /// Logits in [`Mode::Train`], activated predictions in [`Mode::Eval`].
    pub fn forward(&self, input: impl Into<NetworkInput<B>>, mode: Mode) -> crate::Result<Tensor<B, 5>> {
        run(&self.skeleton, &self.head, input.into(), mode)
    }

    pub fn skeleton(&self) -> &EncoderDecoder<B> {
        &self.skeleton
    }

    pub fn head(&self) -> &SegmentationHead<B> {
        &self.head
    }

    /// Replace the parameters with those stored at `source`.
    pub fn load_checkpoint(
        self,
        source: &CheckpointSource,
        device: &B::Device,
    ) -> crate::Result<(Self, TrainingState)> {
        Ok(checkpoint::restore::<B, _>(self, source, device)?)
    }

    pub(crate) fn scoped_key_remaps(&self, scope: &str) -> Vec<(String, String)> {
        let mut remaps = skeleton_key_remaps(scope, self.skeleton.layer_order());
        remaps.push((
            format!("^{}final_conv\\.(.+)", escape_scope(scope)),
            format!("{scope}head.final_conv.$1"),
        ));
        remaps
    }
}

impl<B: Backend> ParameterShapes for UNet3d<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.skeleton.parameter_shapes(&child(prefix, "skeleton"), out);
        self.head.parameter_shapes(&child(prefix, "head"), out);
    }
}

impl<B: Backend> Checkpointed<B> for UNet3d<B> {
    fn pytorch_key_remaps(&self) -> Vec<(String, String)> {
        self.scoped_key_remaps("")
    }
}

/// Four encoder stages at 1x, 2x, 4x and 8x `init_channels` (64 by default),
/// three decoder stages and a 1x1x1 projection.
#[derive(Config, Debug)]
pub struct UNet3dConfig {
    pub skeleton: SkeletonConfig,
    pub out_channels: usize,
    pub final_activation: FinalActivation,
}

impl UNet3dConfig {
    /// The default 64-channel, four level layout.
    pub fn standard(in_channels: usize, out_channels: usize, final_activation: FinalActivation) -> Self {
        Self::new(SkeletonConfig::new(in_channels), out_channels, final_activation)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<UNet3d<B>> {
        let skeleton = self.skeleton.init(device)?;
        let head = SegmentationHeadConfig::new(
            skeleton.out_channels(),
            self.out_channels,
            self.final_activation,
        )
        .init(device);

        Ok(UNet3d { skeleton, head })
    }
}
