use burn::prelude::*;

use crate::{
    activation::Mode,
    checkpoint::{
        self, child, escape_scope, norm_field, skeleton_key_remaps, CheckpointSource,
        Checkpointed, ParameterShapes, TrainingState,
    },
    head::{DirectionHeads, DirectionHeadsConfig},
    skeleton::{EncoderDecoder, SkeletonConfig},
};

use super::{run, NetworkInput};

/// Supervised tags network: a four level skeleton followed by independent
/// heads, each predicting a field of unit direction vectors (one per
/// semantic tag).
#[derive(Module, Debug)]
pub struct TagsUNet3d<B: Backend> {
    skeleton: EncoderDecoder<B>,
    head: DirectionHeads<B>,
}

impl<B: Backend> TagsUNet3d<B> {
    /// One unit-normalized field per head, identical in both modes.
    pub fn forward(
        &self,
        input: impl Into<NetworkInput<B>>,
        mode: Mode,
    ) -> crate::Result<Vec<Tensor<B, 5>>> {
        run(&self.skeleton, &self.head, input.into(), mode)
    }

    pub fn skeleton(&self) -> &EncoderDecoder<B> {
        &self.skeleton
    }

    pub fn num_heads(&self) -> usize {
        self.head.len()
    }

    pub fn head(&self) -> &DirectionHeads<B> {
        &self.head
    }

    pub fn load_checkpoint(
        self,
        source: &CheckpointSource,
        device: &B::Device,
    ) -> crate::Result<(Self, TrainingState)> {
        Ok(checkpoint::restore::<B, _>(self, source, device)?)
    }

    pub(crate) fn scoped_key_remaps(&self, scope: &str) -> Vec<(String, String)> {
        let source = escape_scope(scope);
        let norm = norm_field(self.skeleton.layer_order());

        let mut remaps = skeleton_key_remaps(scope, self.skeleton.layer_order());
        remaps.extend([
            (
                format!("^{source}final_heads\\.([0-9]+)\\.conv1\\.(.+)"),
                format!("{scope}head.heads.$1.conv1.conv.$2"),
            ),
            (
                format!("^{source}final_heads\\.([0-9]+)\\.norm1\\.(.+)"),
                format!("{scope}head.heads.$1.conv1.{norm}.$2"),
            ),
            (
                format!("^{source}final_heads\\.([0-9]+)\\.final_conv\\.(.+)"),
                format!("{scope}head.heads.$1.final_conv.$2"),
            ),
        ]);
        remaps
    }
}

impl<B: Backend> ParameterShapes for TagsUNet3d<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.skeleton.parameter_shapes(&child(prefix, "skeleton"), out);
        self.head.parameter_shapes(&child(prefix, "head"), out);
    }
}

impl<B: Backend> Checkpointed<B> for TagsUNet3d<B> {
    fn pytorch_key_remaps(&self) -> Vec<(String, String)> {
        self.scoped_key_remaps("")
    }
}

#[derive(Config, Debug)]
pub struct TagsUNet3dConfig {
    pub in_channels: usize,
    /// Components of each direction vector.
    #[config(default = 3)]
    pub out_channels: usize,
    /// Number of direction fields, one head each.
    #[config(default = 1)]
    pub output_heads: usize,
    #[config(default = "\"crg\".to_string()")]
    pub layer_order: String,
    #[config(default = 32)]
    pub init_channels: usize,
}

impl TagsUNet3dConfig {
    pub fn skeleton(&self) -> SkeletonConfig {
        SkeletonConfig::new(self.in_channels)
            .with_init_channels(self.init_channels)
            .with_layer_order(self.layer_order.clone())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<TagsUNet3d<B>> {
        let skeleton_config = self.skeleton();
        let skeleton = skeleton_config.init(device)?;
        let head = DirectionHeadsConfig::new(
            skeleton.out_channels(),
            self.out_channels,
            self.output_heads,
            skeleton.layer_order().clone(),
            skeleton_config.num_groups(),
        )
        .init(device)?;

        tracing::debug!(
            heads = self.output_heads,
            out_channels = self.out_channels,
            "built direction heads"
        );
        Ok(TagsUNet3d { skeleton, head })
    }
}
