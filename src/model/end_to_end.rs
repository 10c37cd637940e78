use burn::prelude::*;

use crate::{
    activation::Mode,
    checkpoint::{self, child, CheckpointSource, Checkpointed, ParameterShapes, TrainingState},
    error::ConfigurationError,
};

use super::{
    DistanceTransformUNet3d, DistanceTransformUNet3dConfig, NetworkInput, TagsUNet3d,
    TagsUNet3dConfig,
};

/// A [`TagsUNet3d`] whose direction fields feed a [`DistanceTransformUNet3d`].
#[derive(Module, Debug)]
pub struct EndToEndUNet3d<B: Backend> {
    tags_net: TagsUNet3d<B>,
    dt_net: DistanceTransformUNet3d<B>,
}

impl<B: Backend> EndToEndUNet3d<B> {
    /// `mode` governs both networks; only the distance-transform output is
    /// affected by it.
    pub fn forward(&self, input: impl Into<NetworkInput<B>>, mode: Mode) -> crate::Result<Tensor<B, 5>> {
        let fields = self.tags_net.forward(input, mode)?;
        self.dt_net.forward(fields, mode)
    }

    pub fn tags_net(&self) -> &TagsUNet3d<B> {
        &self.tags_net
    }

    pub fn dt_net(&self) -> &DistanceTransformUNet3d<B> {
        &self.dt_net
    }

    /// Restore both networks from one checkpoint of the whole pipeline.
    pub fn load_checkpoint(
        self,
        source: &CheckpointSource,
        device: &B::Device,
    ) -> crate::Result<(Self, TrainingState)> {
        Ok(checkpoint::restore::<B, _>(self, source, device)?)
    }
}

impl<B: Backend> ParameterShapes for EndToEndUNet3d<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        self.tags_net.parameter_shapes(&child(prefix, "tags_net"), out);
        self.dt_net.parameter_shapes(&child(prefix, "dt_net"), out);
    }
}

impl<B: Backend> Checkpointed<B> for EndToEndUNet3d<B> {
    fn pytorch_key_remaps(&self) -> Vec<(String, String)> {
        let mut remaps = self.tags_net.scoped_key_remaps("tags_net.");
        remaps.extend(self.dt_net.scoped_key_remaps("dt_net."));
        remaps
    }
}

/// Both sub-networks, each optionally restored from its own pre-trained
/// checkpoint while the pipeline is assembled.
#[derive(Config, Debug)]
pub struct EndToEndUNet3dConfig {
    pub tags: TagsUNet3dConfig,
    pub distance_transform: DistanceTransformUNet3dConfig,
    pub tags_checkpoint: Option<CheckpointSource>,
    pub distance_transform_checkpoint: Option<CheckpointSource>,
}

impl EndToEndUNet3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<EndToEndUNet3d<B>> {
        let produced = self.tags.out_channels * self.tags.output_heads;
        let expected = self.distance_transform.in_channels;
        if produced != expected {
            return Err(ConfigurationError::PipelineChannels { produced, expected }.into());
        }

        let mut tags_net = self.tags.init(device)?;
        if let Some(source) = &self.tags_checkpoint {
            let (restored, state) = tags_net.load_checkpoint(source, device)?;
            tracing::info!(epoch = ?state.epoch, "loaded pre-trained tags network");
            tags_net = restored;
        }

        let mut dt_net = self.distance_transform.init(device)?;
        if let Some(source) = &self.distance_transform_checkpoint {
            let (restored, state) = dt_net.load_checkpoint(source, device)?;
            tracing::info!(epoch = ?state.epoch, "loaded pre-trained distance-transform network");
            dt_net = restored;
        }

        Ok(EndToEndUNet3d { tags_net, dt_net })
    }
}
