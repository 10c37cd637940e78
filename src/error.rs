//! Error types for network assembly, forward passes and checkpoint restore.

use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(#[from] ShapeMismatchError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Invalid network configuration, detected while the network is built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("layer order '{order}' has no convolution ('c')")]
    MissingConvolution { order: String },

    #[error("layer order '{order}' has no activation ('r')")]
    MissingActivation { order: String },

    #[error("layer order '{order}' starts with the activation; ReLU cannot be the first operation")]
    LeadingActivation { order: String },

    #[error("unsupported layer type '{token}' in layer order '{order}', must be one of 'c', 'r', 'g', 'b'")]
    UnsupportedToken { token: char, order: String },

    #[error("layer type '{token}' appears more than once in layer order '{order}'")]
    DuplicateToken { token: char, order: String },

    #[error("group norm must come after the convolution in layer order '{order}'")]
    GroupNormBeforeConvolution { order: String },

    #[error("{channels} channels cannot be split into {groups} normalization groups")]
    IndivisibleGroups { channels: usize, groups: usize },

    #[error("{what} must be non-zero")]
    Zero { what: &'static str },

    #[error("pooling padding {padding} exceeds half of kernel {kernel:?}")]
    PoolPadding { kernel: [usize; 3], padding: usize },

    #[error("transposed-convolution upsampling needs a 2x2x2 pool kernel and zero pool padding, got kernel {kernel:?} and padding {padding}")]
    TransposedUpsampling { kernel: [usize; 3], padding: usize },

    #[error("the tags network produces {produced} channels but the distance-transform network expects {expected}")]
    PipelineChannels { produced: usize, expected: usize },
}

/// Tensor dimensions incompatible with the assembled network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeMismatchError {
    #[error("{stage}: expected {expected} input channels, got {actual}")]
    Channels {
        stage: String,
        expected: usize,
        actual: usize,
    },

    #[error("{stage}: expected spatial size {expected:?}, got {actual:?}")]
    Spatial {
        stage: String,
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("input batch size {actual} differs from {expected}")]
    Batch { expected: usize, actual: usize },

    #[error("input spatial size {dims:?} is not divisible by {factor:?}")]
    Indivisible { dims: [usize; 3], factor: [usize; 3] },

    #[error("network input holds no tensors")]
    EmptyInput,
}

/// Failure to restore network parameters.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint file {0} does not exist")]
    NotFound(PathBuf),

    #[error("could not read or write checkpoint {path}: {source}")]
    Recorder {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },

    #[error("checkpoint parameters do not match the network: {}", names.join(", "))]
    ParameterMismatch { names: Vec<String> },

    #[error("could not download checkpoint {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

impl ShapeMismatchError {
    pub(crate) fn channels(stage: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::Channels {
            stage: stage.into(),
            expected,
            actual,
        }
    }

    pub(crate) fn spatial(stage: impl Into<String>, expected: [usize; 3], actual: [usize; 3]) -> Self {
        Self::Spatial {
            stage: stage.into(),
            expected,
            actual,
        }
    }
}
