//! Restoring network parameters from training checkpoints.
//!
//! Two layouts are understood: burn's named MessagePack checkpoints written by
//! [`save_checkpoint`] (parameters plus the epoch counter), and PyTorch files
//! whose `model_state_dict` entry holds the parameters of the equivalent
//! sequential PyTorch modules. In both cases every restored parameter shape is
//! checked against the freshly built network before it is handed back.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    nn::{
        conv::{Conv3d, ConvTranspose3d},
        BatchNorm, GroupNorm,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder, RecorderError},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::{error::CheckpointError, layer::LayerOrder};

/// Key of the parameter dictionary inside a PyTorch training checkpoint.
pub const PYTORCH_STATE_KEY: &str = "model_state_dict";

/// Named parameter shapes of a module, used to diagnose checkpoint mismatches.
pub trait ParameterShapes {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>);

    fn shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut out = Vec::new();
        self.parameter_shapes("", &mut out);
        out
    }
}

pub(crate) fn child(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

impl<B: Backend> ParameterShapes for Conv3d<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        out.push((child(prefix, "weight"), self.weight.dims().to_vec()));
        if let Some(bias) = &self.bias {
            out.push((child(prefix, "bias"), bias.dims().to_vec()));
        }
    }
}

impl<B: Backend> ParameterShapes for ConvTranspose3d<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        out.push((child(prefix, "weight"), self.weight.dims().to_vec()));
        if let Some(bias) = &self.bias {
            out.push((child(prefix, "bias"), bias.dims().to_vec()));
        }
    }
}

impl<B: Backend> ParameterShapes for GroupNorm<B> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        if let Some(gamma) = &self.gamma {
            out.push((child(prefix, "gamma"), gamma.dims().to_vec()));
        }
        if let Some(beta) = &self.beta {
            out.push((child(prefix, "beta"), beta.dims().to_vec()));
        }
    }
}

impl<B: Backend> ParameterShapes for BatchNorm<B, 3> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        out.push((child(prefix, "gamma"), self.gamma.dims().to_vec()));
        out.push((child(prefix, "beta"), self.beta.dims().to_vec()));
        out.push((
            child(prefix, "running_mean"),
            self.running_mean.value().dims().to_vec(),
        ));
        out.push((
            child(prefix, "running_var"),
            self.running_var.value().dims().to_vec(),
        ));
    }
}

impl<T: ParameterShapes> ParameterShapes for Vec<T> {
    fn parameter_shapes(&self, prefix: &str, out: &mut Vec<(String, Vec<usize>)>) {
        for (index, item) in self.iter().enumerate() {
            item.parameter_shapes(&child(prefix, &index.to_string()), out);
        }
    }
}

/// A network that can be restored from a checkpoint.
pub trait Checkpointed<B: Backend>: Module<B> + ParameterShapes {
    /// `(pattern, replacement)` pairs renaming PyTorch state-dict keys into
    /// this module's record layout.
    fn pytorch_key_remaps(&self) -> Vec<(String, String)>;
}

/// Training metadata stored next to the parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainingState {
    /// `None` for checkpoints that do not carry an epoch counter (PyTorch imports).
    pub epoch: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CheckpointFormat {
    /// Named MessagePack file written by [`save_checkpoint`].
    Burn,
    /// PyTorch pickle with a `model_state_dict` entry.
    PyTorch,
}

/// Where to read a checkpoint from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CheckpointSource {
    File {
        path: PathBuf,
        format: CheckpointFormat,
    },
    /// Downloaded once into the user cache directory.
    Url {
        url: String,
        format: CheckpointFormat,
    },
}

impl CheckpointSource {
    pub fn burn(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            format: CheckpointFormat::Burn,
        }
    }

    pub fn pytorch(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            format: CheckpointFormat::PyTorch,
        }
    }

    pub fn format(&self) -> CheckpointFormat {
        match self {
            Self::File { format, .. } | Self::Url { format, .. } => *format,
        }
    }

    fn resolve(&self) -> Result<PathBuf, CheckpointError> {
        let path = match self {
            Self::File { path, .. } => path.clone(),
            Self::Url { url, .. } => fetch(url)?,
        };

        let on_disk = match self.format() {
            CheckpointFormat::Burn => path.with_extension("mpk"),
            CheckpointFormat::PyTorch => path.clone(),
        };
        if !on_disk.exists() {
            return Err(CheckpointError::NotFound(on_disk));
        }
        Ok(path)
    }
}

#[cfg(feature = "pretrained")]
fn fetch(url: &str) -> Result<PathBuf, CheckpointError> {
    crate::download(url).map_err(|source| CheckpointError::Download {
        url: url.to_string(),
        source,
    })
}

#[cfg(not(feature = "pretrained"))]
fn fetch(url: &str) -> Result<PathBuf, CheckpointError> {
    Err(CheckpointError::Download {
        url: url.to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "built without the `pretrained` feature",
        ),
    })
}

/// Parameters and epoch of a burn checkpoint.
#[derive(Record)]
pub struct CheckpointRecord<B: Backend, M>
where
    M: Module<B>,
{
    pub model: <M as Module<B>>::Record,
    pub epoch: usize,
}

/// Write `module` and the number of completed epochs to `path` (`.mpk` is appended).
pub fn save_checkpoint<B: Backend, M: Module<B>>(
    module: M,
    epoch: usize,
    path: impl AsRef<Path>,
) -> Result<(), CheckpointError> {
    let path = path.as_ref().to_path_buf();
    let record = CheckpointRecord::<B, M> {
        model: module.into_record(),
        epoch,
    };

    Recorder::<B>::record(
        &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        record,
        path.clone(),
    )
    .map_err(|err| recorder_error(&path, err))?;

    tracing::debug!(path = %path.display(), epoch, "checkpoint written");
    Ok(())
}

/// Load `source` into `module`, checking every parameter against the shapes
/// `module` was built with.
pub fn restore<B: Backend, M: Checkpointed<B>>(
    module: M,
    source: &CheckpointSource,
    device: &B::Device,
) -> Result<(M, TrainingState), CheckpointError> {
    let path = source.resolve()?;
    let expected = module.shapes();

    let (record, state) = match source.format() {
        CheckpointFormat::Burn => {
            let record: CheckpointRecord<B, M> = Recorder::<B>::load(
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
                path.clone(),
                device,
            )
            .map_err(|err| recorder_error(&path, err))?;
            let state = TrainingState {
                epoch: Some(record.epoch),
            };
            (record.model, state)
        }
        CheckpointFormat::PyTorch => {
            let mut args = LoadArgs::new(path.clone()).with_top_level_key(PYTORCH_STATE_KEY);
            for (pattern, replacement) in module.pytorch_key_remaps() {
                args = args.with_key_remap(&pattern, &replacement);
            }
            let record = Recorder::<B>::load(
                &PyTorchFileRecorder::<FullPrecisionSettings>::new(),
                args,
                device,
            )
            .map_err(|err| recorder_error(&path, err))?;
            tracing::warn!(path = %path.display(), "PyTorch checkpoint carries no epoch counter");
            (record, TrainingState::default())
        }
    };

    let restored = module.load_record(record);
    check_shapes(&expected, &restored.shapes())?;

    tracing::info!(path = %path.display(), epoch = ?state.epoch, "restored checkpoint");
    Ok((restored, state))
}

fn check_shapes(
    expected: &[(String, Vec<usize>)],
    actual: &[(String, Vec<usize>)],
) -> Result<(), CheckpointError> {
    let actual: BTreeMap<&str, &Vec<usize>> = actual
        .iter()
        .map(|(name, shape)| (name.as_str(), shape))
        .collect();

    let names: Vec<String> = expected
        .iter()
        .filter(|(name, shape)| actual.get(name.as_str()) != Some(&shape))
        .map(|(name, _)| name.clone())
        .collect();

    if names.is_empty() {
        Ok(())
    } else {
        Err(CheckpointError::ParameterMismatch { names })
    }
}

fn recorder_error(path: &Path, source: RecorderError) -> CheckpointError {
    CheckpointError::Recorder {
        path: path.to_path_buf(),
        source,
    }
}

/// Key remaps for the `skeleton` of a network whose PyTorch keys start with
/// `scope` (empty, or a parent field such as `tags_net.`), from PyTorch's flat
/// `double_conv.conv1` / `double_conv.norm1` naming.
pub(crate) fn skeleton_key_remaps(scope: &str, order: &LayerOrder) -> Vec<(String, String)> {
    let source = escape_scope(scope);
    let norm = norm_field(order);
    let mut remaps = Vec::new();
    for path in ["encoders", "decoders"] {
        remaps.push((
            format!("^{source}{path}\\.([0-9]+)\\.double_conv\\.conv([12])\\.(.+)"),
            format!("{scope}skeleton.{path}.$1.double_conv.conv$2.conv.$3"),
        ));
        remaps.push((
            format!("^{source}{path}\\.([0-9]+)\\.double_conv\\.norm([12])\\.(.+)"),
            format!("{scope}skeleton.{path}.$1.double_conv.conv$2.{norm}.$3"),
        ));
    }
    remaps.push((
        format!("^{source}decoders\\.([0-9]+)\\.upsample\\.(.+)"),
        format!("{scope}skeleton.decoders.$1.upsample.$2"),
    ));
    remaps
}

/// `scope` as a literal regex prefix.
pub(crate) fn escape_scope(scope: &str) -> String {
    scope.replace('.', "\\.")
}

/// Field holding the normalization of a [`SingleConv`](crate::layer::SingleConv).
pub(crate) fn norm_field(order: &LayerOrder) -> &'static str {
    if order.group_norm() {
        "group_norm"
    } else {
        "batch_norm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shapes(entries: &[(&str, &[usize])]) -> Vec<(String, Vec<usize>)> {
        entries
            .iter()
            .map(|(name, shape)| (name.to_string(), shape.to_vec()))
            .collect()
    }

    #[test]
    fn identical_shapes_pass() {
        let a = shapes(&[("conv.weight", &[4, 2, 3, 3, 3]), ("conv.bias", &[4])]);
        assert!(check_shapes(&a, &a).is_ok());
    }

    #[test]
    fn mismatches_are_named() {
        let expected = shapes(&[
            ("conv.weight", &[4, 2, 3, 3, 3]),
            ("conv.bias", &[4]),
            ("norm.gamma", &[4]),
        ]);
        let actual = shapes(&[("conv.weight", &[8, 2, 3, 3, 3]), ("conv.bias", &[4])]);

        match check_shapes(&expected, &actual) {
            Err(CheckpointError::ParameterMismatch { names }) => {
                assert_eq!(names, vec!["conv.weight".to_string(), "norm.gamma".to_string()]);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let source = CheckpointSource::burn("/definitely/not/here/unet");
        assert!(matches!(source.resolve(), Err(CheckpointError::NotFound(_))));

        let source = CheckpointSource::pytorch("/definitely/not/here/unet.pth");
        assert!(matches!(source.resolve(), Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn recorder_failures_keep_their_cause() {
        let err = recorder_error(
            Path::new("unet.mpk"),
            RecorderError::DeserializeError("truncated".to_string()),
        );

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("DeserializeError(\"truncated\")"));
        assert!(err.to_string().contains("unet.mpk"));
    }

    #[test]
    fn remaps_follow_norm_kind() {
        let order: LayerOrder = "cbr".parse().unwrap();
        let remaps = skeleton_key_remaps("", &order);
        assert!(remaps
            .iter()
            .any(|(_, to)| to == "skeleton.encoders.$1.double_conv.conv$2.batch_norm.$3"));
    }

    #[test]
    fn scoped_remaps_match_only_their_scope() {
        let remaps = skeleton_key_remaps("dt_net.", &LayerOrder::default());
        let (pattern, replacement) = &remaps[0];

        assert_eq!(pattern, "^dt_net\\.encoders\\.([0-9]+)\\.double_conv\\.conv([12])\\.(.+)");
        assert_eq!(replacement, "dt_net.skeleton.encoders.$1.double_conv.conv$2.conv.$3");
    }
}
