//! Volumetric pooling and resizing.
//!
//! burn provides 1D and 2D pooling and interpolation only, so the 3D versions
//! used by the encoder and decoder stages are composed from padding, reshapes
//! and reductions.

use burn::prelude::*;

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PoolKind {
    Max,
    Avg,
}

/// Pool `x` with a `kernel`-sized window, stride equal to the kernel, and
/// `padding` voxels added on both sides of every spatial axis.
///
/// Max pooling pads with negative infinity. Average pooling pads with zeros and
/// counts the padded voxels in the window.
pub fn pool3d<B: Backend>(
    x: Tensor<B, 5>,
    kind: PoolKind,
    kernel: [usize; 3],
    padding: usize,
) -> Tensor<B, 5> {
    let fill = match kind {
        PoolKind::Max => f32::NEG_INFINITY,
        PoolKind::Avg => 0.0,
    };

    let mut x = x;
    for axis in 0..3 {
        x = pad_axis(x, 2 + axis, padding, fill);
    }

    let [n, c, d, h, w] = x.dims();
    let [kd, kh, kw] = kernel;
    let [od, oh, ow] = [d / kd, h / kh, w / kw];

    // Drop the trailing voxels that do not fill a whole window.
    let x = x
        .narrow(2, 0, od * kd)
        .narrow(3, 0, oh * kh)
        .narrow(4, 0, ow * kw);

    // One axis at a time, each window axis moved to dim 3 of a rank-5 view.
    let x = reduce_window(x.reshape([n, c, od, kd, oh * kh * ow * kw]), kind);
    let x = reduce_window(x.reshape([n, c * od, oh, kh, ow * kw]), kind);
    let x = reduce_window(x.reshape([n, c * od * oh, ow, kw, 1]), kind);

    x.reshape([n, c, od, oh, ow])
}

fn reduce_window<B: Backend>(x: Tensor<B, 5>, kind: PoolKind) -> Tensor<B, 5> {
    match kind {
        PoolKind::Max => x.max_dim(3),
        PoolKind::Avg => x.mean_dim(3),
    }
}

/// Spatial size produced by [`pool3d`] for an input of spatial size `dims`.
pub fn pooled_size(dims: [usize; 3], kernel: [usize; 3], padding: usize) -> [usize; 3] {
    let mut out = [0; 3];
    for axis in 0..3 {
        out[axis] = (dims[axis] + 2 * padding - kernel[axis]) / kernel[axis] + 1;
    }
    out
}

/// Nearest-neighbour resize of the spatial axes to `size`.
///
/// The source voxel for output index `i` along an axis of length `len` is
/// `floor(i * len / size)`.
pub fn resize_nearest3d<B: Backend>(x: Tensor<B, 5>, size: [usize; 3]) -> Tensor<B, 5> {
    let dims = x.dims();
    let device = x.device();

    let mut x = x;
    for axis in 0..3 {
        let len = dims[2 + axis];
        let target = size[axis];
        if len == target {
            continue;
        }

        let indices: Vec<i64> = (0..target).map(|i| (i * len / target) as i64).collect();
        let indices = Tensor::<B, 1, Int>::from_data(TensorData::new(indices, [target]), &device);
        x = x.select(2 + axis, indices);
    }
    x
}

/// Spatial `[D, H, W]` part of a feature map's shape.
pub fn spatial_dims<B: Backend>(x: &Tensor<B, 5>) -> [usize; 3] {
    let [_, _, d, h, w] = x.dims();
    [d, h, w]
}

fn pad_axis<B: Backend>(x: Tensor<B, 5>, axis: usize, amount: usize, fill: f32) -> Tensor<B, 5> {
    if amount == 0 {
        return x;
    }

    let mut shape = x.dims();
    shape[axis] = amount;
    let border = Tensor::<B, 5>::full(shape, fill, &x.device());

    Tensor::cat(vec![border.clone(), x, border], axis)
}
