use burn::{
    backend::{Autodiff, NdArray},
    tensor::{Distribution, Tensor},
};
use unet3d_burn::{
    error::ShapeMismatchError, skeleton::SkeletonConfig, DistanceTransformUNet3dConfig, Error,
    FinalActivation, Mode, TagsUNet3dConfig, UNet3dConfig,
};

type B = NdArray;

#[test]
fn unet_on_a_64_cube() {
    let device = Default::default();
    let net = UNet3dConfig::new(
        SkeletonConfig::new(1).with_init_channels(4),
        2,
        FinalActivation::Softmax,
    )
    .init::<B>(&device)
    .unwrap();
    let x = Tensor::<B, 5>::zeros([1, 1, 64, 64, 64], &device);

    let y = net.forward(x, Mode::Eval).unwrap();
    assert_eq!(y.dims(), [1, 2, 64, 64, 64]);
}

#[test]
fn standard_unet_channel_plan() {
    let net = UNet3dConfig::standard(1, 2, FinalActivation::Softmax)
        .init::<B>(&Default::default())
        .unwrap();
    let skeleton = net.skeleton();

    let encoder_channels: Vec<_> = skeleton
        .encoders()
        .iter()
        .map(|stage| stage.out_channels())
        .collect();
    assert_eq!(encoder_channels, [64, 128, 256, 512]);

    let decoder_channels: Vec<_> = skeleton
        .decoders()
        .iter()
        .map(|stage| (stage.block().in_channels(), stage.out_channels()))
        .collect();
    assert_eq!(decoder_channels, [(768, 256), (384, 128), (192, 64)]);
}

#[test]
fn inferred_mode_switches_the_activation() {
    let device = Default::default();
    let net = UNet3dConfig::new(
        SkeletonConfig::new(1).with_init_channels(4).with_depth(2),
        3,
        FinalActivation::Softmax,
    )
    .init::<Autodiff<B>>(&device)
    .unwrap();
    let x = Tensor::<Autodiff<B>, 5>::random([1, 1, 8, 8, 8], Distribution::Normal(0.0, 1.0), &device);

    let train = net.forward(x.clone(), Mode::infer::<Autodiff<B>>()).unwrap();
    let eval = net.forward(x, Mode::infer::<B>()).unwrap();

    burn::tensor::activation::softmax(train, 1)
        .into_data()
        .assert_approx_eq(&eval.into_data(), 5);
}

#[test]
fn indivisible_input_is_rejected() {
    let device = Default::default();
    let net = TagsUNet3dConfig::new(1)
        .with_init_channels(4)
        .init::<B>(&device)
        .unwrap();
    let x = Tensor::<B, 5>::zeros([1, 1, 8, 8, 12], &device);

    assert!(matches!(
        net.forward(x, Mode::Eval),
        Err(Error::ShapeMismatch(ShapeMismatchError::Indivisible { .. }))
    ));
}

#[test]
fn distance_transform_consumes_tag_fields() {
    let device = Default::default();
    let tags = TagsUNet3dConfig::new(2)
        .with_output_heads(2)
        .with_init_channels(4)
        .init::<B>(&device)
        .unwrap();
    let dt = DistanceTransformUNet3dConfig::new(6, 1, FinalActivation::Sigmoid)
        .with_init_channels(4)
        .init::<B>(&device)
        .unwrap();
    let x = Tensor::<B, 5>::random([2, 2, 16, 16, 8], Distribution::Default, &device);

    let fields = tags.forward(x, Mode::Eval).unwrap();
    let distance = dt.forward(fields, Mode::Eval).unwrap();

    assert_eq!(distance.dims(), [2, 1, 16, 16, 8]);
    assert!(distance.clone().min().into_scalar() >= 0.0);
    assert!(distance.max().into_scalar() <= 1.0);
}
