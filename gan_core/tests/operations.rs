use std::sync::Arc;
use std::thread;

use gan_core::{
    batch_norm, conv2d, deconv2d, dense, gate_conv2d, global_sum_pooling_2d, spectral_norm,
    up_sample_2d, Checkpointable, Conv2dConfig, Deconv2dConfig, DenseConfig, FanMode,
    GateConv2dConfig, Initializer, LayerContext, OpsConfig, ParamStore, PadType, Role,
    VarianceScaling,
};
use ndarray::{Array4, ArrayD, Axis, IxDyn};

fn feature_map(shape: (usize, usize, usize, usize)) -> Array4<f32> {
    Array4::from_shape_fn(shape, |(b, y, x, c)| ((b * 13 + y * 5 + x * 3 + c) as f32 * 0.11).sin())
}

#[test]
fn seeded_initializer_is_bit_identical() {
    let init = VarianceScaling::new(2.0, 0.1, FanMode::FanAvg, false, 1234);
    let a = init.sample(&[3, 3, 4, 8]).unwrap();
    let b = init.sample(&[3, 3, 4, 8]).unwrap();
    assert_eq!(a.shape(), &[3, 3, 4, 8]);
    assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));

    // fan_in = 36, fan_out = 72, n = 54; samples stay within 2σ·scale_factor.
    let bound = 2.0 * (1.3 * 2.0 / 54.0f32).sqrt() * 0.1;
    assert!(a.iter().all(|v| v.abs() <= bound + 1e-6));

    let other = init.with_seed(4321).sample(&[3, 3, 4, 8]).unwrap();
    assert_ne!(a, other);
}

#[test]
fn scaled_identity_converges_to_five() {
    let store = ParamStore::new(7);
    let w = ArrayD::from_shape_fn(IxDyn(&[4, 4]), |i| if i[0] == i[1] { 5.0 } else { 0.0 });
    let mut sigma = 0.0;
    for _ in 0..5 {
        sigma = spectral_norm(&store, "w/u", &w, 1).unwrap().sigma;
    }
    assert!((sigma - 5.0).abs() < 1e-3);
    assert_eq!(store.spectral_state("w/u").unwrap().updates, 5);
}

#[test]
fn generator_and_discriminator_share_a_store() {
    let store = ParamStore::new(11);
    let config = OpsConfig::default();
    let ctx = LayerContext::new(&store, &config);

    // generator: dense → reshape → deconv → batch norm → conv
    let z = ArrayD::from_shape_fn(IxDyn(&[2, 16]), |i| (i[0] as f32 - 0.5) * (i[1] as f32 * 0.1));
    let h = dense(&ctx, &z, &DenseConfig::new(4 * 4 * 8), "generator/fc", Role::Generator).unwrap();
    let h = h.into_shape((2, 4, 4, 8)).unwrap();
    let h = deconv2d(&ctx, &h, &Deconv2dConfig::new(4), "generator/deconv0", Role::Generator).unwrap();
    assert_eq!(h.dim(), (2, 8, 8, 4));
    let h = batch_norm(&ctx, &h.into_dyn(), true, "generator/bn0").unwrap();
    let h: Array4<f32> = h.into_dimensionality().unwrap();
    let image = conv2d(
        &ctx,
        &h,
        &Conv2dConfig::new(3).with_kernel(3).with_stride(1).with_pad(1, PadType::Reflect),
        "generator/to_rgb",
        Role::Generator,
    )
    .unwrap();
    assert_eq!(image.dim(), (2, 8, 8, 3));

    // discriminator: conv → gated conv → global sum → dense
    let d = conv2d(&ctx, &image, &Conv2dConfig::new(8), "discriminator/conv0", Role::Discriminator).unwrap();
    let (d, gate) = gate_conv2d(&ctx, &d, &GateConv2dConfig::new(8), "discriminator/gate0", Role::Discriminator)
        .unwrap();
    assert!(gate.iter().all(|&g| (0.0..=1.0).contains(&g)));
    let pooled = global_sum_pooling_2d(&d);
    let logits = dense(&ctx, &pooled.into_dyn(), &DenseConfig::new(1), "discriminator/fc", Role::Discriminator)
        .unwrap();
    assert_eq!(logits.dim(), (2, 1));
    assert!(logits.iter().all(|v| v.is_finite()));

    // Only generator kernels contribute to the regularisation loss.
    let regularized: Vec<String> = store
        .regularization_gradients()
        .unwrap()
        .into_keys()
        .collect();
    assert_eq!(
        regularized,
        vec![
            "generator/deconv0/kernel".to_string(),
            "generator/fc/kernel".to_string(),
            "generator/to_rgb/kernel".to_string(),
        ]
    );
    assert!(store.regularization_loss().unwrap() > 0.0);

    let non_trainable = store.non_trainable_names();
    assert!(non_trainable.contains(&"discriminator/gate0/gate/u".to_string()));
    assert!(!store.trainable_names().iter().any(|name| name.ends_with("/u")));
}

#[test]
fn concurrent_calls_serialise_per_weight() {
    let store = Arc::new(ParamStore::new(3));
    let w = Arc::new(ArrayD::from_shape_fn(IxDyn(&[6, 3]), |i| (i[0] + 2 * i[1]) as f32 * 0.3 + 0.1));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let w = Arc::clone(&w);
            thread::spawn(move || {
                for _ in 0..10 {
                    spectral_norm(&store, "shared/u", &w, 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let state = store.spectral_state("shared/u").unwrap();
    assert_eq!(state.updates, 80);
    let norm = state.u.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
}

#[test]
fn checkpoint_restores_spectral_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let config = OpsConfig::default();
    let x = feature_map((1, 8, 8, 2));

    let store = ParamStore::new(5);
    let ctx = LayerContext::new(&store, &config);
    let before = conv2d(&ctx, &x, &Conv2dConfig::new(4), "disc/c0", Role::Discriminator).unwrap();
    store.save_checkpoint(&path).unwrap();

    let restored = ParamStore::load_checkpoint(&path).unwrap();
    let restored_ctx = LayerContext::new(&restored, &config);
    let next_original = conv2d(&ctx, &x, &Conv2dConfig::new(4), "disc/c0", Role::Discriminator).unwrap();
    let next_restored =
        conv2d(&restored_ctx, &x, &Conv2dConfig::new(4), "disc/c0", Role::Discriminator).unwrap();

    assert_eq!(next_original, next_restored);
    assert_eq!(before.dim(), next_restored.dim());
    assert_eq!(restored.spectral_state("disc/c0/u").unwrap().updates, 2);
}

#[test]
fn resumed_store_starts_new_keys_like_an_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let w = ArrayD::from_shape_fn(IxDyn(&[5, 3]), |i| (i[0] * 3 + i[1]) as f32 * 0.2 - 1.0);

    let store = ParamStore::new(17);
    spectral_norm(&store, "a/u", &w, 1).unwrap();
    store.save_checkpoint(&path).unwrap();
    let resumed = ParamStore::load_checkpoint(&path).unwrap();

    let uninterrupted = spectral_norm(&store, "b/u", &w, 1).unwrap();
    let after_resume = spectral_norm(&resumed, "b/u", &w, 1).unwrap();
    assert_eq!(uninterrupted.u, after_resume.u);
    assert_eq!(uninterrupted.sigma, after_resume.sigma);

    // A store that never saw "a/u" draws the same starting u for "b/u".
    let fresh = ParamStore::new(17);
    assert_eq!(spectral_norm(&fresh, "b/u", &w, 1).unwrap().u, uninterrupted.u);
    assert_ne!(
        resumed.spectral_state("a/u").unwrap().u,
        resumed.spectral_state("b/u").unwrap().u
    );
}

#[test]
fn journal_records_every_spectral_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spectral.jsonl");
    let store = ParamStore::new(5);
    let config = OpsConfig::default();
    let ctx = LayerContext::new(&store, &config);

    let x = feature_map((1, 8, 8, 2));
    let y = conv2d(&ctx, &x, &Conv2dConfig::new(4), "disc/c0", Role::Discriminator).unwrap();
    let y = up_sample_2d(&y, 2).unwrap();
    conv2d(&ctx, &y, &Conv2dConfig::new(2), "disc/c1", Role::Discriminator).unwrap();

    let written = gan_core::append_spectral_journal(&path, 3, &store).unwrap();
    assert_eq!(written, 2);
    let contents = std::fs::read_to_string(&path).unwrap();
    let first: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(first["key"], "disc/c0/u");
    assert_eq!(first["step"], 3);
    assert!(first["sigma"].as_f64().unwrap() > 0.0);
}

#[test]
fn batch_statistics_are_per_channel() {
    let store = ParamStore::new(5);
    let config = OpsConfig::default();
    let ctx = LayerContext::new(&store, &config);

    let x = feature_map((3, 4, 4, 2)).into_dyn() * 10.0 + 4.0;
    let y = batch_norm(&ctx, &x, true, "bn").unwrap();
    let means = y
        .into_shape((3 * 4 * 4, 2))
        .unwrap()
        .mean_axis(Axis(0))
        .unwrap();
    assert!(means.iter().all(|m| m.abs() < 1e-4));
}
