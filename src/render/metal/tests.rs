use super::{types, MetalFrameBackend};
use std::sync::{Mutex, MutexGuard, Once, OnceLock};

use rand::{Rng, SeedableRng};

use crate::{
    camera::{look_at_target, Camera},
    compute::ComputeContext,
    convert::GaussianStore,
    math::Vec3,
    render::{BlendMode, DepthImage, FrameConfig, FrameParams, FramePipeline},
    splat::Gaussian,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

static ENV_INIT: Once = Once::new();
static TEST_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

fn test_guard() -> MutexGuard<'static, ()> {
    let mutex = TEST_MUTEX.get_or_init(|| Mutex::new(()));
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn init_metal_validation_env() {
    ENV_INIT.call_once(|| {
        std::env::set_var("MTL_DEBUG_LAYER", "1");
        std::env::set_var("MTL_SHADER_VALIDATION", "1");
    });
}

fn setup_metal_test() -> Option<MutexGuard<'static, ()>> {
    let guard = test_guard();
    init_metal_validation_env();

    if metal::Device::system_default().is_none() {
        eprintln!("Skipping Metal test: no system-default Metal device.");
        return None;
    }

    Some(guard)
}

fn make_test_camera() -> Camera {
    let mut camera = Camera::new(Vec3::new(0.4, 0.8, 5.0), 0.0, 0.0);
    look_at_target(&mut camera, Vec3::zeros());
    camera
}

fn frame_params<'a>(camera: &Camera, depth: Option<&'a DepthImage>) -> FrameParams<'a> {
    FrameParams {
        view: camera.view_matrix(),
        projection: camera.projection_matrix(WIDTH as usize, HEIGHT as usize),
        viewport: [WIDTH, HEIGHT],
        depth,
    }
}

fn seeded_store(count: usize, seed: u64, spread: f32) -> GaussianStore {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let gaussians = (0..count)
        .map(|_| {
            let s = rng.random_range(0.01_f32..0.05_f32).ln();
            Gaussian {
                position: [
                    rng.random_range(-spread..spread),
                    rng.random_range(-spread..spread),
                    rng.random_range(-spread..spread),
                ],
                scale: [s, s, s - 3.0],
                rotation: crate::math::quat_normalize([
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ]),
                opacity: rng.random_range(0.2_f32..1.0_f32),
                ..Gaussian::default()
            }
        })
        .collect();
    GaussianStore::from_gaussians(gaussians)
}

#[test]
fn test_struct_sizes() {
    assert_eq!(std::mem::size_of::<Gaussian>(), 76);
    assert_eq!(std::mem::size_of::<types::GpuViewData>(), 220);
}

#[test]
fn test_metal_backend_creation() {
    let Some(_guard) = setup_metal_test() else {
        return;
    };

    let backend = MetalFrameBackend::new(1024).expect("metal backend should initialize");
    assert!(!backend.is_ready());
    assert!(!backend.is_disabled());
}

#[test]
fn test_upload_rejects_oversized_store() {
    let Some(_guard) = setup_metal_test() else {
        return;
    };

    let mut backend = MetalFrameBackend::new(8).expect("metal backend should initialize");
    assert!(backend.upload_store(&seeded_store(9, 1, 1.0)).is_err());
    backend.upload_store(&seeded_store(8, 1, 1.0)).expect("upload should fit");
    assert!(backend.is_ready());
}

#[test]
fn test_empty_store_frame() {
    let Some(_guard) = setup_metal_test() else {
        return;
    };

    let mut backend = MetalFrameBackend::new(1).expect("metal backend should initialize");
    backend.upload_store(&GaussianStore::default()).expect("empty upload");
    let camera = make_test_camera();
    let stats = backend
        .run_frame(&frame_params(&camera, None), &FrameConfig::default())
        .expect("empty frame should succeed");
    assert_eq!(stats.visible, 0);
    assert_eq!(stats.indirect.instance_count, 0);
    assert!(backend.sorted_transforms().is_empty());
}

#[test]
fn test_frame_matches_cpu() {
    let Some(_guard) = setup_metal_test() else {
        return;
    };

    let store = seeded_store(20_000, 42, 1.6);
    let camera = make_test_camera();
    let params = frame_params(&camera, None);

    for blend in [BlendMode::Over, BlendMode::Under] {
        let config = FrameConfig {
            blend,
            ..FrameConfig::default()
        };

        let ctx = ComputeContext::new(Some(4)).unwrap();
        let mut cpu = FramePipeline::new(config).unwrap();
        let cpu_stats = cpu.run(&ctx, &store, &params).unwrap();

        let mut backend = MetalFrameBackend::new(store.len()).expect("metal backend");
        backend.upload_store(&store).expect("upload");
        let gpu_stats = backend.run_frame(&params, &config).expect("metal frame");

        // Float differences may flip a handful of borderline culls.
        let diff = cpu_stats.visible.abs_diff(gpu_stats.visible);
        assert!(diff <= cpu_stats.visible / 200 + 2, "cpu {cpu_stats:?} gpu {gpu_stats:?}");
        assert_eq!(gpu_stats.indirect.instance_count as usize, gpu_stats.visible);
        assert_eq!(gpu_stats.indirect.index_count, 6);

        let keys = backend.sorted_keys();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        let mut seen = vec![false; store.len()];
        for t in backend.sorted_transforms() {
            let i = t.source_index as usize;
            assert!(!seen[i], "source {i} gathered twice");
            seen[i] = true;
        }

        let depths: Vec<f32> = backend
            .sorted_transforms()
            .iter()
            .map(|t| camera.world_to_view(store.gaussians()[t.source_index as usize].position()).z)
            .collect();
        match blend {
            BlendMode::Over => assert!(depths.windows(2).all(|w| w[0] >= w[1] - 1e-4)),
            BlendMode::Under => assert!(depths.windows(2).all(|w| w[0] <= w[1] + 1e-4)),
        }
    }
}

#[test]
fn test_depth_image_hides_everything() {
    let Some(_guard) = setup_metal_test() else {
        return;
    };

    let store = seeded_store(2_000, 9, 0.5);
    let camera = make_test_camera();
    let depth = DepthImage::filled(WIDTH, HEIGHT, 0.0).unwrap();
    let config = FrameConfig {
        depth_test: true,
        ..FrameConfig::default()
    };

    let mut backend = MetalFrameBackend::new(store.len()).expect("metal backend");
    backend.upload_store(&store).expect("upload");
    let stats = backend
        .run_frame(&frame_params(&camera, Some(&depth)), &config)
        .expect("metal frame");
    assert_eq!(stats.visible, 0);

    assert!(backend.run_frame(&frame_params(&camera, None), &config).is_err());
}

#[test]
fn test_repeated_frames_are_stable() {
    let Some(_guard) = setup_metal_test() else {
        return;
    };

    let store = seeded_store(5_000, 7, 1.6);
    let camera = make_test_camera();
    let params = frame_params(&camera, None);
    let config = FrameConfig::default();

    let mut backend = MetalFrameBackend::new(store.len()).expect("metal backend");
    backend.upload_store(&store).expect("upload");
    let first = backend.run_frame(&params, &config).expect("first frame");
    let first_keys = backend.sorted_keys().to_vec();
    let second = backend.run_frame(&params, &config).expect("second frame");
    assert_eq!(first.visible, second.visible);
    assert_eq!(first_keys, backend.sorted_keys());
}
