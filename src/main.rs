use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use meshsplat::camera::{orbit, Camera};
use meshsplat::convert::{convert_meshes, ConversionConfig, ThinAxis};
use meshsplat::demo;
use meshsplat::math::Vec3;
use meshsplat::ply::{write_ply_file, PlyFormat};
use meshsplat::render::{BlendMode, FrameConfig, FrameParams, FramePipeline, FrameStats};
use meshsplat::{ComputeContext, GaussianStore, Mesh, Result};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Shape {
    Quad,
    Cube,
    Sphere,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Blend {
    Over,
    Under,
}

#[derive(Debug, Parser)]
#[command(
    name = "meshsplat",
    version,
    about = "Convert a textured mesh into depth-sorted 3D Gaussian splats"
)]
struct Cli {
    #[arg(long, value_enum, default_value_t = Shape::Cube, help = "Built-in demo mesh")]
    shape: Shape,
    #[arg(long, value_name = "N", default_value_t = 512, help = "UV raster resolution")]
    resolution: u32,
    #[arg(long, value_name = "S", default_value_t = 1.0, help = "Splat footprint in texels")]
    sigma: f32,
    #[arg(
        long,
        value_name = "EPS",
        help = "Fixed thin-axis standard deviation instead of a fraction of the minor axis"
    )]
    thin_epsilon: Option<f32>,
    #[arg(
        long,
        value_name = "CODE",
        default_value_t = 0,
        help = "PLY layout: 0 = pbr, 1 = 3dgs, 2 = compressed pbr"
    )]
    format: u32,
    #[arg(long, short, value_name = "FILE", help = "Write the converted splats as PLY")]
    output: Option<PathBuf>,
    #[arg(long, value_name = "K", default_value_t = 0, help = "Orbit frames to run")]
    frames: u32,
    #[arg(
        long,
        value_name = "R",
        default_value_t = 1.0,
        help = "Multiplier on every splat's standard deviations"
    )]
    render_scale: f32,
    #[arg(
        long,
        value_name = "WxH",
        default_value = "1280x720",
        value_parser = parse_viewport,
        help = "Viewport size in pixels"
    )]
    viewport: [u32; 2],
    #[arg(long, value_enum, default_value_t = Blend::Over, help = "Compositing order")]
    blend: Blend,
    #[arg(long, help = "Disable frustum culling")]
    no_cull: bool,
    #[arg(long, value_name = "T", help = "Worker threads (defaults to all cores)")]
    threads: Option<usize>,
    #[cfg(feature = "metal")]
    #[arg(long, help = "Run frames on the Metal backend")]
    metal: bool,
}

fn demo_mesh(shape: Shape) -> Result<Mesh> {
    match shape {
        Shape::Quad => demo::quad_mesh(),
        Shape::Cube => demo::cube_mesh(),
        Shape::Sphere => demo::sphere_mesh(48, 24),
    }
}

fn parse_viewport(text: &str) -> std::result::Result<[u32; 2], String> {
    let (w, h) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{text}'"))?;
    let parse = |v: &str| match v.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("viewport sides must be positive integers, got '{text}'")),
    };
    Ok([parse(w)?, parse(h)?])
}

fn frame_config(cli: &Cli) -> Result<FrameConfig> {
    let config = FrameConfig {
        std_dev_scale: cli.render_scale,
        blend: match cli.blend {
            Blend::Over => BlendMode::Over,
            Blend::Under => BlendMode::Under,
        },
        frustum_cull: !cli.no_cull,
        ..FrameConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn log_frame(frame: u32, stats: &FrameStats, started: Instant) {
    log::info!(
        "frame {frame}: {} / {} visible, {} instances ({:.2} ms)",
        stats.visible,
        stats.submitted,
        stats.indirect.instance_count,
        started.elapsed().as_secs_f64() * 1e3
    );
}

fn run_cpu_frames(
    ctx: &ComputeContext,
    store: &GaussianStore,
    config: FrameConfig,
    frames: u32,
    viewport: [u32; 2],
) -> Result<()> {
    let mut pipeline = FramePipeline::new(config)?;
    let mut camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), 0.0, 0.0);
    for frame in 0..frames {
        let angle = frame as f32 / frames.max(1) as f32 * std::f32::consts::TAU;
        orbit(&mut camera, Vec3::zeros(), angle, 3.0, 1.0);
        let params = FrameParams {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(viewport[0] as usize, viewport[1] as usize),
            viewport,
            depth: None,
        };
        let started = Instant::now();
        let stats = pipeline.run(ctx, store, &params)?;
        log_frame(frame, &stats, started);
    }
    Ok(())
}

#[cfg(feature = "metal")]
fn run_metal_frames(
    store: &GaussianStore,
    config: FrameConfig,
    frames: u32,
    viewport: [u32; 2],
) -> Result<()> {
    use meshsplat::render::metal::MetalFrameBackend;

    let mut backend = MetalFrameBackend::new(store.len())?;
    backend.upload_store(store)?;
    let mut camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), 0.0, 0.0);
    for frame in 0..frames {
        let angle = frame as f32 / frames.max(1) as f32 * std::f32::consts::TAU;
        orbit(&mut camera, Vec3::zeros(), angle, 3.0, 1.0);
        let params = FrameParams {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(viewport[0] as usize, viewport[1] as usize),
            viewport,
            depth: None,
        };
        let started = Instant::now();
        let stats = backend.run_frame(&params, &config)?;
        log_frame(frame, &stats, started);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let format = PlyFormat::from_code(cli.format)?;
    let conversion = ConversionConfig {
        resolution: cli.resolution,
        sigma_texels: cli.sigma,
        thin_axis: cli
            .thin_epsilon
            .map_or_else(ThinAxis::default, ThinAxis::Epsilon),
        ..ConversionConfig::default()
    };
    let frame_config = frame_config(&cli)?;
    let viewport = cli.viewport;

    let ctx = ComputeContext::new(cli.threads)?;
    let mesh = demo_mesh(cli.shape)?;

    let started = Instant::now();
    let (store, report) = convert_meshes(&ctx, std::slice::from_ref(&mesh), &conversion)?;
    log::info!(
        "converted {:?} mesh: {} gaussians from {} triangles in {:.1} ms",
        cli.shape,
        report.emitted,
        report.triangles,
        started.elapsed().as_secs_f64() * 1e3
    );

    if cli.frames > 0 {
        #[cfg(feature = "metal")]
        let ran_on_gpu = if cli.metal {
            match run_metal_frames(&store, frame_config, cli.frames, viewport) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("Metal frames failed: {err}. Falling back to CPU.");
                    false
                }
            }
        } else {
            false
        };
        #[cfg(not(feature = "metal"))]
        let ran_on_gpu = false;

        if !ran_on_gpu {
            run_cpu_frames(&ctx, &store, frame_config, cli.frames, viewport)?;
        }
    }

    if let Some(path) = cli.output.as_deref() {
        write_ply_file(path, store.gaussians(), format)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("meshsplat").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn render_scale_sets_std_dev_multiplier() {
        let cli = parse(&["--render-scale", "2.5"]);
        assert_eq!(frame_config(&cli).unwrap().std_dev_scale, 2.5);
        assert_eq!(cli.viewport, [1280, 720]);

        assert_eq!(frame_config(&parse(&[])).unwrap().std_dev_scale, 1.0);
        assert!(frame_config(&parse(&["--render-scale", "0"])).is_err());
    }

    #[test]
    fn viewport_flag_parses_sizes() {
        assert_eq!(parse(&["--viewport", "640x480"]).viewport, [640, 480]);
        assert!(parse_viewport("640").is_err());
        assert!(parse_viewport("0x480").is_err());
        assert!(parse_viewport("wide x tall").is_err());
    }
}
