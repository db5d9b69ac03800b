#![recursion_limit = "256"]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use burn::backend::{Autodiff, NdArray, Wgpu};
use burn::tensor::backend::AutodiffBackend;
use image::RgbImage;

use impasto::colors::transfer_colors;
use impasto::io::{fit_within, load_image, rescale, save_image, to_image, to_tensor};
use impasto::perceptual::{
    default_content_layers, default_style_layers, FeatureExtractor, LayerId, LayerKind,
};
use impasto::serve::{serve, ServeConfig};
use impasto::stylize::{StylizeConfig, Stylizer};
use impasto::{gpu, weights, StyleResult};

#[derive(Parser)]
#[command(
    name = "impasto",
    version,
    about = "Neural style transfer: repaint one image with the textures of another"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transfer the style of one image onto another
    Run {
        /// Content image (fixes the output's layout)
        #[arg(long)]
        content: PathBuf,
        /// Style image (provides the textures)
        #[arg(long)]
        style: PathBuf,
        /// Output image path
        #[arg(long)]
        out: PathBuf,
        /// Bound on the long edge of the content image (omit to keep full size)
        #[arg(long)]
        size: Option<u32>,
        /// Extra scale factor applied to the style image
        #[arg(long, default_value = "1.0")]
        scale: f32,
        /// Weight of the style term relative to content
        #[arg(long, default_value = "1.0")]
        ratio: f64,
        /// Optimizer iterations
        #[arg(long, default_value = "15")]
        iterations: usize,
        /// Suppress progress lines
        #[arg(long)]
        quiet: bool,
        /// Re-impose the content image's colors on the result
        #[arg(long)]
        preserve_colors: bool,
        /// Comma-separated style layers (default: relu1_1,relu2_1,relu3_1,relu4_1,relu5_1)
        #[arg(long, value_name = "LAYERS")]
        style_layers: Option<String>,
        /// Comma-separated content layers (default: relu3_2)
        #[arg(long, value_name = "LAYERS")]
        content_layers: Option<String>,
        /// VGG19 weights file (default: $IMPASTO_VGG19, then ~/.impasto, then bundled)
        #[arg(long, value_name = "PATH")]
        weights: Option<PathBuf>,
        /// Compute device: auto, cpu, or gpu
        #[arg(long, default_value = "auto")]
        device: String,
    },
    /// Serve the browser form over HTTP
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:8000")]
        addr: String,
        /// Ratio used when a request leaves it blank
        #[arg(long, default_value = "10.0")]
        ratio: f64,
        /// Optimizer iterations per request
        #[arg(long, default_value = "15")]
        iterations: usize,
        /// VGG19 weights file (default: $IMPASTO_VGG19, then ~/.impasto, then bundled)
        #[arg(long, value_name = "PATH")]
        weights: Option<PathBuf>,
        /// Compute device: auto, cpu, or gpu
        #[arg(long, default_value = "auto")]
        device: String,
    },
    /// List the capturable VGG19 stages
    Layers,
    /// Show which weights file would be used and its hash
    Weights {
        /// Inspect this file instead of walking the search path
        #[arg(long, value_name = "PATH")]
        weights: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            content,
            style,
            out,
            size,
            scale,
            ratio,
            iterations,
            quiet,
            preserve_colors,
            style_layers,
            content_layers,
            weights,
            device,
        } => cmd_run(
            TransferJob {
                content,
                style,
                out,
                size,
                scale,
                ratio,
                iterations,
                quiet,
                preserve_colors,
                style_layers: parse_layers(style_layers.as_deref()),
                content_layers: parse_layers(content_layers.as_deref()),
                weights,
            },
            &device,
        ),
        Command::Serve {
            addr,
            ratio,
            iterations,
            weights,
            device,
        } => cmd_serve(addr, ratio, iterations, weights, &device),
        Command::Layers => cmd_layers(),
        Command::Weights { weights } => cmd_weights(weights),
    }
}

// --- impasto run ---

/// Everything one transfer needs, minus the backend choice.
struct TransferJob {
    content: PathBuf,
    style: PathBuf,
    out: PathBuf,
    size: Option<u32>,
    scale: f32,
    ratio: f64,
    iterations: usize,
    quiet: bool,
    preserve_colors: bool,
    style_layers: Option<Vec<LayerId>>,
    content_layers: Option<Vec<LayerId>>,
    weights: Option<PathBuf>,
}

fn cmd_run(job: TransferJob, device: &str) {
    let outcome = match resolve_device(device) {
        DeviceChoice::Gpu(info) => {
            eprintln!("device: gpu ({}, {})", info.api, info.name);
            run_on::<Autodiff<Wgpu>>(&Default::default(), &job)
        }
        DeviceChoice::Cpu => {
            eprintln!("device: cpu (ndarray)");
            run_on::<Autodiff<NdArray>>(&Default::default(), &job)
        }
    };

    if let Err(e) = outcome {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run_on<B: AutodiffBackend>(device: &B::Device, job: &TransferJob) -> StyleResult<()> {
    let (content, style) = prepare_images(
        load_image(&job.content)?,
        load_image(&job.style)?,
        job.size,
        job.scale,
    );

    if !job.quiet {
        eprintln!(
            "content {}x{}, style {}x{}, ratio {}",
            content.width(),
            content.height(),
            style.width(),
            style.height(),
            job.ratio
        );
    }

    let stack = weights::load_stack::<B>(device, job.weights.as_deref())?;
    let mut stylizer = Stylizer::new(
        FeatureExtractor::new(stack, &[]),
        StylizeConfig {
            iterations: job.iterations,
            quiet: job.quiet,
            ..StylizeConfig::default()
        },
    );

    let content_t = to_tensor::<B>(&content, device);
    let style_t = to_tensor::<B>(&style, device);
    let (result, report) = stylizer.run_with_layers(
        content_t,
        style_t,
        job.ratio,
        job.style_layers.as_deref(),
        job.content_layers.as_deref(),
    )?;

    let mut out_img = to_image(result)?;
    if job.preserve_colors {
        out_img = transfer_colors(&content, &out_img);
    }
    save_image(&out_img, &job.out)?;

    eprintln!(
        "done: loss {:.5} -> {:.5} over {} evaluations, wrote {}",
        report.initial_loss().unwrap_or(f32::NAN),
        report.final_loss,
        report.evaluations,
        job.out.display()
    );
    Ok(())
}

/// Working images for one transfer. `--size` bounds the content only;
/// the style keeps its source size, scaled by `--scale`.
fn prepare_images(
    content: RgbImage,
    style: RgbImage,
    size: Option<u32>,
    scale: f32,
) -> (RgbImage, RgbImage) {
    (fit_within(&content, size.unwrap_or(0)), rescale(&style, scale))
}

// --- impasto serve ---

fn cmd_serve(addr: String, ratio: f64, iterations: usize, weights: Option<PathBuf>, device: &str) {
    let config = ServeConfig {
        addr,
        default_ratio: ratio,
    };

    match resolve_device(device) {
        DeviceChoice::Gpu(info) => {
            eprintln!("device: gpu ({}, {})", info.api, info.name);
            serve_on::<Autodiff<Wgpu>>(&Default::default(), config, iterations, weights.as_deref())
        }
        DeviceChoice::Cpu => {
            eprintln!("device: cpu (ndarray)");
            serve_on::<Autodiff<NdArray>>(
                &Default::default(),
                config,
                iterations,
                weights.as_deref(),
            )
        }
    }
}

fn serve_on<B>(
    device: &B::Device,
    config: ServeConfig,
    iterations: usize,
    weights_path: Option<&Path>,
) where
    B: AutodiffBackend,
    Stylizer<B>: Send + 'static,
{
    let stack = match weights::load_stack::<B>(device, weights_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    let stylizer = Stylizer::new(
        FeatureExtractor::new(stack, &[]),
        StylizeConfig {
            iterations,
            ..StylizeConfig::default()
        },
    );

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    if let Err(e) = rt.block_on(serve(stylizer, config)) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

// --- impasto layers ---

fn cmd_layers() {
    let style = default_style_layers();
    let content = default_content_layers();

    for (depth, layer) in LayerId::all().enumerate() {
        let kind = match layer.kind() {
            LayerKind::Conv => "conv",
            LayerKind::Relu => "relu",
            LayerKind::Pool => "pool",
        };
        let role = if style.contains(&layer) {
            "  (style default)"
        } else if content.contains(&layer) {
            "  (content default)"
        } else {
            ""
        };
        println!(
            "{:>2}  {:<10} {}  {:>3} ch{}",
            depth,
            layer.name(),
            kind,
            layer.channels(),
            role
        );
    }
}

// --- impasto weights ---

fn cmd_weights(explicit: Option<PathBuf>) {
    let path = match weights::resolve(explicit.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    println!("{}", path.display());
    println!(
        "  {} bytes (expected {})",
        bytes,
        weights::expected_len() * 4
    );
    match weights::hash_file(&path) {
        Ok(hash) => println!("  blake3 {}", hash),
        Err(e) => {
            eprintln!("error: cannot hash '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

// --- Helpers ---

enum DeviceChoice {
    Cpu,
    Gpu(gpu::GpuInfo),
}

fn resolve_device(name: &str) -> DeviceChoice {
    match name {
        "cpu" => DeviceChoice::Cpu,
        "gpu" => match gpu::probe() {
            Some(info) => DeviceChoice::Gpu(info),
            None => {
                eprintln!("error: no usable GPU adapter found");
                process::exit(1);
            }
        },
        "auto" => match gpu::probe() {
            Some(info) => DeviceChoice::Gpu(info),
            None => DeviceChoice::Cpu,
        },
        other => {
            eprintln!("error: unknown device '{}' (expected auto, cpu, or gpu)", other);
            process::exit(1);
        }
    }
}

fn parse_layers(text: Option<&str>) -> Option<Vec<LayerId>> {
    let text = text?;
    match LayerId::parse_list(text) {
        Ok(layers) if layers.is_empty() => {
            eprintln!("error: empty layer list '{}'", text);
            process::exit(1);
        }
        Ok(layers) => Some(layers),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
