use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use segment_volume::{
    ColorSource, Colormap, Encoding, MaskLoader, NrrdImage, SegmentationExporter,
    read_segments,
};

#[derive(Parser)]
#[command(version, about = "Pack binary structure masks into a Slicer segmentation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write NIfTI masks as one multi-layer .seg.nrrd file
    Export {
        /// Mask files, or a single directory of .nii/.nii.gz masks
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        /// Continuous color scale: rainbow, jet or gray
        #[arg(long, default_value = "rainbow")]
        colormap: Colormap,
        /// JSON object mapping structure names to [r, g, b] or [r, g, b, a]
        #[arg(long, conflicts_with = "colormap")]
        colors: Option<PathBuf>,
        /// File name prefix removed from structure names
        #[arg(long)]
        prefix: Option<String>,
        /// Write the pixel data uncompressed
        #[arg(long)]
        raw: bool,
    },
    /// Print the layers and segments stored in a .seg.nrrd file
    Inspect { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Export {
            inputs,
            output,
            colormap,
            colors,
            prefix,
            raw,
        } => {
            let source = color_source(colormap, colors.as_deref())?;
            let encoding = if raw { Encoding::Raw } else { Encoding::Gzip };
            export(&inputs, &output, source, encoding, prefix.as_deref())
        }
        Commands::Inspect { path } => inspect(&path),
    }
}

fn export(
    inputs: &[PathBuf],
    output: &Path,
    color_source: ColorSource,
    encoding: Encoding,
    prefix: Option<&str>,
) -> anyhow::Result<()> {
    let masks = match inputs {
        [dir] if dir.is_dir() => MaskLoader::load_from_directory(dir, prefix)
            .with_context(|| format!("loading masks from {}", dir.display()))?,
        paths => MaskLoader::load_from_file_paths(paths, prefix).context("loading masks")?,
    };
    info!("Loaded {} masks", masks.len());

    let segments = SegmentationExporter::new(color_source)
        .with_encoding(encoding)
        .export(&masks, output)
        .with_context(|| format!("exporting to {}", output.display()))?;

    for segment in &segments {
        info!(
            "{}: layer {}, label {}",
            segment.record.name, segment.record.layer, segment.record.label_value
        );
    }

    Ok(())
}

/// `--colors` replaces the colormap when given
fn color_source(colormap: Colormap, colors: Option<&Path>) -> anyhow::Result<ColorSource> {
    let Some(path) = colors else {
        return Ok(ColorSource::Continuous(colormap));
    };
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    ColorSource::from_json_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let image = NrrdImage::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (depth, height, width, layers) = image.data.dim();
    println!("{width} x {height} x {depth} voxels, {layers} layers");
    println!(
        "spacing {:?}, origin {:?}",
        image.geometry.spacing, image.geometry.origin
    );

    for (index, segment) in read_segments(&image)?.iter().enumerate() {
        let record = &segment.record;
        let voxels = if record.layer < layers {
            image
                .data
                .index_axis(ndarray::Axis(3), record.layer)
                .iter()
                .filter(|&&value| value == record.label_value)
                .count()
        } else {
            0
        };
        println!(
            "Segment{index} {:<24} layer {} label {:>3} color {} ({voxels} voxels)",
            record.name,
            record.layer,
            record.label_value,
            segment.color.to_segment_string()
        );
    }

    Ok(())
}
