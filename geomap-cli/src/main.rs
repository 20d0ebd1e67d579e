// Geomap Command Line Interface
// Region embeddings for map images from the terminal

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use geomap_eye::{GeomapConfig, GeomapPipeline, RegionEmbedding};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "geomap")]
#[command(about = "Segment map images and embed every detected region", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short, global = true, env = "GEOMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed every region of one or more images
    Embed {
        /// Images to process
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Write masked and re-encoded crops into this directory
        #[arg(long)]
        dump_crops: Option<PathBuf>,
    },

    /// Print the detections found in an image
    Detect {
        image: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One JSON document for all images
    Json,
    /// One JSON object per region and line
    Jsonl,
}

#[derive(Serialize)]
struct ImageEmbeddings {
    image: PathBuf,
    regions: Vec<RegionEmbedding>,
}

#[derive(Serialize)]
struct RegionLine<'a> {
    image: &'a Path,
    #[serde(flatten)]
    region: &'a RegionEmbedding,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref(), cli.verbose, cli.log_json);

    let config = load_config(cli.config.as_deref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Embed {
            images,
            format,
            dump_crops,
        } => {
            let mut pipeline =
                GeomapPipeline::from_config(&config).context("Failed to load models")?;
            if let Some(dir) = dump_crops {
                pipeline = pipeline.with_crop_dump(dir);
            }
            info!("Embedding dimension: {}", pipeline.embedding_dim());

            let mut results = Vec::with_capacity(images.len());
            for image in images {
                info!("Processing {:?}", image);
                let regions = pipeline
                    .analyze(&image)
                    .with_context(|| format!("Failed to embed {}", image.display()))?;
                results.push(ImageEmbeddings { image, regions });
            }
            write_embeddings(&mut out, &results, format)?;
        }
        Commands::Detect { image } => {
            let mut pipeline =
                GeomapPipeline::from_config(&config).context("Failed to load models")?;
            let detections = pipeline
                .detect(&image)
                .with_context(|| format!("Failed to segment {}", image.display()))?;
            serde_json::to_writer_pretty(&mut out, &detections)?;
            writeln!(out)?;
        }
        Commands::Config => {
            write!(out, "{}", config.to_toml_string()?)?;
        }
    }

    Ok(())
}

fn init_logging(log_level: Option<&str>, verbose: bool, json: bool) {
    let filter = match (log_level, verbose) {
        (Some(level), _) => EnvFilter::new(level),
        (None, true) => EnvFilter::new("debug"),
        (None, false) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<GeomapConfig> {
    match path {
        Some(path) => {
            debug!("Loading configuration from {:?}", path);
            GeomapConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(GeomapConfig::default()),
    }
}

fn write_embeddings(
    out: &mut impl Write,
    results: &[ImageEmbeddings],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, results)?;
            writeln!(out)?;
        }
        OutputFormat::Jsonl => {
            for result in results {
                for region in &result.regions {
                    let line = RegionLine {
                        image: &result.image,
                        region,
                    };
                    serde_json::to_writer(&mut *out, &line)?;
                    writeln!(out)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomap_eye::BoundingBox;

    fn region(index: usize) -> RegionEmbedding {
        RegionEmbedding {
            index,
            bbox: BoundingBox::new(1, 2, 3, 4),
            class_id: 5,
            confidence: 0.5,
            embedding: vec![0.25, -1.0],
        }
    }

    #[test]
    fn test_parse_embed() {
        let cli = Cli::try_parse_from([
            "geomap", "embed", "a.png", "b.png", "--format", "jsonl", "--dump-crops", "out",
        ])
        .unwrap();
        match cli.command {
            Commands::Embed {
                images,
                format,
                dump_crops,
            } => {
                assert_eq!(images, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);
                assert_eq!(format, OutputFormat::Jsonl);
                assert_eq!(dump_crops, Some(PathBuf::from("out")));
            }
            _ => panic!("expected embed"),
        }
    }

    #[test]
    fn test_embed_requires_images() {
        assert!(Cli::try_parse_from(["geomap", "embed"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["geomap", "config", "--verbose", "--config", "g.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("g.toml")));
    }

    #[test]
    fn test_default_config_without_path() {
        assert_eq!(load_config(None).unwrap(), GeomapConfig::default());
    }

    #[test]
    fn test_write_jsonl() {
        let results = vec![ImageEmbeddings {
            image: PathBuf::from("map.png"),
            regions: vec![region(0), region(1)],
        }];
        let mut buf = Vec::new();
        write_embeddings(&mut buf, &results, OutputFormat::Jsonl).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["image"], "map.png");
        assert_eq!(value["index"], 1);
        assert_eq!(value["bbox"]["width"], 3);
    }

    #[test]
    fn test_write_json() {
        let results = vec![ImageEmbeddings {
            image: PathBuf::from("map.png"),
            regions: vec![region(0)],
        }];
        let mut buf = Vec::new();
        write_embeddings(&mut buf, &results, OutputFormat::Json).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value[0]["regions"][0]["embedding"][0], 0.25);
    }
}
