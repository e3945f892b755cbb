//! cutkit - command-line entry point
//!
//! Subcommands:
//! - `export-shar`: write a cuts manifest and its data as a Shar directory
//! - `describe`: summary statistics of one or more cuts manifests
//!
//! Export defaults come from the configuration file (see
//! `cutkit_common::config`); command-line flags override them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cutkit::cut::Cut;
use cutkit::lazy::LazyJsonl;
use cutkit::shar::{SharWriter, SharWriterOptions, WriterKind};
use cutkit_common::config::TomlConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for cutkit
#[derive(Parser, Debug)]
#[command(name = "cutkit")]
#[command(about = "Cut manifests and sharded exports for audio data")]
#[command(version)]
struct Args {
    /// Configuration file (overrides CUTKIT_CONFIG and the user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides the configured level)
    #[arg(long, global = true, env = "CUTKIT_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export cuts and their data to a Shar directory
    ExportShar {
        /// Cuts manifest (.jsonl or .jsonl.gz)
        manifest: PathBuf,

        /// Output directory
        output_dir: PathBuf,

        /// Exported field as NAME=FORMAT (wav, numpy, deflate, jsonl); repeatable
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, WriterKind)>,

        /// Cuts per shard; 0 disables sharding
        #[arg(long)]
        shard_size: Option<usize>,

        /// Number of the first shard
        #[arg(long)]
        shard_offset: Option<usize>,

        /// Do not write the cuts metadata stream
        #[arg(long)]
        no_cuts: bool,
    },

    /// Print statistics of cuts manifests
    Describe {
        /// Cuts manifests (.jsonl or .jsonl.gz), read in order
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
}

fn parse_field(s: &str) -> std::result::Result<(String, WriterKind), String> {
    let (name, format) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=FORMAT, got '{}'", s))?;
    let kind = format.parse::<WriterKind>().map_err(|e| e.to_string())?;
    Ok((name.to_string(), kind))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    let directive = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("cutkit {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::ExportShar {
            manifest,
            output_dir,
            fields,
            shard_size,
            shard_offset,
            no_cuts,
        } => {
            let mut options = SharWriterOptions::from_config(&output_dir, &config.shar)
                .context("Invalid [shar] configuration")?;
            if !fields.is_empty() {
                options.fields = fields;
            }
            if let Some(size) = shard_size {
                options.shard_size = (size > 0).then_some(size);
            }
            if let Some(offset) = shard_offset {
                options.shard_offset = offset;
            }
            if no_cuts {
                options.include_cuts = false;
            }
            export_shar(&manifest, options)
        }
        Command::Describe { manifests } => describe(manifests),
    }
}

fn export_shar(manifest: &Path, options: SharWriterOptions) -> Result<()> {
    if options.fields.is_empty() {
        warn!("No fields declared; only cut metadata will be exported");
    }
    let cuts = LazyJsonl::<Cut>::open(manifest);
    let output_dir = options.output_dir.clone();

    let paths = SharWriter::scoped(options, |writer| {
        for cut in cuts.iter() {
            writer.write(&cut?)?;
        }
        Ok(writer.output_paths())
    })
    .with_context(|| format!("Failed to export {} to {}", manifest.display(), output_dir.display()))?;

    for (field, shards) in &paths {
        info!("{}: {} shard(s)", field, shards.len());
    }
    println!("Exported to {}", output_dir.display());
    Ok(())
}

#[derive(Debug, Default)]
struct Stats {
    cuts: usize,
    total_duration: f64,
    min_duration: Option<f64>,
    max_duration: Option<f64>,
    variants: BTreeMap<&'static str, usize>,
    supervisions: usize,
    speakers: std::collections::BTreeSet<String>,
    with_recording: usize,
    with_features: usize,
}

impl Stats {
    fn add(&mut self, cut: &Cut) {
        let duration = cut.duration();
        self.cuts += 1;
        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |d| d.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |d| d.max(duration)));
        let variant = match cut {
            Cut::Mono(_) => "MonoCut",
            Cut::Multi(_) => "MultiCut",
            Cut::Padding(_) => "PaddingCut",
            Cut::Mixed(_) => "MixedCut",
        };
        *self.variants.entry(variant).or_default() += 1;
        let supervisions = cut.supervisions();
        self.supervisions += supervisions.len();
        self.speakers
            .extend(supervisions.iter().filter_map(|s| s.speaker.clone()));
        self.with_recording += usize::from(cut.has_recording());
        self.with_features += usize::from(cut.has_features());
    }
}

fn describe(manifests: Vec<PathBuf>) -> Result<()> {
    let cuts = LazyJsonl::<Cut>::from_paths(manifests);
    let mut stats = Stats::default();
    for cut in cuts.iter() {
        stats.add(&cut.context("Failed to read manifest")?);
    }

    println!("Cuts:              {}", stats.cuts);
    println!("Total duration:    {:.2} s ({:.2} h)", stats.total_duration, stats.total_duration / 3600.0);
    if stats.cuts > 0 {
        println!("Mean duration:     {:.3} s", stats.total_duration / stats.cuts as f64);
        println!("Min / max:         {:.3} s / {:.3} s", stats.min_duration.unwrap_or(0.0), stats.max_duration.unwrap_or(0.0));
    }
    for (variant, count) in &stats.variants {
        println!("{:<19}{}", format!("{}:", variant), count);
    }
    println!("Supervisions:      {}", stats.supervisions);
    println!("Speakers:          {}", stats.speakers.len());
    println!("With recording:    {}", stats.with_recording);
    println!("With features:     {}", stats.with_features);
    Ok(())
}
