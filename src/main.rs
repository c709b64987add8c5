use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use brailleocr::{
    labels, report, CorpusLayout, DecodeOptions, Decoder, DecoderBuilder, Detection,
    EvalOptions, Evaluator, LoadOptions, LoadedSample, Report, ReportOptions,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Decode braille detections into text and score them against ground truth.
#[derive(Parser, Debug)]
#[command(name = "brailleocr", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the text read from one detection file
    Decode(DecodeArgs),

    /// Score a directory of predictions against ground-truth labels
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
struct SymbolArgs {
    /// Class names, one per line in class id order, or a YOLO data.yaml
    #[arg(long)]
    names: PathBuf,

    /// JSON object mapping symbol tokens to characters (built-in braille letters if unset)
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Character emitted for unknown symbols
    #[arg(long)]
    unknown: Option<char>,

    /// Normalized vertical tolerance for grouping symbols into lines
    #[arg(long = "line-tol", default_value_t = 0.05)]
    line_tol: f64,

    /// Drop predicted boxes scored below this confidence
    #[arg(long, default_value_t = 0.25)]
    conf: f32,
}

impl SymbolArgs {
    fn decoder(&self) -> Result<Decoder> {
        let mut builder = DecoderBuilder::new().class_names(&self.names);
        if let Some(symbols) = &self.symbols {
            builder = builder.symbol_map(symbols);
        }
        if let Some(unknown) = self.unknown {
            builder = builder.unknown(unknown);
        }
        builder.build().context("Failed to load symbol tables")
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            line_tolerance: self.line_tol,
        }
    }
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[command(flatten)]
    symbols: SymbolArgs,

    /// Detection file (YOLO labels, or pixel boxes when --image is given)
    file: PathBuf,

    /// Image the pixel boxes in FILE belong to
    #[arg(long)]
    image: Option<PathBuf>,

    /// Plain reading order without line grouping
    #[arg(long)]
    flat: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GroundTruthOrder {
    /// Sort by y then x, no separators
    Flat,
    /// Same line grouping as predictions
    Lines,
}

impl From<GroundTruthOrder> for brailleocr::GroundTruthOrder {
    fn from(order: GroundTruthOrder) -> Self {
        match order {
            GroundTruthOrder::Flat => Self::Flat,
            GroundTruthOrder::Lines => Self::Lines,
        }
    }
}

#[derive(Args, Debug)]
struct EvalArgs {
    #[command(flatten)]
    symbols: SymbolArgs,

    /// Directory of ground-truth YOLO label files
    #[arg(long)]
    labels: PathBuf,

    /// Directory of predicted detection files, named like the label files.
    /// Predictions without a label file are scored against empty text
    #[arg(long)]
    predictions: PathBuf,

    /// Predictions are pixel boxes belonging to the images in this directory,
    /// and every image is a sample
    #[arg(long)]
    images: Option<PathBuf>,

    #[arg(long = "gt-order", value_enum, default_value_t = GroundTruthOrder::Flat)]
    gt_order: GroundTruthOrder,

    /// Where the text report is written
    #[arg(long, default_value = "runs/eval_translation_report.txt")]
    save: PathBuf,

    /// Optional per-sample CSV
    #[arg(long, conflicts_with = "parallel")]
    csv: Option<PathBuf>,

    #[arg(long = "top-confusions", default_value_t = 30)]
    top_confusions: usize,

    #[arg(long, default_value_t = 20)]
    worst: usize,

    /// Score samples on all cores
    #[arg(long)]
    parallel: bool,
}

fn read_detections(
    decoder: &Decoder,
    file: &Path,
    image: Option<&Path>,
    min_confidence: f32,
) -> brailleocr::Result<Vec<Detection>> {
    let boxes = match image {
        Some(image) => labels::read_pixel_boxes(file, image)?,
        None => labels::read_yolo_labels(file)?,
    };
    Ok(decoder.detections(&labels::above_confidence(boxes, min_confidence)))
}

fn decode(args: DecodeArgs) -> Result<()> {
    let decoder = args.symbols.decoder()?;
    let detections = read_detections(
        &decoder,
        &args.file,
        args.image.as_deref(),
        args.symbols.conf,
    )
    .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let text = if args.flat {
        decoder.read_flat(&detections)
    } else {
        decoder.decode(&detections, args.symbols.decode_options())
    };
    println!("{text}");
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|it| !it.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn eval(args: EvalArgs) -> Result<()> {
    let decoder = args.symbols.decoder()?;
    let evaluator = Evaluator::new(EvalOptions {
        worst_examples: args.worst,
    });

    let mut layout = CorpusLayout::new(&args.labels, &args.predictions);
    if let Some(images) = &args.images {
        layout = layout.images(images);
    }
    let options = LoadOptions {
        decode: args.symbols.decode_options(),
        gt_order: args.gt_order.into(),
        min_confidence: args.symbols.conf,
    };
    let ids = layout.sample_ids().context("Failed to list evaluation samples")?;
    let loaded = ids.iter().map(|id| layout.load(&decoder, options, id));

    let metrics = if args.parallel {
        evaluator.evaluate_corpus_par(loaded.map(|it| it.sample).collect())
    } else {
        let mut csv = match &args.csv {
            Some(path) => {
                create_parent(path)?;
                let file = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                let mut writer = BufWriter::new(file);
                writeln!(writer, "{}", report::CSV_HEADER)?;
                Some(writer)
            }
            None => None,
        };
        let mut metrics = evaluator.metrics();
        for LoadedSample { sample, detail } in loaded {
            let score = evaluator.accumulate(&mut metrics, sample);
            if let (Some(writer), Some(score)) = (csv.as_mut(), score) {
                writeln!(writer, "{}", report::csv_row(&score, &detail))?;
            }
        }
        if let Some(mut writer) = csv {
            writer.flush()?;
        }
        metrics
    };

    let report = Report::new(
        &metrics,
        ids.len(),
        ReportOptions {
            top_confusions: args.top_confusions,
            worst_examples: args.worst,
        },
    )
    .to_string();
    create_parent(&args.save)?;
    fs::write(&args.save, &report)
        .with_context(|| format!("Failed to write {}", args.save.display()))?;
    println!("{report}");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Commands::Decode(args) => decode(args),
        Commands::Eval(args) => eval(args),
    }
}
