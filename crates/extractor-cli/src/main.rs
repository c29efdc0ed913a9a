use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use extractor_contracts::events::EventWriter;
use extractor_contracts::runs::session::{
    DetectionSession, EVENTS_FILE, PASS_SUMMARY_FILE, RESULTS_FILE, SESSION_FILE,
};
use extractor_contracts::runs::summary::write_pass_summary;
use extractor_contracts::{ImageSize, Quality, ResultCollection, SelectionSet};
use extractor_engine::{
    EventReporter, ExtractorConfig, ExtractorEngine, Materialize, Reporter,
};
use image::DynamicImage;
use serde_json::{json, Map, Value};

const DRYRUN_VISION_MODEL: &str = "dryrun-vision-1";
const DRYRUN_EDIT_MODEL: &str = "dryrun-edit-1";

#[derive(Debug, Parser)]
#[command(
    name = "object-extractor",
    version,
    about = "Detect objects in an image and render each one as an isolated cut-out"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Detect(DetectArgs),
    Select(SelectArgs),
    Generate(GenerateArgs),
    List(ListArgs),
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct DetectArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct SelectArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, conflicts_with = "none")]
    all: bool,
    #[arg(long)]
    none: bool,
    #[arg(long, value_delimiter = ',')]
    add: Vec<usize>,
    #[arg(long, value_delimiter = ',')]
    remove: Vec<usize>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = Quality::default())]
    quality: Quality,
    #[arg(long, default_value_t = ImageSize::default())]
    size: ImageSize,
    #[arg(long)]
    edit_model: Option<String>,
    /// Drop results from earlier passes before generating.
    #[arg(long)]
    fresh: bool,
    #[arg(long)]
    delay_ms: Option<u64>,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct ListArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    dest: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("object-extractor error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Detect(args) => run_detect(args, ExtractorConfig::from_env()?),
        Command::Select(args) => run_select(args),
        Command::Generate(args) => run_generate(args, ExtractorConfig::from_env()?),
        Command::List(args) => run_list(args),
        Command::Export(args) => run_export(args, ExtractorConfig::from_env()?),
    }
}

fn run_detect(args: DetectArgs, mut config: ExtractorConfig) -> Result<i32> {
    if args.dryrun {
        use_dryrun_models(&mut config);
    } else if args.vision_model.is_some() {
        config.vision_model = args.vision_model.clone();
    }
    let engine = ExtractorEngine::new(&config)?;
    let image = load_source_image(&args.image)?;

    let mut session = DetectionSession::new(
        &args.image,
        engine.vision_model().name.clone(),
        Vec::new(),
    );
    let reporter = event_reporter(&args.out, &session.session_id);

    let descriptors = engine.detect(&image, &reporter);
    session.selection = SelectionSet::new(descriptors.len());
    session.descriptors = descriptors;
    session.save(&args.out.join(SESSION_FILE))?;

    if session.descriptors.is_empty() {
        println!("No objects detected.");
    } else {
        print_descriptors(&session);
    }
    Ok(0)
}

fn run_select(args: SelectArgs) -> Result<i32> {
    let path = args.out.join(SESSION_FILE);
    let mut session = DetectionSession::load(&path)?;
    if args.all {
        session.selection.select_all();
    }
    if args.none {
        session.selection.deselect_all();
    }
    for index in &args.add {
        session.selection.select(*index)?;
    }
    for index in &args.remove {
        session.selection.deselect(*index)?;
    }
    session.save(&path)?;
    print_descriptors(&session);
    Ok(0)
}

fn run_generate(args: GenerateArgs, mut config: ExtractorConfig) -> Result<i32> {
    if args.dryrun {
        use_dryrun_models(&mut config);
    } else if args.edit_model.is_some() {
        config.edit_model = args.edit_model.clone();
    }
    if let Some(delay_ms) = args.delay_ms {
        config.item_delay = Duration::from_millis(delay_ms);
    }

    let session = DetectionSession::load(&args.out.join(SESSION_FILE))?;
    let selected = session.selected_descriptors();
    if selected.is_empty() {
        eprintln!("No objects selected; use `select` first.");
    }
    let engine = ExtractorEngine::new(&config)?;
    let image = load_source_image(&session.source_image)?;
    let reporter = event_reporter(&args.out, &session.session_id);

    let results_path = args.out.join(RESULTS_FILE);
    let mut results = if args.fresh {
        ResultCollection::new()
    } else {
        ResultCollection::load(&results_path)?
    };
    let report = engine.generate(
        &mut results,
        &image,
        &selected,
        args.quality,
        args.size,
        &reporter,
        None,
    )?;
    results.save(&results_path)?;

    let mut extra = Map::new();
    extra.insert(
        "session_id".to_string(),
        Value::String(session.session_id.clone()),
    );
    extra.insert(
        "edit_model".to_string(),
        Value::String(engine.edit_model().name.clone()),
    );
    write_pass_summary(
        &args.out.join(PASS_SUMMARY_FILE),
        &report.to_summary(args.quality, args.size),
        Some(&extra),
    )?;

    println!(
        "Generated {}/{} objects ({} stored).",
        report.succeeded.len(),
        report.requested,
        results.len()
    );
    Ok(if report.failed.is_empty() { 0 } else { 2 })
}

fn run_list(args: ListArgs) -> Result<i32> {
    let session = DetectionSession::load(&args.out.join(SESSION_FILE))?;
    print_descriptors(&session);
    let results = ResultCollection::load(&args.out.join(RESULTS_FILE))?;
    if results.is_empty() {
        println!("No generated results.");
    }
    for (key, reference) in results.iter() {
        println!("{key}\t{}", reference.kind());
    }
    Ok(0)
}

fn run_export(args: ExportArgs, config: ExtractorConfig) -> Result<i32> {
    let results = ResultCollection::load(&args.out.join(RESULTS_FILE))?;
    if results.is_empty() {
        bail!("no generated results in {}", args.out.display());
    }
    let session_id = DetectionSession::load(&args.out.join(SESSION_FILE))
        .map(|session| session.session_id)
        .unwrap_or_else(|_| "export".to_string());
    let reporter = event_reporter(&args.out, &session_id);
    let http = config.http_client()?;

    fs::create_dir_all(&args.dest)
        .with_context(|| format!("failed creating {}", args.dest.display()))?;
    let mut written = Vec::new();
    for (key, reference) in results.iter() {
        let bytes = match reference.materialize(&http) {
            Ok(bytes) => bytes,
            Err(err) => {
                reporter.error(&err);
                reporter.warning(&format!("skipped export of '{key}'"));
                continue;
            }
        };
        let path = args.dest.join(export_file_name(key));
        fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
        written.push(path);
    }

    reporter.record(
        "export_finished",
        payload_map(json!({
            "dest": args.dest.to_string_lossy(),
            "written": written.len(),
            "skipped": results.len() - written.len(),
        })),
    );
    println!("Exported {} of {} to {}", written.len(), results.len(), args.dest.display());
    Ok(if written.len() == results.len() { 0 } else { 2 })
}

/// Both models go offline; the engine resolves both even when only one is used.
fn use_dryrun_models(config: &mut ExtractorConfig) {
    config.vision_model = Some(DRYRUN_VISION_MODEL.to_string());
    config.edit_model = Some(DRYRUN_EDIT_MODEL.to_string());
}

fn load_source_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed reading image {}", path.display()))
}

fn event_reporter(out: &Path, session_id: &str) -> EventReporter {
    EventReporter::new(EventWriter::new(out.join(EVENTS_FILE), session_id))
}

fn print_descriptors(session: &DetectionSession) {
    for (index, descriptor) in session.descriptors.iter().enumerate() {
        let mark = if session.selection.is_selected(index) {
            "x"
        } else {
            " "
        };
        println!(
            "[{mark}] {index}: {} ({})",
            descriptor.display_label(),
            descriptor.composite_key()
        );
    }
}

fn export_file_name(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    format!("{stem}.png")
}

fn payload_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
