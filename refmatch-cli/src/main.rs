use clap::Parser;
use refmatch::capture::{CaptureRegion, FrameCapture, FRAME_HEIGHT, FRAME_WIDTH};
use refmatch::image::io::{decode_image, load_gray_image, owned_from_dynamic_image, save_image};
use refmatch::render::{render_outcome, RenderMode};
use refmatch::{
    extractor_for, CandidateReport, DetectorKind, ExtractOptions, MatchCountSource, PassOutcome,
    PipelineConfig, Preprocess, Reference, ReferenceMatcher, ReferenceSet, Thresholds, Verdict,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "RefMatch CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Task {
    #[default]
    Detect,
    Align,
    Capture,
    Infer,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum DetectorConfig {
    Orb,
    Brisk,
    Akaze,
    Sift,
}

impl From<DetectorConfig> for DetectorKind {
    fn from(value: DetectorConfig) -> Self {
        match value {
            DetectorConfig::Orb => DetectorKind::Orb,
            DetectorConfig::Brisk => DetectorKind::Brisk,
            DetectorConfig::Akaze => DetectorKind::Akaze,
            DetectorConfig::Sift => DetectorKind::Sift,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum MatchCountConfig {
    GoodMatches,
    Inliers,
}

impl From<MatchCountConfig> for MatchCountSource {
    fn from(value: MatchCountConfig) -> Self {
        match value {
            MatchCountConfig::GoodMatches => MatchCountSource::GoodMatches,
            MatchCountConfig::Inliers => MatchCountSource::Inliers,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PipelineConfigJson {
    ratio: f32,
    min_matches: usize,
    min_area: f64,
    ransac_threshold: f64,
    ransac_max_iters: usize,
    ransac_confidence: f64,
    ransac_seed: u64,
    match_count: MatchCountConfig,
    equalize: bool,
    blur: bool,
    working_width: Option<usize>,
    parallel: bool,
}

impl Default for PipelineConfigJson {
    fn default() -> Self {
        let cfg = PipelineConfig::default();
        let pre = Preprocess::default();
        Self {
            ratio: cfg.ratio,
            min_matches: cfg.thresholds.min_matches,
            min_area: cfg.thresholds.min_area,
            ransac_threshold: cfg.ransac_threshold,
            ransac_max_iters: cfg.ransac_max_iters,
            ransac_confidence: cfg.ransac_confidence,
            ransac_seed: cfg.ransac_seed,
            match_count: MatchCountConfig::GoodMatches,
            equalize: pre.equalize,
            blur: pre.blur,
            working_width: None,
            parallel: cfg.parallel,
        }
    }
}

impl From<&PipelineConfigJson> for PipelineConfig {
    fn from(value: &PipelineConfigJson) -> Self {
        let preprocess = if value.equalize || value.blur {
            Some(Preprocess {
                equalize: value.equalize,
                blur: value.blur,
            })
        } else {
            None
        };
        PipelineConfig {
            ratio: value.ratio,
            thresholds: Thresholds {
                min_matches: value.min_matches,
                min_area: value.min_area,
            },
            ransac_threshold: value.ransac_threshold,
            ransac_max_iters: value.ransac_max_iters,
            ransac_confidence: value.ransac_confidence,
            ransac_seed: value.ransac_seed,
            match_count: value.match_count.into(),
            extract: ExtractOptions {
                preprocess,
                working_width: value.working_width,
            },
            parallel: value.parallel,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CaptureConfigJson {
    width_fraction: f64,
    aspect: [usize; 2],
    jpeg_quality: u8,
}

impl Default for CaptureConfigJson {
    fn default() -> Self {
        Self {
            width_fraction: 0.8,
            aspect: [16, 10],
            jpeg_quality: 90,
        }
    }
}

#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct InferConfigJson {
    model_path: String,
    threshold: f32,
    input_size: usize,
}

impl Default for InferConfigJson {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            threshold: 0.5,
            input_size: 640,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceJson {
    name: Option<String>,
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    task: Task,
    frame_path: String,
    references: Vec<ReferenceJson>,
    detector: DetectorConfig,
    fallback: Option<DetectorConfig>,
    /// JSON report destination; stdout when absent.
    output_path: Option<String>,
    /// Rendered image destination.
    render_path: Option<String>,
    pipeline: PipelineConfigJson,
    capture: CaptureConfigJson,
    infer: InferConfigJson,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task: Task::Detect,
            frame_path: String::new(),
            references: Vec::new(),
            detector: DetectorConfig::Orb,
            fallback: None,
            output_path: None,
            render_path: None,
            pipeline: PipelineConfigJson::default(),
            capture: CaptureConfigJson::default(),
            infer: InferConfigJson::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CandidateRecord {
    reference: String,
    detector: &'static str,
    good_matches: usize,
    inliers: usize,
    match_count: usize,
    area: f64,
    verdict: String,
}

#[derive(Debug, Serialize)]
struct BestRecord {
    reference: String,
    detector: &'static str,
    match_count: usize,
    inliers: usize,
    area: f64,
    /// Frame to reference, row-major.
    homography: [[f64; 3]; 3],
    corners: [[f64; 2]; 4],
}

#[derive(Debug, Serialize)]
struct MatchOutput {
    best: Option<BestRecord>,
    used_fallback: bool,
    candidates: Vec<CandidateRecord>,
}

#[derive(Debug, Serialize)]
struct CaptureOutput {
    region: [usize; 4],
    bytes: usize,
}

#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
#[derive(Debug, Serialize)]
struct InferOutput {
    detected: bool,
    class_id: Option<usize>,
    confidence: Option<f32>,
    display_box: Option<[f32; 4]>,
    inside: Option<bool>,
}

fn verdict_label(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Kept => "kept".to_string(),
        Verdict::Superseded => "superseded".to_string(),
        Verdict::Rejected(reason) => format!("rejected: {reason}"),
    }
}

fn reference_name(set: &ReferenceSet, id: usize) -> String {
    set.get(id)
        .map(|r| r.name().to_string())
        .unwrap_or_else(|_| format!("#{id}"))
}

fn candidate_record(set: &ReferenceSet, report: &CandidateReport) -> CandidateRecord {
    CandidateRecord {
        reference: reference_name(set, report.reference_id),
        detector: report.detector.name(),
        good_matches: report.good_matches,
        inliers: report.inliers,
        match_count: report.match_count,
        area: report.area,
        verdict: verdict_label(&report.verdict),
    }
}

fn match_output(set: &ReferenceSet, outcome: &PassOutcome) -> MatchOutput {
    MatchOutput {
        best: outcome.best.as_ref().map(|b| BestRecord {
            reference: reference_name(set, b.reference_id),
            detector: b.detector.name(),
            match_count: b.match_count,
            inliers: b.inliers,
            area: b.area,
            homography: b.homography.to_row_major(),
            corners: b.corners,
        }),
        used_fallback: outcome.used_fallback,
        candidates: outcome
            .reports
            .iter()
            .map(|r| candidate_record(set, r))
            .collect(),
    }
}

fn load_references(refs: &[ReferenceJson]) -> Result<ReferenceSet, Box<dyn std::error::Error>> {
    let mut out = Vec::with_capacity(refs.len());
    for r in refs {
        let image = load_gray_image(&r.path)?;
        let name = r.name.clone().unwrap_or_else(|| {
            Path::new(&r.path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| r.path.clone())
        });
        out.push(Reference::new(name, image));
    }
    Ok(ReferenceSet::new(out)?)
}

/// Message shown when no reference qualified; nothing is rendered then.
fn unmatched_warning(outcome: &PassOutcome) -> Option<&'static str> {
    outcome
        .best
        .is_none()
        .then_some("no acceptable reference found, nothing rendered")
}

fn run_match(
    config: &Config,
    frame: &image::DynamicImage,
) -> Result<String, Box<dyn std::error::Error>> {
    if config.references.is_empty() {
        return Err("references must list at least one image".into());
    }
    let references = load_references(&config.references)?;
    let gray = owned_from_dynamic_image(frame)?;

    let mut matcher = ReferenceMatcher::new(references, extractor_for(config.detector.into()))
        .with_config(PipelineConfig::from(&config.pipeline));
    if let Some(fallback) = config.fallback {
        matcher = matcher.with_fallback(extractor_for(fallback.into()));
    }
    let outcome = matcher.evaluate(gray.view())?;
    tracing::info!(
        kept = outcome.best.is_some(),
        candidates = outcome.reports.len(),
        "pass finished"
    );

    if let Some(warning) = unmatched_warning(&outcome) {
        tracing::warn!("{warning}");
        eprintln!("warning: {warning}");
    } else if let Some(path) = &config.render_path {
        let mode = if config.task == Task::Align {
            RenderMode::Aligned
        } else {
            RenderMode::BoundingBox
        };
        if let Some(img) = render_outcome(&frame.to_rgb8(), &outcome, mode) {
            save_image(&image::DynamicImage::ImageRgb8(img), path)?;
        }
    }
    Ok(serde_json::to_string_pretty(&match_output(
        matcher.references(),
        &outcome,
    ))?)
}

fn run_capture(
    config: &Config,
    frame: &image::DynamicImage,
) -> Result<String, Box<dyn std::error::Error>> {
    let [aw, ah] = config.capture.aspect;
    let region = CaptureRegion::centered(
        FRAME_WIDTH,
        FRAME_HEIGHT,
        config.capture.width_fraction,
        (aw, ah),
    )?;
    let capture = FrameCapture::new(FRAME_WIDTH, FRAME_HEIGHT, region)?;
    let jpeg = capture.capture_jpeg(frame, config.capture.jpeg_quality)?;
    if let Some(path) = &config.render_path {
        fs::write(path, &jpeg)?;
    }
    Ok(serde_json::to_string_pretty(&CaptureOutput {
        region: [region.x, region.y, region.width, region.height],
        bytes: jpeg.len(),
    })?)
}

#[cfg(feature = "onnx")]
fn run_infer(
    config: &Config,
    frame: &image::DynamicImage,
) -> Result<String, Box<dyn std::error::Error>> {
    use refmatch::detect::onnx::OnnxDetector;
    use refmatch::DetectionConfig;

    if config.infer.model_path.is_empty() {
        return Err("infer.model_path must be set for the infer task".into());
    }
    let det_cfg = DetectionConfig {
        input_size: config.infer.input_size,
        threshold: config.infer.threshold,
        ..DetectionConfig::default()
    };
    let mut detector = OnnxDetector::load(&config.infer.model_path, det_cfg)?;
    let rgb = frame.to_rgb8();
    let detection = detector.detect(
        rgb.as_raw(),
        rgb.width() as usize,
        rgb.height() as usize,
        3,
    )?;

    if let Some(path) = &config.render_path {
        let mut display = image::imageops::resize(
            &rgb,
            det_cfg.display_width as u32,
            det_cfg.display_height as u32,
            image::imageops::FilterType::Triangle,
        );
        if let Some(d) = &detection {
            refmatch::render::draw_detection(&mut display, d);
        }
        save_image(&image::DynamicImage::ImageRgb8(display), path)?;
    }

    Ok(serde_json::to_string_pretty(&InferOutput {
        detected: detection.is_some(),
        class_id: detection.map(|d| d.prediction.class_id),
        confidence: detection.map(|d| d.prediction.confidence),
        display_box: detection.map(|d| {
            let b = d.display_box;
            [b.x1, b.y1, b.x2, b.y2]
        }),
        inside: detection.map(|d| d.inside),
    })?)
}

#[cfg(not(feature = "onnx"))]
fn run_infer(
    _config: &Config,
    _frame: &image::DynamicImage,
) -> Result<String, Box<dyn std::error::Error>> {
    Err("the infer task requires building with the `onnx` feature".into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("refmatch=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    if config.frame_path.is_empty() {
        return Err("frame_path must be set in the config".into());
    }
    let frame = decode_image(&fs::read(&config.frame_path)?)?;

    let json = match config.task {
        Task::Detect | Task::Align => run_match(&config, &frame)?,
        Task::Capture => run_capture(&config, &frame)?,
        Task::Infer => run_infer(&config, &frame)?,
    };

    match &config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use refmatch::{BestMatch, Homography};

    #[test]
    fn empty_outcome_warns_and_skips_rendering() {
        assert!(unmatched_warning(&PassOutcome::default()).is_some());

        let outcome = PassOutcome {
            best: Some(BestMatch {
                reference_id: 0,
                detector: DetectorKind::Orb,
                match_count: 12,
                inliers: 12,
                area: 90_000.0,
                homography: Homography::identity(),
                corners: [[0.0, 0.0], [0.0, 300.0], [300.0, 300.0], [300.0, 0.0]],
                reference_size: (300, 300),
            }),
            ..PassOutcome::default()
        };
        assert!(unmatched_warning(&outcome).is_none());
    }
}
