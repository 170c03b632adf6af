mod config;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config::Config;
use facekit_core::{open_image, parse_analysis, Attribute, OnnxEncoder, Region};
use facekit_session::{Annotator, RecognitionSession, RecognizedFace};
use facekit_store::{HistoryFilter, HistoryLog, Registry};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facekit", about = "Face registration, recognition and history")]
struct Cli {
    /// TOML config file (overrides FACEKIT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the face in an image under an identity
    Enroll {
        /// Identity name (e.g., "alice")
        #[arg(short, long)]
        identity: String,
        /// Image containing exactly one face
        image: PathBuf,
    },
    /// Register every image in a directory, named by file stem
    Import {
        dir: PathBuf,
    },
    /// List registered faces
    List,
    /// Remove every face registered under an identity
    Remove {
        identity: String,
    },
    /// Recognize the faces in an image
    Recognize {
        image: PathBuf,
        /// Normalized distance cutoff in [0, 1]
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Write the annotated image here
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether two images show the same person
    Verify {
        first: PathBuf,
        second: PathBuf,
    },
    /// Show recognition history, oldest first
    History {
        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Exclusive upper bound (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Per-identity recognition counts
    Summary {
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
    /// Print face attributes from a JSON analysis file
    Attributes {
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { identity, image } => {
            let session = open_session(&config)?;
            let img = open_image(&image)?;
            let entry = session.enroll(&identity, &img, Some(&image.to_string_lossy()))?;
            println!("Registered {} ({})", entry.identity, entry.id);
        }
        Commands::Import { dir } => {
            let session = open_session(&config)?;
            let report = session.import_dir(&dir)?;
            for entry in &report.imported {
                println!("registered  {}", entry.identity);
            }
            for path in &report.skipped {
                println!("no face     {}", path.display());
            }
            for (path, reason) in &report.failed {
                println!("failed      {}: {reason}", path.display());
            }
            println!(
                "{} registered, {} skipped, {} failed",
                report.imported.len(),
                report.skipped.len(),
                report.failed.len()
            );
        }
        Commands::List => {
            let entries = Registry::open(&config.db_path)?.list()?;
            if entries.is_empty() {
                println!("No faces registered");
            }
            for entry in entries {
                println!(
                    "{}  {:<20} {}  {}",
                    entry.id,
                    entry.identity,
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.source_image_ref.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Remove { identity } => {
            let removed = Registry::open(&config.db_path)?.remove(&identity)?;
            if removed == 0 {
                bail!("no faces registered as {identity:?}");
            }
            println!("Removed {removed} face(s) for {identity}");
        }
        Commands::Recognize {
            image,
            threshold,
            out,
            json,
        } => {
            let session = open_session(&config)?;
            let img = open_image(&image)?;
            let recognition = session.recognize(&img, threshold.unwrap_or(config.threshold))?;

            if let Some(out) = out {
                recognition
                    .annotated
                    .save(&out)
                    .with_context(|| format!("writing {}", out.display()))?;
            }

            if json {
                let reports: Vec<FaceReport<'_>> = recognition.faces.iter().map(FaceReport::from).collect();
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else if recognition.faces.is_empty() {
                println!("No faces found");
            } else {
                for face in &recognition.faces {
                    let r = face.region;
                    println!(
                        "{:<20} {:.3}  (top {}, right {}, bottom {}, left {})",
                        face.result.label(),
                        face.result.confidence,
                        r.top,
                        r.right,
                        r.bottom,
                        r.left
                    );
                }
            }
        }
        Commands::Verify { first, second } => {
            let session = open_session(&config)?;
            let verification = session.verify(&open_image(&first)?, &open_image(&second)?)?;
            println!(
                "{} (distance {:.3})",
                if verification.verified { "Same person" } else { "Different people" },
                verification.distance
            );
        }
        Commands::History {
            since,
            until,
            identity,
            json,
        } => {
            let filter = history_filter(since, until, identity);
            let records = HistoryLog::open(&config.db_path)?.query(&filter)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in records {
                    println!(
                        "{}  {:<20} {:.3}",
                        record.timestamp.to_rfc3339(),
                        record.identity,
                        record.confidence
                    );
                }
            }
        }
        Commands::Summary { since, until } => {
            let filter = history_filter(since, until, None);
            for count in HistoryLog::open(&config.db_path)?.summary(&filter)? {
                println!(
                    "{:<20} {:>6}  mean {:.3}",
                    count.identity, count.events, count.mean_confidence
                );
            }
        }
        Commands::Attributes { file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let raw: serde_json::Value = serde_json::from_str(&text)?;
            for (i, face) in parse_analysis(&raw)?.iter().enumerate() {
                println!("face {i}");
                for attribute in &face.attributes {
                    println!("  {}", describe(attribute));
                }
            }
        }
    }

    Ok(())
}

fn open_session(config: &Config) -> Result<RecognitionSession<OnnxEncoder>> {
    let encoder = OnnxEncoder::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let registry = Registry::open(&config.db_path)?;
    let history = HistoryLog::open(&config.db_path)?;
    let annotator = match &config.font {
        Some(font) => Annotator::with_font_file(font)?,
        None => Annotator::new(),
    };
    Ok(RecognitionSession::open(encoder, registry, history, annotator)?)
}

/// JSON shape of one recognized face. Unknown faces carry the same
/// `"unknown"` label as the text output and the history.
#[derive(Debug, Serialize, PartialEq)]
struct FaceReport<'a> {
    identity: &'a str,
    known: bool,
    confidence: f64,
    region: Region,
}

impl<'a> From<&'a RecognizedFace> for FaceReport<'a> {
    fn from(face: &'a RecognizedFace) -> Self {
        Self {
            identity: face.result.label(),
            known: face.result.is_known(),
            confidence: face.result.confidence,
            region: face.region,
        }
    }
}

fn history_filter(
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    identity: Option<String>,
) -> HistoryFilter {
    HistoryFilter { since, until, identity }
}

fn describe(attribute: &Attribute) -> String {
    match attribute {
        Attribute::Age { years } => format!("age      {years}"),
        Attribute::Gender(c) => format!("gender   {}", c.dominant),
        Attribute::Emotion(c) => format!("emotion  {}", c.dominant),
        Attribute::Race(c) => format!("race     {}", c.dominant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use facekit_core::{Classification, MatchResult};
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_history_bounds() {
        let cli = Cli::try_parse_from([
            "facekit",
            "history",
            "--since",
            "2024-05-01T00:00:00Z",
            "--until",
            "2024-05-02T12:30:00+02:00",
            "--identity",
            "alice",
        ])
        .unwrap();

        let Commands::History {
            since,
            until,
            identity,
            json,
        } = cli.command
        else {
            panic!("expected history command");
        };
        assert!(!json);

        let filter = history_filter(since, until, identity);
        assert_eq!(filter.since, Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        assert_eq!(filter.until, Some(Utc.with_ymd_and_hms(2024, 5, 2, 10, 30, 0).unwrap()));
        assert_eq!(filter.identity.as_deref(), Some("alice"));
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        assert!(Cli::try_parse_from(["facekit", "history", "--since", "yesterday"]).is_err());
    }

    #[test]
    fn test_parse_recognize_arguments() {
        let cli = Cli::try_parse_from([
            "facekit",
            "--config",
            "/etc/facekit.toml",
            "recognize",
            "group.jpg",
            "-t",
            "0.45",
            "--out",
            "annotated.png",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/facekit.toml")));
        let Commands::Recognize {
            image,
            threshold,
            out,
            json,
        } = cli.command
        else {
            panic!("expected recognize command");
        };
        assert_eq!(image, PathBuf::from("group.jpg"));
        assert_eq!(threshold, Some(0.45));
        assert_eq!(out, Some(PathBuf::from("annotated.png")));
        assert!(json);
    }

    #[test]
    fn test_recognize_defaults() {
        let cli = Cli::try_parse_from(["facekit", "recognize", "face.jpg"]).unwrap();
        let Commands::Recognize { threshold, out, json, .. } = cli.command else {
            panic!("expected recognize command");
        };
        assert_eq!(threshold, None);
        assert_eq!(out, None);
        assert!(!json);
    }

    #[test]
    fn test_face_report_labels_unknown() {
        let face = RecognizedFace {
            region: Region::new(1, 2, 3, 4),
            result: MatchResult::unknown(),
        };
        let json = serde_json::to_value(FaceReport::from(&face)).unwrap();
        assert_eq!(json["identity"], "unknown");
        assert_eq!(json["known"], false);

        let face = RecognizedFace {
            region: Region::new(1, 2, 3, 4),
            result: MatchResult {
                identity: Some("alice".into()),
                confidence: 0.9,
            },
        };
        let report = FaceReport::from(&face);
        assert_eq!(report.identity, "alice");
        assert!(report.known);
    }

    #[test]
    fn test_describe_attributes() {
        let gender = Classification {
            dominant: "Woman".into(),
            scores: BTreeMap::new(),
        };
        assert_eq!(describe(&Attribute::Age { years: 31 }), "age      31");
        assert_eq!(describe(&Attribute::Gender(gender)), "gender   Woman");
    }
}
