use std::fmt;

use proctor_core::model::AssessmentId;
use storage::repository::Storage;
use storage::sample::{SAMPLE_DURATION_MINUTES, SAMPLE_TITLE, sample_assessment};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    assessment_id: AssessmentId,
    title: String,
    duration_minutes: u32,
    proctoring_required: bool,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidAssessmentId { raw: String },
    InvalidDuration { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidAssessmentId { raw } => {
                write!(f, "invalid --assessment-id value: {raw}")
            }
            ArgsError::InvalidDuration { raw } => write!(f, "invalid --minutes value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("PROCTOR_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3".into());
        let mut assessment_id = std::env::var("PROCTOR_ASSESSMENT_ID")
            .ok()
            .and_then(|value| value.parse::<AssessmentId>().ok())
            .unwrap_or_else(|| AssessmentId::new(1));
        let mut title = SAMPLE_TITLE.to_string();
        let mut duration_minutes = SAMPLE_DURATION_MINUTES;
        let mut proctoring_required = true;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--assessment-id" => {
                    let value = require_value(&mut args, "--assessment-id")?;
                    assessment_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidAssessmentId { raw: value.clone() })?;
                }
                "--title" => {
                    title = require_value(&mut args, "--title")?;
                }
                "--minutes" => {
                    let value = require_value(&mut args, "--minutes")?;
                    duration_minutes = value
                        .parse::<u32>()
                        .ok()
                        .filter(|m| *m > 0)
                        .ok_or_else(|| ArgsError::InvalidDuration { raw: value.clone() })?;
                }
                "--unproctored" => {
                    proctoring_required = false;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            assessment_id,
            title,
            duration_minutes,
            proctoring_required,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3)");
    eprintln!("  --assessment-id <id>      Assessment id to upsert (default: 1)");
    eprintln!("  --title <text>            Assessment title");
    eprintln!("  --minutes <n>             Time limit in minutes (default: 20)");
    eprintln!("  --unproctored             Seed without camera proctoring");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROCTOR_DB_URL, PROCTOR_ASSESSMENT_ID");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;

    let record = sample_assessment(
        args.assessment_id,
        args.title.clone(),
        args.duration_minutes,
        args.proctoring_required,
    );
    // Reject a record the session could never load.
    record.to_definition()?;
    storage.assessments.upsert_assessment(&record).await?;

    println!(
        "Seeded assessment {} ({} questions, {} min, proctored: {}) into {}",
        args.assessment_id,
        record.questions.len(),
        args.duration_minutes,
        args.proctoring_required,
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
