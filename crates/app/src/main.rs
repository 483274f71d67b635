use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use proctor_core::model::{
    AssessmentId, EscalationPolicy, LearnerId, SessionStatus, SubmitReason,
};
use proctor_core::settings::ProctoringSettingsDraft;
use proctor_core::{Clock, ProctoringSettings};
use services::{
    DocumentEvent, HeadlessFullscreen, ProctoredSession, ProctoringService, ScoringClient,
    SessionEvent, Submission,
};
use storage::repository::{AssessmentRepository, AttemptRepository, Storage, StorageError};
use storage::sample::{SAMPLE_DURATION_MINUTES, SAMPLE_TITLE, sample_assessment};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod simulation;

use simulation::{Scene, SimulatedCamera, SimulatedLearner, SimulatedLoader, SimulatedModel};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    Script(simulation::ParseError),
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::Script(err) => write!(f, "{err}"),
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

fn require_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

struct Args {
    db_url: String,
    assessment_id: AssessmentId,
    learner_id: Option<LearnerId>,
    scenes: Vec<Scene>,
    events: Vec<DocumentEvent>,
    tick_ms: Option<u64>,
    threshold: Option<u32>,
    seed: u64,
    deny_camera: bool,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- run  [--db <sqlite_url>] [--assessment-id <id>] [options]");
    eprintln!("  cargo run -p app -- seed [--db <sqlite_url>] [--assessment-id <id>]");
    eprintln!();
    eprintln!("Options for run:");
    eprintln!("  --learner-id <id>         Learner attached to the attempt");
    eprintln!("  --script <scenes>         Camera scenes per tick: person,empty,phone,glitch");
    eprintln!("  --events <events>         Learner actions: hide,show,copy,paste,menu,ctrl-c,");
    eprintln!("                            ctrl-v,printscreen,fs-exit,fs-enter");
    eprintln!("  --tick-ms <n>             Detection interval in milliseconds");
    eprintln!("  --threshold <n>           Violations per channel before forced submission");
    eprintln!("  --seed <n>                Seed for simulated scenes and answers (default: 1)");
    eprintln!("  --deny-camera             Refuse camera permission");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:dev.sqlite3");
    eprintln!("  --assessment-id 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROCTOR_DB_URL, PROCTOR_ASSESSMENT_ID, PROCTOR_TICK_MS, PROCTOR_THRESHOLD,");
    eprintln!("  PROCTOR_SCORING_URL, PROCTOR_SCORING_TOKEN, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

impl Args {
    fn parse(cmd: Command, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("PROCTOR_DB_URL")
                .ok()
                .map_or_else(|| "sqlite://dev.sqlite3".into(), normalize_sqlite_url),
            assessment_id: std::env::var("PROCTOR_ASSESSMENT_ID")
                .ok()
                .and_then(|value| value.parse::<AssessmentId>().ok())
                .unwrap_or_else(|| AssessmentId::new(1)),
            learner_id: None,
            scenes: Vec::new(),
            events: Vec::new(),
            tick_ms: None,
            threshold: None,
            seed: 1,
            deny_camera: false,
        };

        while let Some(arg) = args.next() {
            match (cmd, arg.as_str()) {
                (_, "--db") => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                (_, "--assessment-id") => {
                    parsed.assessment_id = require_number(args, "--assessment-id")?;
                }
                (Command::Run, "--learner-id") => {
                    parsed.learner_id = Some(require_number(args, "--learner-id")?);
                }
                (Command::Run, "--script") => {
                    let value = require_value(args, "--script")?;
                    parsed.scenes = simulation::parse_scenes(&value).map_err(ArgsError::Script)?;
                }
                (Command::Run, "--events") => {
                    let value = require_value(args, "--events")?;
                    parsed.events = simulation::parse_events(&value).map_err(ArgsError::Script)?;
                }
                (Command::Run, "--tick-ms") => {
                    parsed.tick_ms = Some(require_number(args, "--tick-ms")?);
                }
                (Command::Run, "--threshold") => {
                    parsed.threshold = Some(require_number(args, "--threshold")?);
                }
                (Command::Run, "--seed") => {
                    parsed.seed = require_number(args, "--seed")?;
                }
                (Command::Run, "--deny-camera") => {
                    parsed.deny_camera = true;
                }
                (_, "--help" | "-h") => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Environment settings with command-line overrides on top.
fn build_settings(args: &Args) -> Result<ProctoringSettings, proctor_core::Error> {
    let mut draft = ProctoringSettingsDraft::from_env()?;
    if args.tick_ms.is_some() {
        draft.tick_interval_ms = args.tick_ms;
    }
    let settings = draft.validate()?;
    Ok(match args.threshold {
        Some(threshold) => settings.with_escalation(EscalationPolicy::uniform(threshold)?),
        None => settings,
    })
}

/// Make sure the requested assessment exists, seeding the sample if it does not.
async fn ensure_assessment(
    assessments: &dyn AssessmentRepository,
    id: AssessmentId,
) -> Result<bool, StorageError> {
    match assessments.get_assessment(id).await {
        Ok(_) => Ok(false),
        Err(StorageError::NotFound) => {
            let record = sample_assessment(id, SAMPLE_TITLE, SAMPLE_DURATION_MINUTES, true);
            assessments.upsert_assessment(&record).await?;
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // No subcommand runs a simulated attempt.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Run,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let args = Args::parse(cmd, &mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match cmd {
        Command::Seed => {
            prepare_sqlite_file(&args.db_url)?;
            let storage = Storage::sqlite(&args.db_url).await?;
            let record = sample_assessment(
                args.assessment_id,
                SAMPLE_TITLE,
                SAMPLE_DURATION_MINUTES,
                true,
            );
            storage.assessments.upsert_assessment(&record).await?;
            println!(
                "Seeded assessment {} ({} questions) into {}",
                args.assessment_id,
                record.questions.len(),
                args.db_url
            );
            Ok(())
        }
        Command::Run => {
            let settings = build_settings(&args)?;
            let (assessments, attempts) = match ScoringClient::from_settings(&settings) {
                client if client.enabled() => {
                    tracing::info!("using remote scoring service");
                    let client = Arc::new(client);
                    let assessments: Arc<dyn AssessmentRepository> = client.clone();
                    let attempts: Arc<dyn AttemptRepository> = client;
                    (assessments, attempts)
                }
                _ => {
                    prepare_sqlite_file(&args.db_url)?;
                    let storage = Storage::sqlite(&args.db_url).await?;
                    if ensure_assessment(storage.assessments.as_ref(), args.assessment_id).await? {
                        tracing::info!(
                            assessment_id = %args.assessment_id,
                            "seeded sample assessment"
                        );
                    }
                    (storage.assessments, storage.attempts)
                }
            };

            let tick = settings.tick_interval();
            let model = SimulatedModel::new(args.scenes.clone(), args.seed);
            let service = ProctoringService::new(
                assessments,
                attempts,
                Arc::new(SimulatedLoader::new(model)),
                Arc::new(SimulatedCamera::new(args.deny_camera)),
                Arc::new(HeadlessFullscreen::new()),
            )
            .with_settings(settings)
            .with_clock(Clock::default());

            let session = service
                .open_session(args.assessment_id, args.learner_id)
                .await?;
            simulate_attempt(&session, &args, tick).await
        }
    }
}

async fn simulate_attempt(
    session: &ProctoredSession,
    args: &Args,
    tick: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let definition = session.definition();
    println!(
        "Assessment {}: {} ({} questions, {} min, proctored: {})",
        definition.id(),
        definition.title(),
        definition.question_count(),
        definition.duration_minutes(),
        definition.proctoring_required()
    );

    let notices = tokio::spawn(print_notices(session.subscribe_events()));

    session.prepare().await?;
    session.start().await?;

    // The learner acts about twice per detection tick.
    let pace = tick / 2;
    let mut learner = SimulatedLearner::new(args.seed);
    let mut events = args.events.iter();

    for index in definition.indices() {
        tokio::time::sleep(pace).await;
        if let Some(event) = events.next() {
            let suppressed = session.dispatch(event);
            tracing::debug!(?event, suppressed, "learner action");
        }
        if let Some(option) = learner.choose(index.option_count()) {
            if session.select_answer(index, option).is_err() {
                break;
            }
        }
    }
    for event in events {
        tokio::time::sleep(pace).await;
        session.dispatch(event);
    }

    let outcome = if session.phase() == SessionStatus::Active {
        session.submit(SubmitReason::Manual).await
    } else {
        Ok(Submission::Ignored)
    };
    if outcome.is_err() {
        // A rejected submission cannot be retried; abandon the attempt.
        session.close().await;
    }
    let mut phase = session.subscribe_phase();
    let terminal = *phase.wait_for(|p| p.is_terminal()).await?;
    if tokio::time::timeout(Duration::from_secs(1), notices).await.is_err() {
        tracing::debug!("notice printer still waiting");
    }
    session.close().await;

    if let Err(err) = outcome {
        eprintln!("submission failed: {err}");
    }

    println!("Session finished: {terminal}");
    let log = session.proctoring_log();
    if !log.is_empty() {
        println!("Proctoring log:");
        for entry in &log {
            println!("  {entry}");
        }
    }
    if let Some(stats) = session.detector_stats() {
        println!(
            "Detector: {} ticks, {} skipped, {} inference failures",
            stats.ticks_run, stats.ticks_skipped, stats.inference_failures
        );
    }
    Ok(())
}

async fn print_notices(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Warning {
                count,
                threshold,
                reason,
                ..
            }) => println!("Warning ({count}/{threshold}): {reason}"),
            Ok(SessionEvent::FullscreenExited) => {
                println!("Notice: please return to fullscreen");
            }
            Ok(SessionEvent::Submitted { receipt }) => {
                println!(
                    "Submitted attempt {}: score {}/{}",
                    receipt.attempt_id, receipt.score, receipt.total_marks
                );
                if let Some(message) = receipt.message {
                    println!("  {message}");
                }
                break;
            }
            Ok(SessionEvent::SubmissionFailed { message }) => {
                println!("Error: {message}");
            }
            Ok(SessionEvent::Failed { message }) => {
                println!("Error: {message}");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session notices lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::InMemoryRepository;

    fn parse(cmd: Command, argv: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = argv.iter().map(ToString::to_string);
        Args::parse(cmd, &mut iter)
    }

    #[test]
    fn run_flags_are_parsed() {
        let args = parse(
            Command::Run,
            &[
                "--db",
                "sqlite::memory:",
                "--assessment-id",
                "9",
                "--script",
                "phone,phone",
                "--events",
                "hide",
                "--tick-ms",
                "500",
                "--seed",
                "3",
            ],
        )
        .unwrap();
        assert_eq!(args.db_url, "sqlite::memory:");
        assert_eq!(args.assessment_id, AssessmentId::new(9));
        assert_eq!(args.scenes, vec![Scene::Phone, Scene::Phone]);
        assert_eq!(args.events.len(), 1);
        assert_eq!(args.tick_ms, Some(500));
        assert_eq!(args.seed, 3);
    }

    #[test]
    fn seed_rejects_run_only_flags() {
        assert!(matches!(
            parse(Command::Seed, &["--script", "phone"]),
            Err(ArgsError::UnknownArg(_))
        ));
        assert!(matches!(
            parse(Command::Run, &["--tick-ms", "soon"]),
            Err(ArgsError::InvalidNumber { flag: "--tick-ms", .. })
        ));
        assert!(matches!(
            parse(Command::Run, &["--db"]),
            Err(ArgsError::MissingValue { flag: "--db" })
        ));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let args = parse(Command::Run, &["--threshold", "0"]).unwrap();
        assert!(matches!(
            build_settings(&args),
            Err(proctor_core::Error::Policy(_))
        ));
    }

    #[tokio::test]
    async fn missing_assessment_is_seeded_once() {
        let repo = InMemoryRepository::new();
        assert!(ensure_assessment(&repo, AssessmentId::new(4)).await.unwrap());
        assert!(!ensure_assessment(&repo, AssessmentId::new(4)).await.unwrap());
        let definition = repo.get_assessment(AssessmentId::new(4)).await.unwrap();
        assert_eq!(definition.title(), SAMPLE_TITLE);
    }
}
