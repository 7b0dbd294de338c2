use clap::{Parser, Subcommand, ValueEnum};
use portrait_kit::config::{self, CONFIG_FILENAME, EditorConfig};
use portrait_kit::imaging::{HashEngine, ResourceTracker, distance, read_orientation};
use portrait_kit::keys::{ArtifactKind, artifact_key};
use portrait_kit::output;
use portrait_kit::session::{Command as SessionCommand, Outcome, Session, SessionError};
use portrait_kit::store::{BinaryStore, FileStore};
use portrait_kit::types::{Axis, Direction, Region, SubjectId, SubjectRecord};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Subject records, keyed by id, next to the store.
const SUBJECTS_FILENAME: &str = "subjects.json";

#[derive(Parser)]
#[command(name = "portrait-kit")]
#[command(about = "Square, upright portraits with a history you can undo")]
#[command(long_about = "\
Square, upright portraits with a history you can undo

Each subject has one committed photo in the store. Commands open the
subject, apply one edit, and commit it:

  store/
  ├── portrait-kit.toml            # Optional config (see gen-config)
  ├── subjects.json                # Subject records: flags, baselines
  ├── .store-manifest.json         # Key → blob
  └── blobs/                       # Content-addressed photo bytes

Artifacts per subject:
  {id}           committed photo (square JPEG)
  {id}_full      the bytes as ingested
  {id}_orig      first photo ever committed, kept once
  {id}_cropBase  photo before the latest crop or fit

Run 'portrait-kit gen-config' to generate a documented config file.")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Store directory
    #[arg(long, default_value = "portraits", global = true)]
    store: PathBuf,

    /// Config file (defaults to portrait-kit.toml inside the store)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print session events as they happen
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Take a camera photo for a subject: orient, square, commit
    Ingest { subject: String, file: PathBuf },
    /// Offer an already edited picture as the subject's photo
    Propose { subject: String, file: PathBuf },
    /// Rotate clockwise by any angle
    Rotate {
        subject: String,
        #[arg(allow_hyphen_values = true)]
        degrees: f32,
    },
    /// Rotate by a quarter turn
    Rotate90 { subject: String, direction: Turn },
    /// Mirror along an axis
    Flip { subject: String, axis: FlipAxis },
    /// Keep a square region, clamped inside the photo
    Crop {
        subject: String,
        x: f32,
        y: f32,
        size: f32,
    },
    /// Show a square region, filling past the edges
    Fit {
        subject: String,
        #[arg(allow_hyphen_values = true)]
        x: f32,
        #[arg(allow_hyphen_values = true)]
        y: f32,
        size: f32,
    },
    /// Go back to the first photo ever committed
    RestoreOriginal { subject: String },
    /// Go back to the photo before the latest crop or fit
    RestoreCrop { subject: String },
    /// Delete every artifact of a subject
    Remove { subject: String },
    /// Write one of a subject's artifacts to a file
    Export {
        subject: String,
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = Artifact::Display)]
        artifact: Artifact,
    },
    /// Show a subject's record
    Show { subject: String },
    /// Print the EXIF orientation of an image file
    Orientation { file: PathBuf },
    /// Print the perceptual fingerprint of an image file
    Fingerprint { file: PathBuf },
    /// Compare two image files by fingerprint
    Compare { a: PathBuf, b: PathBuf },
    /// Print a stock config file with all options documented
    GenConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum FlipAxis {
    /// Mirror left to right
    X,
    /// Mirror top to bottom
    Y,
}

#[derive(Clone, Copy, ValueEnum)]
enum Turn {
    /// Clockwise
    Cw,
    /// Counter-clockwise
    Ccw,
}

#[derive(Clone, Copy, ValueEnum)]
enum Artifact {
    Display,
    Full,
    Original,
    CropBase,
}

impl From<FlipAxis> for Axis {
    fn from(axis: FlipAxis) -> Self {
        match axis {
            FlipAxis::X => Axis::X,
            FlipAxis::Y => Axis::Y,
        }
    }
}

impl From<Turn> for Direction {
    fn from(turn: Turn) -> Self {
        match turn {
            Turn::Cw => Direction::Clockwise,
            Turn::Ccw => Direction::CounterClockwise,
        }
    }
}

impl From<Artifact> for ArtifactKind {
    fn from(artifact: Artifact) -> Self {
        match artifact {
            Artifact::Display => ArtifactKind::Display,
            Artifact::Full => ArtifactKind::Full,
            Artifact::Original => ArtifactKind::Original,
            Artifact::CropBase => ArtifactKind::CropBase,
        }
    }
}

/// Whether the command leaves a pending raster that still needs a commit.
fn needs_commit(command: &SessionCommand) -> bool {
    !matches!(
        command,
        SessionCommand::RestoreOriginal
            | SessionCommand::RestoreCropBaseline
            | SessionCommand::Remove
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.store.join(CONFIG_FILENAME));

    let job = match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            return Ok(());
        }
        Command::Orientation { file } => {
            let bytes = std::fs::read(&file)?;
            output::print_orientation(&file, read_orientation(&bytes));
            return Ok(());
        }
        Command::Fingerprint { file } => {
            let config = config::load_config(&config_path)?;
            let hasher = standalone_hasher(&config);
            let bytes = std::fs::read(&file)?;
            let fingerprint = hasher.fingerprint(&bytes);
            output::print_fingerprint(&file, read_orientation(&bytes), &fingerprint);
            return Ok(());
        }
        Command::Compare { a, b } => {
            let config = config::load_config(&config_path)?;
            let hasher = standalone_hasher(&config);
            let (fa, fb) = (
                hasher.fingerprint(&std::fs::read(&a)?),
                hasher.fingerprint(&std::fs::read(&b)?),
            );
            output::print_comparison(&a, &b, distance(&fa, &fb), fa.len(), hasher.threshold());
            return Ok(());
        }
        Command::Show { subject } => {
            let subjects = load_subjects(&cli.store)?;
            let record = subject_record(&subjects, &subject);
            for line in output::format_record(&record) {
                println!("{}", line);
            }
            return Ok(());
        }
        Command::Export {
            subject,
            out,
            artifact,
        } => {
            let config = config::load_config(&config_path)?;
            let store = FileStore::open(&cli.store, config.store.clone())?;
            let key = artifact_key(&SubjectId::new(subject), artifact.into());
            let Some(bytes) = store.get(&key)? else {
                return Err(format!("{key} is not in the store").into());
            };
            std::fs::write(&out, bytes)?;
            println!("{} → {}", key, out.display());
            return Ok(());
        }
        Command::Ingest { subject, file } => {
            (subject, SessionCommand::Ingest(std::fs::read(file)?))
        }
        Command::Propose { subject, file } => {
            (subject, SessionCommand::ProposeEdit(std::fs::read(file)?))
        }
        Command::Rotate { subject, degrees } => (subject, SessionCommand::Rotate(degrees)),
        Command::Rotate90 { subject, direction } => {
            (subject, SessionCommand::Rotate90(direction.into()))
        }
        Command::Flip { subject, axis } => (subject, SessionCommand::Flip(axis.into())),
        Command::Crop {
            subject,
            x,
            y,
            size,
        } => (subject, SessionCommand::Crop(Region::new(x, y, size))),
        Command::Fit {
            subject,
            x,
            y,
            size,
        } => (subject, SessionCommand::Fit(Region::new(x, y, size))),
        Command::RestoreOriginal { subject } => (subject, SessionCommand::RestoreOriginal),
        Command::RestoreCrop { subject } => (subject, SessionCommand::RestoreCropBaseline),
        Command::Remove { subject } => (subject, SessionCommand::Remove),
    };

    let config = config::load_config(&config_path)?;
    run_edit(&cli.store, &config, job, cli.verbose)
}

/// Open the subject, apply the edit, commit, and persist the record.
fn run_edit(
    store_dir: &Path,
    config: &EditorConfig,
    (subject, command): (String, SessionCommand),
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::open(store_dir, config.store.clone())?);
    let mut subjects = load_subjects(store_dir)?;
    let session = Session::new(store, config);

    let events = session.subscribe();
    let printer = std::thread::spawn(move || {
        for event in events {
            if verbose {
                for line in output::format_event(&event) {
                    println!("{}", line);
                }
            }
        }
    });

    let name = command.name();
    let result = apply(&session, subject_record(&subjects, &subject), command);
    let record = session.record();
    drop(session);
    if printer.join().is_err() {
        tracing::warn!("event printer panicked");
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{}: {} failed: {}", subject, name, e.user_reason());
            return Err(e.into());
        }
    };
    if let Some(record) = record {
        output::print_command_result(&record, name, &outcome);
        subjects.insert(record.id.clone(), record);
        save_subjects(store_dir, &subjects)?;
    }
    Ok(())
}

fn apply(
    session: &Session,
    record: SubjectRecord,
    command: SessionCommand,
) -> Result<Outcome, SessionError> {
    session.dispatch(SessionCommand::Open(record))?;
    let commit = needs_commit(&command);
    let outcome = session.dispatch(command)?;
    if outcome == Outcome::Applied && commit {
        return session.commit();
    }
    Ok(outcome)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "portrait_kit=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn standalone_hasher(config: &EditorConfig) -> HashEngine {
    HashEngine::new(Arc::new(ResourceTracker::new()), config.similarity.clone())
}

fn subject_record(subjects: &BTreeMap<SubjectId, SubjectRecord>, id: &str) -> SubjectRecord {
    subjects
        .get(&SubjectId::new(id))
        .cloned()
        .unwrap_or_else(|| SubjectRecord::new(id))
}

fn load_subjects(
    store_dir: &Path,
) -> Result<BTreeMap<SubjectId, SubjectRecord>, Box<dyn std::error::Error>> {
    let path = store_dir.join(SUBJECTS_FILENAME);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_subjects(
    store_dir: &Path,
    subjects: &BTreeMap<SubjectId, SubjectRecord>,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(store_dir)?;
    let json = serde_json::to_string_pretty(subjects)?;
    std::fs::write(store_dir.join(SUBJECTS_FILENAME), json)?;
    Ok(())
}
