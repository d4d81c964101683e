use std::fmt;

use coach_core::model::{ContentId, LearnerId};

const DEFAULT_DB: &str = "coach.sqlite3";
const DEFAULT_LEARNER: &str = "local";

#[derive(Debug)]
pub enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { name: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidDbUrl { raw: String },
    InvalidLearner { raw: String },
    InvalidContentId { raw: String },
    InvalidRating { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { name } => write!(f, "missing <{name}>"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidLearner { raw } => write!(f, "invalid --learner value: {raw:?}"),
            ArgsError::InvalidContentId { raw } => write!(f, "invalid content id: {raw:?}"),
            ArgsError::InvalidRating { raw } => write!(f, "rating must be a number: {raw}"),
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Ensure(ContentId),
    Advance(ContentId),
    Skip(ContentId),
    Previous(ContentId),
    Form(ContentId),
    Feedback {
        content_id: ContentId,
        rating: i64,
        text: Option<String>,
    },
    Milestone(ContentId),
}

#[derive(Debug, Clone)]
pub struct Args {
    pub command: Command,
    pub db_url: String,
    pub learner: LearnerId,
    pub json: bool,
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  coach [options] status");
    eprintln!("  coach [options] ensure    <content-id>");
    eprintln!("  coach [options] advance   <content-id>");
    eprintln!("  coach [options] skip      <content-id>");
    eprintln!("  coach [options] previous  <content-id>");
    eprintln!("  coach [options] form      <content-id>");
    eprintln!("  coach [options] feedback  <content-id> <1-5> [text]");
    eprintln!("  coach [options] milestone <content-id>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>     SQLite database (default: {DEFAULT_DB})");
    eprintln!("  --learner <id>        Learner id (default: {DEFAULT_LEARNER})");
    eprintln!("  --json                Print results as JSON");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  COACH_DB_URL, COACH_LEARNER_ID, RUST_LOG");
}

fn content_id(raw: Option<String>) -> Result<ContentId, ArgsError> {
    let raw = raw.ok_or(ArgsError::MissingArgument { name: "content-id" })?;
    ContentId::new(&raw).map_err(|_| ArgsError::InvalidContentId { raw })
}

impl Command {
    fn parse(name: &str, mut positional: std::vec::IntoIter<String>) -> Result<Self, ArgsError> {
        let command = match name {
            "status" => Self::Status,
            "ensure" => Self::Ensure(content_id(positional.next())?),
            "advance" => Self::Advance(content_id(positional.next())?),
            "skip" => Self::Skip(content_id(positional.next())?),
            "previous" => Self::Previous(content_id(positional.next())?),
            "form" => Self::Form(content_id(positional.next())?),
            "milestone" => Self::Milestone(content_id(positional.next())?),
            "feedback" => {
                let content_id = content_id(positional.next())?;
                let raw = positional
                    .next()
                    .ok_or(ArgsError::MissingArgument { name: "rating" })?;
                let rating = raw
                    .parse::<i64>()
                    .map_err(|_| ArgsError::InvalidRating { raw: raw.clone() })?;
                let words: Vec<String> = positional.by_ref().collect();
                let text = (!words.is_empty()).then(|| words.join(" "));
                Self::Feedback {
                    content_id,
                    rating,
                    text,
                }
            }
            other => return Err(ArgsError::UnknownCommand(other.to_string())),
        };
        if let Some(extra) = positional.next() {
            return Err(ArgsError::UnknownArg(extra));
        }
        Ok(command)
    }
}

impl Args {
    /// Parse flags and the subcommand. `None` means help was requested.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut db_url = std::env::var("COACH_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url(DEFAULT_DB.into()), normalize_sqlite_url);
        let mut learner_raw =
            std::env::var("COACH_LEARNER_ID").unwrap_or_else(|_| DEFAULT_LEARNER.into());
        let mut json = false;
        let mut positional = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--learner" => learner_raw = require_value(&mut args, "--learner")?,
                "--json" => json = true,
                "--help" | "-h" => return Ok(None),
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let learner = LearnerId::new(&learner_raw)
            .map_err(|_| ArgsError::InvalidLearner { raw: learner_raw })?;

        let mut positional = positional.into_iter();
        let name = positional.next().unwrap_or_else(|| "status".to_string());
        let command = Command::parse(&name, positional)?;

        Ok(Some(Self {
            command,
            db_url,
            learner,
            json,
        }))
    }
}

pub fn normalize_sqlite_url(raw: String) -> String {
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

/// Create the database file (and its directory) so the pool can open it.
pub fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
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
