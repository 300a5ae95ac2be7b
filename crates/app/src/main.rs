use std::fmt;
use std::path::{Path, PathBuf};

use habit_core::model::{ChallengeId, ChallengeRecord};
use services::{AppServices, Clock};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "challenges=info,services=info,storage=info";
const DEFAULT_DB_URL: &str = "sqlite:dev.sqlite3";

#[derive(Debug, PartialEq, Eq)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingChallengeId { command: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidDbUrl { raw: String },
    InvalidChallengeId { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingChallengeId { command } => {
                write!(f, "{command} requires a challenge id")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidChallengeId { raw } => write!(f, "invalid challenge id: {raw:?}"),
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
enum Command {
    Completed,
    Skip(ChallengeId),
    Show(ChallengeId),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Backend {
    Sqlite(String),
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    command: Command,
    backend: Backend,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  challenges completed        [--db <sqlite_url> | --remote]");
    eprintln!("  challenges skip <id>        [--db <sqlite_url> | --remote]");
    eprintln!("  challenges show <id>        [--db <sqlite_url> | --remote]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {DEFAULT_DB_URL} (relative to the working directory)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CHALLENGES_DB_URL");
    eprintln!("  CHALLENGES_BACKEND_URL, CHALLENGES_BACKEND_KEY, CHALLENGES_ACCESS_TOKEN (--remote)");
    eprintln!("  RUST_LOG (default {DEFAULT_FILTER})");
}

impl Args {
    fn parse(
        args: impl IntoIterator<Item = String>,
        env_db_url: Option<String>,
    ) -> Result<Self, ArgsError> {
        let mut args = args.into_iter();
        let command = match args.next().as_deref() {
            None | Some("--help" | "-h" | "help") => {
                return Ok(Self {
                    command: Command::Help,
                    backend: Backend::Remote,
                });
            }
            Some("completed") => Command::Completed,
            Some("skip") => Command::Skip(challenge_id_arg(&mut args, "skip")?),
            Some("show") => Command::Show(challenge_id_arg(&mut args, "show")?),
            Some(other) => return Err(ArgsError::UnknownCommand(other.to_string())),
        };

        let mut db_url = normalize_sqlite_url(
            env_db_url
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DB_URL.into()),
        );
        let mut remote = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--remote" => remote = true,
                "--help" | "-h" => {
                    return Ok(Self {
                        command: Command::Help,
                        backend: Backend::Remote,
                    });
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let backend = if remote {
            Backend::Remote
        } else {
            Backend::Sqlite(db_url)
        };
        Ok(Self { command, backend })
    }
}

fn challenge_id_arg(
    args: &mut impl Iterator<Item = String>,
    command: &'static str,
) -> Result<ChallengeId, ArgsError> {
    let raw = args
        .next()
        .filter(|v| !v.starts_with("--"))
        .ok_or(ArgsError::MissingChallengeId { command })?;
    ChallengeId::new(raw.trim()).map_err(|_| ArgsError::InvalidChallengeId { raw })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim();
    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
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

    let path = Path::new(path);
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

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_challenge(challenge: &ChallengeRecord) {
    println!("{} ({})", challenge.name(), challenge.id());
    println!("  runs:         {} .. {}", challenge.start_date(), challenge.end_date());
    let participants: Vec<&str> = challenge.participants().iter().map(|u| u.as_str()).collect();
    println!("  participants: {}", participants.join(", "));
    if !challenge.habits().is_empty() {
        let habits: Vec<&str> = challenge.habits().iter().map(|h| h.as_str()).collect();
        println!("  habits:       {}", habits.join(", "));
    }
    let photo = |media: Option<String>| media.unwrap_or_else(|| "-".into());
    println!(
        "  before photo: {}",
        photo(challenge.before_photo().map(ToString::to_string))
    );
    let after = if challenge.after_photo_skipped() {
        "skipped".to_string()
    } else {
        photo(challenge.after_photo().map(ToString::to_string))
    };
    println!("  after photo:  {after}");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Args::parse(
        std::env::args().skip(1),
        std::env::var("CHALLENGES_DB_URL").ok(),
    )
    .map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    if parsed.command == Command::Help {
        print_usage();
        return Ok(());
    }

    let services = match &parsed.backend {
        Backend::Sqlite(db_url) => {
            prepare_sqlite_file(db_url)?;
            AppServices::new_sqlite(db_url, Clock::default_clock()).await?
        }
        Backend::Remote => AppServices::from_env()?,
    };
    let tracker = services.tracker();

    match parsed.command {
        Command::Completed => {
            tracker.refresh().await;
            let state = tracker.state();
            if state.completed().is_empty() {
                println!("No completed challenges waiting for an after photo.");
            }
            for entry in state.completed() {
                let badge = if entry.was_displayed() { " " } else { "*" };
                println!(
                    "{badge} {}\t{}\tended {}",
                    entry.id(),
                    entry.challenge().name(),
                    entry.challenge().end_date()
                );
            }
        }
        Command::Skip(id) => {
            tracker.skip_after_photo(&id).await?;
            println!(
                "Skipped after photo for {id}; {} completed challenge(s) remain.",
                tracker.state().completed().len()
            );
        }
        Command::Show(id) => {
            services.challenges().reload().await?;
            match services.challenges().get(id.as_str()) {
                Some(challenge) => print_challenge(&challenge),
                None => {
                    eprintln!("no challenge with id {id}");
                    std::process::exit(1);
                }
            }
        }
        Command::Help => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        Args::parse(args.iter().map(|s| (*s).to_string()), None)
    }

    #[test]
    fn no_arguments_prints_help() {
        assert_eq!(parse(&[]).unwrap().command, Command::Help);
    }

    #[test]
    fn skip_takes_challenge_id_and_flags() {
        let args = parse(&["skip", "c1", "--db", "sqlite::memory:"]).unwrap();
        assert_eq!(args.command, Command::Skip(ChallengeId::new("c1").unwrap()));
        assert_eq!(args.backend, Backend::Sqlite("sqlite::memory:".into()));
    }

    #[test]
    fn skip_without_id_is_rejected() {
        assert_eq!(
            parse(&["skip", "--remote"]).unwrap_err(),
            ArgsError::MissingChallengeId { command: "skip" }
        );
        assert_eq!(
            parse(&["show"]).unwrap_err(),
            ArgsError::MissingChallengeId { command: "show" }
        );
    }

    #[test]
    fn remote_flag_selects_hosted_backend() {
        let args = parse(&["completed", "--remote"]).unwrap();
        assert_eq!(args.backend, Backend::Remote);
    }

    #[test]
    fn unknown_inputs_are_rejected() {
        assert!(matches!(
            parse(&["finish"]).unwrap_err(),
            ArgsError::UnknownCommand(_)
        ));
        assert!(matches!(
            parse(&["completed", "--verbose"]).unwrap_err(),
            ArgsError::UnknownArg(_)
        ));
        assert_eq!(
            parse(&["completed", "--db"]).unwrap_err(),
            ArgsError::MissingValue { flag: "--db" }
        );
    }

    #[test]
    fn env_db_url_is_used_unless_overridden() {
        let args = Args::parse(
            ["completed".to_string()],
            Some("sqlite:///tmp/challenges.sqlite3".into()),
        )
        .unwrap();
        assert_eq!(
            args.backend,
            Backend::Sqlite("sqlite:///tmp/challenges.sqlite3".into())
        );
    }

    #[test]
    fn default_database_is_absolute_under_working_directory() {
        let args = parse(&["completed"]).unwrap();
        let Backend::Sqlite(url) = args.backend else {
            panic!("expected sqlite backend");
        };
        let expected = std::env::current_dir().unwrap().join("dev.sqlite3");
        assert_eq!(url, format!("sqlite://{}", expected.display()));
    }

    #[test]
    fn relative_sqlite_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/dev.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/dev.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
    }
}
