//! Seeds a local `SQLite` database with demo challenges.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use habit_core::Clock;
use habit_core::model::{ChallengeId, ChallengeRecord, HabitId, MediaRef, UserId};
use storage::sqlite::SqliteGateway;
use thiserror::Error;

const DEFAULT_DB_URL: &str = "sqlite:dev.sqlite3";
const DEFAULT_USER: &str = "demo-user";

#[derive(Debug, Error, PartialEq, Eq)]
enum SeedArgsError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),
    #[error("unknown argument: {0}")]
    UnknownArg(String),
    #[error("invalid {flag} value: {raw}")]
    Invalid { flag: &'static str, raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    Seed(SeedArgs),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SeedArgs {
    db_url: String,
    users: Vec<String>,
    now: Option<DateTime<Utc>>,
}

fn parse_args(
    args: impl IntoIterator<Item = String>,
    env_db_url: Option<String>,
) -> Result<Invocation, SeedArgsError> {
    let mut parsed = SeedArgs {
        db_url: env_db_url.unwrap_or_else(|| DEFAULT_DB_URL.into()),
        users: Vec::new(),
        now: None,
    };

    let mut args = args.into_iter();
    while let Some(flag) = args.next() {
        let mut value = |name: &'static str| {
            args.next()
                .filter(|v| !v.trim().is_empty())
                .ok_or(SeedArgsError::MissingValue(name))
        };
        match flag.as_str() {
            "--db" => parsed.db_url = value("--db")?,
            "--user" => parsed.users.push(value("--user")?),
            "--now" => {
                let raw = value("--now")?;
                let at = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| SeedArgsError::Invalid { flag: "--now", raw })?;
                parsed.now = Some(at.with_timezone(&Utc));
            }
            "--help" | "-h" => return Ok(Invocation::Help),
            _ => return Err(SeedArgsError::UnknownArg(flag)),
        }
    }

    if parsed.users.is_empty() {
        parsed.users.push(DEFAULT_USER.into());
    }
    Ok(Invocation::Seed(parsed))
}

fn print_usage() {
    eprintln!("Usage: seed [--db <sqlite_url>] [--user <id>]... [--now <rfc3339>]");
    eprintln!();
    eprintln!("  --db    SQLite URL (default {DEFAULT_DB_URL}, or CHALLENGES_DB_URL)");
    eprintln!("  --user  participant id, repeatable (default {DEFAULT_USER})");
    eprintln!("  --now   pin the clock; demo dates are laid out around this day");
}

fn sample(
    id: &str,
    name: &str,
    start: NaiveDate,
    end: NaiveDate,
    habits: &[&str],
    users: &[String],
) -> Result<ChallengeRecord, Box<dyn std::error::Error>> {
    let habits = habits
        .iter()
        .map(|h| HabitId::new(*h))
        .collect::<Result<Vec<_>, _>>()?;
    let users = users
        .iter()
        .map(|u| UserId::new(u.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ChallengeRecord::new(
        ChallengeId::new(id)?,
        name,
        start,
        end,
        habits,
        users,
    )?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let invocation = parse_args(
        std::env::args().skip(1),
        std::env::var("CHALLENGES_DB_URL").ok(),
    )
    .map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let Invocation::Seed(args) = invocation else {
        print_usage();
        return Ok(());
    };

    let clock = args.now.map_or_else(Clock::default_clock, Clock::fixed);
    let gateway = SqliteGateway::open(&args.db_url, clock).await?;
    let today = clock.today();

    let challenges = [
        sample(
            "seed-morning-run",
            "Morning run streak",
            today - Duration::days(30),
            today - Duration::days(1),
            &["run"],
            &args.users,
        )?
        .with_before_photo(Some(MediaRef::new("seed/morning-run/before.jpg")?)),
        sample(
            "seed-no-sugar",
            "No sugar month",
            today - Duration::days(40),
            today - Duration::days(10),
            &["no-sugar", "water"],
            &args.users,
        )?
        .with_before_photo(Some(MediaRef::new("seed/no-sugar/before.jpg")?))
        .with_after_photo(Some(MediaRef::new("seed/no-sugar/after.jpg")?)),
        sample(
            "seed-reading",
            "Read 20 pages a day",
            today - Duration::days(3),
            today + Duration::days(27),
            &["read"],
            &args.users,
        )?,
    ];

    for challenge in &challenges {
        gateway.upsert_challenge(challenge).await?;
    }

    println!(
        "Seeded {} challenges for {} participant(s) into {}",
        challenges.len(),
        args.users.len(),
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
