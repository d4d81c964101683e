mod args;

use coach_core::model::{ContentId, ProgressRecord};
use serde::Serialize;
use services::{
    Advance, Clock, CoachServices, Destination, EnsureOutcome, LoadStatus, MilestoneOutcome,
    ProgressSummary,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::{Args, Command, prepare_sqlite_file, print_usage};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// One line per item on the learner's path.
#[derive(Serialize)]
struct PathLine {
    id: ContentId,
    title: String,
    content_type: &'static str,
    milestone: bool,
    status: Option<&'static str>,
    form: Option<bool>,
}

#[derive(Serialize)]
struct StatusReport {
    learner: String,
    stale: bool,
    summary: ProgressSummary,
    path: Vec<PathLine>,
}

fn status_report(services: &CoachServices, learner: &str) -> StatusReport {
    let snapshot = services.snapshot();
    let path = services
        .curriculum()
        .path()
        .iter()
        .map(|item| {
            let record = snapshot.get(item.id());
            PathLine {
                id: item.id().clone(),
                title: item.title().to_string(),
                content_type: item.content_type().as_str(),
                milestone: item.is_milestone(),
                status: record.map(|r| r.status().as_str()),
                form: item
                    .has_form()
                    .then(|| record.is_some_and(ProgressRecord::form_completed)),
            }
        })
        .collect();

    StatusReport {
        learner: learner.to_string(),
        stale: snapshot.is_stale(),
        summary: services.summary(),
        path,
    }
}

fn print_status(report: &StatusReport) {
    println!("learner {}", report.learner);
    if report.stale {
        println!("warning: progress could not be loaded; showing an empty view");
    }
    for line in &report.path {
        let status = line.status.unwrap_or("-");
        let form = match line.form {
            Some(true) => " [form done]",
            Some(false) => " [form pending]",
            None => "",
        };
        if line.milestone {
            println!("{} {} ({status})", line.id, line.title);
        } else {
            println!("  {:<24} {:<12} {status}{form}", line.id.as_str(), line.content_type);
        }
    }
    let s = &report.summary;
    println!(
        "{}/{} completed, {} in progress, {} not started ({:.1}%)",
        s.completed, s.total, s.in_progress, s.not_started, s.percent_complete
    );
}

fn describe_destination(destination: &Destination) -> String {
    match destination {
        Destination::Item { content_id } => format!("go to {content_id}"),
        Destination::Accomplishment { completed, next } => match next {
            Some(next) => format!("completed {completed}; next up {next}"),
            None => format!("completed {completed}; end of path"),
        },
        Destination::EndOfPath => "end of path".to_string(),
        Destination::StartOfPath => "start of path".to_string(),
    }
}

fn print_record(record: &ProgressRecord) {
    println!(
        "{} {} form={} rating={}",
        record.content_id(),
        record.status(),
        record.form_completed(),
        record
            .feedback_rating()
            .map_or_else(|| "-".to_string(), |r| r.value().to_string())
    );
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

/// Complete any milestone whose members are now all done.
async fn settle_milestones(services: &CoachServices, json: bool) {
    for (milestone, outcome) in services.reconcile_milestones().await {
        match outcome {
            Ok(MilestoneOutcome::Completed(_)) if !json => {
                println!("milestone {milestone} completed");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(milestone = %milestone, error = %err, "milestone not updated"),
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let Some(args) = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?
    else {
        print_usage();
        return Ok(());
    };

    prepare_sqlite_file(&args.db_url)?;
    let services = CoachServices::new_sqlite(&args.db_url, Clock::system()).await?;
    if let LoadStatus::Failed(err) = services.open_learner(args.learner.clone()).await? {
        tracing::warn!(error = %err, "continuing with an empty progress view");
    }
    if services.curriculum().is_empty() {
        eprintln!("no content found in {}; run the seed binary first", args.db_url);
    }

    let json = args.json;
    match args.command {
        Command::Status => {
            let report = status_report(&services, args.learner.as_str());
            emit(json, &report, print_status)?;
        }
        Command::Ensure(content_id) => {
            let record = match services.ensure_progress(&args.learner, &content_id).await? {
                EnsureOutcome::Existing(record) | EnsureOutcome::Upserted(record) => Some(record),
                EnsureOutcome::AlreadyAttempted => None,
            };
            emit(json, &record, |record| match record {
                Some(record) => print_record(record),
                None => println!("{content_id}: already attempted"),
            })?;
        }
        Command::Advance(content_id) => {
            let advance = services.advance(&content_id).await?;
            settle_milestones(&services, json).await;
            emit(json, &advance, |advance| match advance {
                Advance::Navigate { destination } => println!("{}", describe_destination(destination)),
                Advance::Blocked { warning } => println!("blocked: {warning}"),
            })?;
        }
        Command::Skip(content_id) => {
            let destination = services.skip(&content_id)?;
            emit(json, &destination, |d| println!("{}", describe_destination(d)))?;
        }
        Command::Previous(content_id) => {
            let destination = services.previous(&content_id)?;
            emit(json, &destination, |d| println!("{}", describe_destination(d)))?;
        }
        Command::Form(content_id) => {
            let record = services.mark_form_completed(&content_id).await?;
            emit(json, &record, print_record)?;
        }
        Command::Feedback {
            content_id,
            rating,
            text,
        } => {
            let record = services.submit_feedback(&content_id, rating, text).await?;
            emit(json, &record, print_record)?;
        }
        Command::Milestone(content_id) => {
            let status = services.milestone_status(&content_id)?;
            emit(json, &status, |status| {
                println!(
                    "{}: {}/{} members completed",
                    status.milestone,
                    status.completed.len(),
                    status.total()
                );
                for item in &status.incomplete {
                    println!("  remaining: {} {}", item.id(), item.title());
                }
            })?;
        }
    }

    services.close();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
