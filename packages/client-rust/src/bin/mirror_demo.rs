//! Mirror demo: seeds an in-memory source from a fixture, routes the stored
//! profile, and keeps the unread and grade aggregates of one subject live
//! until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use schoolsync_client::telemetry::init_tracing;
use schoolsync_client::{
    Aggregate, ClientConfig, GradeAggregate, GradeSummary, InMemorySource, JsonProfileStore, LiveBinding,
    LogFormat, Mutation, RemoteSource, SubscriptionManager, UnreadAggregate, UnreadCounts,
};
use schoolsync_core::role::route_from_store;
use schoolsync_core::SubjectId;
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments for mirror-demo
#[derive(Parser, Debug)]
#[command(name = "mirror-demo")]
#[command(about = "Keeps unread counters and grade averages of one subject live")]
#[command(version)]
struct Args {
    /// Subject (user or student id) whose data is mirrored
    #[arg(short, long, env = "SCHOOLSYNC_SUBJECT")]
    subject: String,

    /// JSON fixture of the form { "collection": [ { "id": ..., ... } ] }
    #[arg(short, long, env = "SCHOOLSYNC_FIXTURE")]
    fixture: Option<PathBuf>,

    /// Persisted profile used for startup routing
    #[arg(short, long, env = "SCHOOLSYNC_PROFILE")]
    profile: Option<PathBuf>,

    /// Client configuration file (JSON)
    #[arg(short, long, env = "SCHOOLSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Screen to open regardless of role
    #[arg(long)]
    destination: Option<String>,

    /// Deep-link hint such as `section/grades`
    #[arg(long)]
    deep_link: Option<String>,

    /// Log filter directives, overriding the config file
    #[arg(long, env = "SCHOOLSYNC_LOG")]
    log_filter: Option<String>,

    /// Log output format, overriding the config file
    #[arg(long, value_enum, env = "SCHOOLSYNC_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Mark the subject's unread notifications as read after startup
    #[arg(long)]
    mark_read: bool,

    /// Print the initial state and exit instead of waiting for Ctrl-C
    #[arg(long)]
    once: bool,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_json_file(path)?,
            None => ClientConfig::default(),
        };
        if let Some(filter) = &self.log_filter {
            config.log.filter.clone_from(filter);
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.client_config()?;
    init_tracing(&config.log)?;

    let source = Arc::new(InMemorySource::new());
    if let Some(fixture) = &args.fixture {
        let loaded = source.load_fixture(fixture)?;
        info!(fixture = %fixture.display(), documents = loaded, "fixture loaded");
    }

    let profile_path = args
        .profile
        .clone()
        .unwrap_or_else(|| PathBuf::from("profile.json"));
    let profiles = JsonProfileStore::new(profile_path);
    let destination = route_from_store(
        args.destination.as_deref(),
        args.deep_link.as_deref(),
        &profiles,
    );
    info!(%destination, "startup route");

    let manager = Arc::new(SubscriptionManager::new(
        Arc::clone(&source) as Arc<dyn RemoteSource>
    ));
    let subject = SubjectId::new(args.subject.clone());

    let unread = LiveBinding::new(
        Arc::clone(&manager),
        UnreadAggregate::from_config(&config.collections),
    );
    let grades = LiveBinding::new(
        Arc::clone(&manager),
        GradeAggregate::from_config(&config.collections, &config.grade_fields),
    );

    let unread_changes = unread.store().subscribe_to_changes(log_unread);
    let grade_changes = grades.store().subscribe_to_changes(log_grades);

    unread.bind(&subject);
    grades.bind(&subject);
    log_unread(&unread.store().current());
    log_grades(&grades.store().current());

    if args.mark_read {
        mark_notifications_read(source.as_ref(), &unread, &subject).await;
    }

    if !args.once {
        info!(%subject, "mirroring; press Ctrl-C to stop");
        signal::ctrl_c()
            .await
            .context("installing Ctrl-C handler")?;
        info!("received Ctrl-C, shutting down");
    }

    unread_changes.unsubscribe();
    grade_changes.unsubscribe();
    unread.teardown();
    grades.teardown();
    manager.shutdown();
    source.close();
    info!("shutdown complete");
    Ok(())
}

async fn mark_notifications_read(
    source: &InMemorySource,
    unread: &LiveBinding<UnreadAggregate>,
    subject: &SubjectId,
) {
    let Some((_, query)) = unread.store().aggregate().queries(subject).into_iter().next() else {
        return;
    };
    let snapshot = match source.get(&query).await {
        Ok(snapshot) => snapshot,
        Err(error) => {
            warn!(%error, "could not read unread notifications");
            return;
        }
    };
    for doc in &snapshot {
        let mutation = Mutation::mark_read(query.collection_name(), doc.id.clone());
        if let Err(error) = source.mutate(mutation).await {
            warn!(id = %doc.id, %error, "mark as read failed");
        }
    }
    info!(marked = snapshot.size(), "marked notifications read");
}

fn log_unread(counts: &UnreadCounts) {
    info!(
        notifications = ?counts.notifications,
        messages = ?counts.messages,
        total = counts.total(),
        "unread counts"
    );
}

fn log_grades(summary: &GradeSummary) {
    match summary {
        GradeSummary::Loading => info!("grades loading"),
        GradeSummary::Ready {
            weighted_average,
            per_document,
            unresolved,
        } => info!(
            average = ?weighted_average,
            documents = per_document.len(),
            unresolved,
            "grade summary"
        ),
        GradeSummary::Failed(error) => warn!(%error, hint = error.user_message(), "grades unavailable"),
    }
}
