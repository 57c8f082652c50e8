//! Command-line front end and composition root for `subly_core`.
//!
//! # Responsibility
//! - Build every core component explicitly from config and flags.
//! - Map one subcommand to one coordinator operation and print the result.
//! - Wait for outstanding remote pushes before exiting.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use subly_core::db::{open_db, DbError};
use subly_core::service::budget_service;
use subly_core::{
    BillingCycle, ConfigError, CoordinatorDeps, CoordinatorError, CoreConfig,
    HttpRemoteConfig, HttpRemoteStore, InMemoryReminderCenter, LoggingError, OfflineRemoteStore,
    RemoteError, RemoteStore, ServiceCategory, SqliteLocalStore, Subscription,
    SubscriptionCoordinator, SubscriptionId, SystemClock,
};

#[derive(Parser)]
#[command(name = "subly")]
#[command(about = "Offline-first subscription tracker")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "SUBLY_DB", default_value = "subly.db")]
    db: PathBuf,

    /// TOML config file
    #[arg(long, env = "SUBLY_CONFIG")]
    config: Option<PathBuf>,

    /// Absolute directory for rolling log files; logging is off when unset
    #[arg(long, env = "SUBLY_LOG_DIR")]
    log_dir: Option<String>,

    /// trace|debug|info|warn|error
    #[arg(long, env = "SUBLY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Remote base URL (overrides `[remote] base_url`)
    #[arg(long, env = "SUBLY_REMOTE_URL")]
    remote_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List subscriptions in due-date order
    List {
        /// Include soft-deleted subscriptions
        #[arg(long)]
        all: bool,
    },
    /// Track a new subscription
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        amount: f64,
        /// First due date, YYYY-MM-DD
        #[arg(long, value_parser = parse_date)]
        due: NaiveDate,
        #[arg(long, value_parser = parse_cycle, default_value = "monthly")]
        cycle: BillingCycle,
        #[arg(long, value_parser = parse_category, default_value = "other")]
        category: ServiceCategory,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        custom_name: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        essential: bool,
    },
    /// Edit fields of a subscription
    Update {
        id: SubscriptionId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long, value_parser = parse_date)]
        due: Option<NaiveDate>,
        #[arg(long, value_parser = parse_cycle)]
        cycle: Option<BillingCycle>,
        #[arg(long, value_parser = parse_category)]
        category: Option<ServiceCategory>,
        #[arg(long)]
        essential: Option<bool>,
    },
    /// Soft-delete a subscription
    Delete { id: SubscriptionId },
    /// Undo a soft delete
    Reactivate { id: SubscriptionId },
    /// Delete a subscription permanently
    Purge { id: SubscriptionId },
    /// Roll the due date forward by one billing cycle
    Renew { id: SubscriptionId },
    /// Show where a subscription can be cancelled
    CancelInfo { id: SubscriptionId },
    /// Answer a weekly usage check
    Usage {
        id: SubscriptionId,
        /// The subscription was not used this week
        #[arg(long)]
        not_used: bool,
    },
    /// Reconcile with the remote store
    Refresh,
    /// Show or change the monthly budget
    Budget {
        #[arg(long)]
        limit: Option<f64>,
        /// Alert threshold in percent (50-100)
        #[arg(long)]
        notify: Option<f64>,
        #[arg(long, conflicts_with = "limit")]
        disable: bool,
    },
    /// List scheduled reminders
    Reminders,
    /// Spending statistics
    Stats,
    /// Remove all local data (remote data is kept)
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Logging(LoggingError),
    Db(DbError),
    Remote(RemoteError),
    Coordinator(CoordinatorError),
    Usage(String),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "database: {err}"),
            Self::Remote(err) => write!(f, "{err}"),
            Self::Coordinator(err) => write!(f, "{err}"),
            Self::Usage(message) => write!(f, "{message}"),
        }
    }
}

impl Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<LoggingError> for CliError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<DbError> for CliError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RemoteError> for CliError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<CoordinatorError> for CliError {
    fn from(value: CoordinatorError) -> Self {
        Self::Coordinator(value)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli
            .log_level
            .as_deref()
            .unwrap_or_else(|| subly_core::default_log_level());
        subly_core::init_logging(level, log_dir)?;
    }

    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    let coordinator = build_coordinator(&config, &cli.db, cli.remote_url.as_deref())?;
    coordinator.load_from_store().await;

    execute(&coordinator, cli.command).await?;
    coordinator.wait_for_pending_pushes().await;
    Ok(())
}

fn build_coordinator(
    config: &CoreConfig,
    db_path: &Path,
    remote_url: Option<&str>,
) -> Result<SubscriptionCoordinator, CliError> {
    let store = Arc::new(SqliteLocalStore::new(open_db(db_path)?));

    let remote_config = match remote_url {
        Some(url) => Some(HttpRemoteConfig {
            base_url: url.to_string(),
            auth_token: config.remote.auth_token.clone(),
            timeout: Duration::from_secs(config.remote.timeout_secs),
        }),
        None => config.http_remote(),
    };
    let remote: Arc<dyn RemoteStore> = match remote_config {
        Some(remote_config) => {
            info!(
                "event=cli_start module=cli status=ok remote=http base_url={}",
                remote_config.base_url
            );
            Arc::new(HttpRemoteStore::new(remote_config)?)
        }
        None => {
            info!("event=cli_start module=cli status=ok remote=offline");
            Arc::new(OfflineRemoteStore)
        }
    };

    Ok(SubscriptionCoordinator::new(CoordinatorDeps {
        records: store.clone(),
        settings: store,
        remote,
        reminders: Arc::new(InMemoryReminderCenter::new()),
        gate: Arc::new(config.add_gate()),
        catalog: Arc::new(config.cancellation_catalog()),
        clock: Arc::new(SystemClock),
        policy: config.reminder_policy()?,
        default_budget: config.default_budget(),
    }))
}

async fn execute(coordinator: &SubscriptionCoordinator, command: Command) -> Result<(), CliError> {
    match command {
        Command::List { all } => {
            let records = if all {
                coordinator.subscriptions().await
            } else {
                coordinator.active_subscriptions().await
            };
            if records.is_empty() {
                println!("no subscriptions");
            }
            for record in &records {
                print_record(record);
            }
        }
        Command::Add {
            name,
            amount,
            due,
            cycle,
            category,
            currency,
            custom_name,
            notes,
            essential,
        } => {
            let now = coordinator.now();
            let mut draft = Subscription::new(name, amount, at_midnight(due), now)
                .with_cycle(cycle)
                .with_category(category);
            if let Some(currency) = currency {
                draft.currency = currency;
            }
            draft.custom_name = custom_name;
            draft.notes = notes;
            draft.is_essential = essential;

            if let Some(impact) = coordinator.budget_impact(amount, cycle).await {
                if impact.will_exceed_budget {
                    println!(
                        "warning: new monthly total {:.2} exceeds budget {:.2}",
                        impact.new_total, impact.budget_limit
                    );
                }
            }
            let added = coordinator.add(draft).await?;
            println!("added {}", added.id);
        }
        Command::Update {
            id,
            name,
            amount,
            due,
            cycle,
            category,
            essential,
        } => {
            let mut record = coordinator
                .get(id)
                .await
                .ok_or(CoordinatorError::NotFound(id))?;
            if let Some(name) = name {
                record.service_name = name;
            }
            if let Some(amount) = amount {
                record.amount = amount;
            }
            if let Some(due) = due {
                record.next_billing_date = at_midnight(due);
            }
            if let Some(cycle) = cycle {
                record.billing_cycle = cycle;
            }
            if let Some(category) = category {
                record.category = category;
            }
            if let Some(essential) = essential {
                record.is_essential = essential;
            }
            let updated = coordinator.update(record).await?;
            println!("updated {}", updated.id);
        }
        Command::Delete { id } => {
            coordinator.delete(id).await?;
            println!("deleted {id} (reactivate to undo)");
        }
        Command::Reactivate { id } => {
            coordinator.reactivate(id).await?;
            println!("reactivated {id}");
        }
        Command::Purge { id } => {
            coordinator.permanent_delete(id).await?;
            println!("purged {id}");
        }
        Command::Renew { id } => {
            let renewed = coordinator.mark_renewed(id).await?;
            println!(
                "{} next due {}",
                renewed.id,
                renewed.next_billing_date.format("%Y-%m-%d")
            );
        }
        Command::CancelInfo { id } => match coordinator.cancellation_reference(id).await? {
            Some(reference) => println!("{reference}"),
            None => println!("no cancellation reference for {id}"),
        },
        Command::Usage { id, not_used } => {
            let count = coordinator.record_usage_response(id, !not_used).await?;
            println!("{id} not used {count} time(s)");
        }
        Command::Refresh => {
            let report = coordinator.refresh_data().await;
            coordinator.wait_for_pending_pushes().await;
            println!(
                "status={:?} records={} queued={} unconfirmed={} reminders={}",
                report.status,
                report.record_count,
                report.queued_pushes,
                coordinator.pending_uploads().await.len(),
                report.schedule.scheduled
            );
        }
        Command::Budget {
            limit,
            notify,
            disable,
        } => {
            if limit.is_some() || notify.is_some() || disable {
                let mut settings = coordinator.budget_settings().await;
                if disable {
                    settings.set_limit(None);
                } else if let Some(limit) = limit {
                    settings.set_limit(Some(limit));
                }
                if let Some(notify) = notify {
                    settings.set_notify_percentage(notify);
                }
                coordinator.update_budget_settings(settings).await;
            }
            print_budget(coordinator).await;
        }
        Command::Reminders => {
            for id in coordinator.scheduled_reminders().await {
                println!("{id}");
            }
        }
        Command::Stats => {
            let records = coordinator.subscriptions().await;
            println!(
                "monthly {:.2} / yearly {:.2}",
                budget_service::total_monthly_cost(&records),
                budget_service::total_yearly_cost(&records)
            );
            let counts = budget_service::count_by_category(&records);
            for (category, total) in budget_service::spending_by_category(&records) {
                println!(
                    "  {:<10} {:>8.2} ({} active)",
                    category.as_str(),
                    total,
                    counts.get(&category).copied().unwrap_or(0)
                );
            }
            for record in coordinator.upcoming_renewals().await {
                println!("upcoming: {}", record.display_name());
            }
            for suggestion in budget_service::saving_suggestions(&records) {
                println!("suggestion: {suggestion:?}");
            }
        }
        Command::Reset { yes } => {
            if !yes {
                return Err(CliError::Usage(
                    "reset removes all local data; pass --yes to confirm".to_string(),
                ));
            }
            coordinator.reset_all_data().await;
            println!("local data cleared");
        }
    }
    Ok(())
}

async fn print_budget(coordinator: &SubscriptionCoordinator) {
    let settings = coordinator.budget_settings().await;
    match coordinator.budget_status().await {
        Some(status) => println!(
            "spent {:.2} of {:.2} ({:.0}%, {:?}), alert at {:.0}%",
            status.current,
            status.limit,
            status.percentage,
            status.level,
            settings.notify_at_percentage
        ),
        None => println!(
            "no budget set; monthly total {:.2}",
            coordinator.total_monthly_cost().await
        ),
    }
}

fn print_record(record: &Subscription) {
    println!(
        "{}  {:<20} {:>10} {:<7} due {}{}{}",
        record.id,
        record.display_name(),
        record.cost_display(),
        record.billing_cycle.as_str(),
        record.next_billing_date.format("%Y-%m-%d"),
        if record.is_essential { "  essential" } else { "" },
        if record.is_active { "" } else { "  (deleted)" },
    );
}

fn at_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| format!("expected YYYY-MM-DD: {err}"))
}

fn parse_cycle(value: &str) -> Result<BillingCycle, String> {
    BillingCycle::parse(&value.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown billing cycle `{value}`; expected weekly|monthly|yearly"))
}

fn parse_category(value: &str) -> Result<ServiceCategory, String> {
    ServiceCategory::parse(&value.to_ascii_lowercase()).ok_or_else(|| {
        let known: Vec<&str> = ServiceCategory::ALL.iter().map(|c| c.as_str()).collect();
        format!("unknown category `{value}`; expected {}", known.join("|"))
    })
}
