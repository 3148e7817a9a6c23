use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use courier::{
    Courier, CourierBuilder, FinalStatus, MailingId, OwnerId, SqliteRepositoryProvider,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line interface for Courier
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(long, env = "COURIER_DATABASE_URL", default_value = "sqlite://courier.db")]
    database_url: String,

    /// Maximum number of sends in flight for one mailing
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Per-recipient send timeout in seconds
    #[arg(long, default_value_t = 30)]
    send_timeout_secs: u64,

    /// Seconds a worker holds a recipient; must exceed the send timeout
    #[arg(long, default_value_t = 300)]
    reservation_lease_secs: i64,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(clap::Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Fail expired mailings and execute every due one, once
    RunDue,
    /// Run the scheduler until interrupted
    Serve {
        /// Seconds between scheduler ticks
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Execute one mailing whose window is open
    Execute {
        mailing_id: String,
        /// Send even though the scheduled start has not been reached
        #[arg(long)]
        early: bool,
    },
    /// Force a mailing to a final status
    ForceFinish {
        mailing_id: String,
        /// `completed` or `failed`
        #[arg(long)]
        status: FinalStatus,
    },
    /// Print delivery statistics for an owner
    Stats { owner_id: String },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=info,courier_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let interval = match &cli.command {
        Commands::Version => {
            println!("Courier v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Migrate => {
            println!("Running migrations...");
            let courier = connect(&cli, false, None).await?;
            courier.migrate().await?;
            println!("Migrations applied");
            return Ok(());
        }
        Commands::Serve { interval_secs } => Some(Duration::from_secs(*interval_secs)),
        _ => None,
    };

    let courier = connect(&cli, true, interval).await?;

    match cli.command {
        Commands::RunDue => {
            let report = courier.run_due().await?;
            for id in &report.expired {
                println!("{id}\twindow missed");
            }
            for result in &report.executed {
                println!(
                    "{}\t{}\tattempted={} succeeded={} failed={}",
                    result.mailing_id,
                    result.status,
                    result.attempted,
                    result.succeeded,
                    result.failed
                );
            }
            for (id, error) in &report.errors {
                println!("{id}\terror: {error}");
            }
        }
        Commands::Serve { .. } => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = courier.start_scheduler(shutdown_rx);
            tracing::info!("Scheduler running, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            shutdown_tx.send(true)?;
            handle.await?;
        }
        Commands::Execute { mailing_id, early } => {
            let id = MailingId::new(&mailing_id);
            let result = if early {
                courier.execute(&id).await?
            } else {
                courier.execute_in_window(&id).await?
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::ForceFinish { mailing_id, status } => {
            let mailing = courier
                .force_finish(&MailingId::new(&mailing_id), status)
                .await?;
            println!("{}\t{}", mailing.id, mailing.status);
        }
        Commands::Stats { owner_id } => {
            let summary = courier.stats(&OwnerId::new(&owner_id)).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate | Commands::Version => {}
    }

    Ok(())
}

/// Open storage and build a Courier with the transport from the environment.
async fn connect(
    cli: &Cli,
    apply_migrations: bool,
    tick_interval: Option<Duration>,
) -> Result<Courier<SqliteRepositoryProvider>, Box<dyn std::error::Error>> {
    let mut builder = CourierBuilder::new()
        .with_sqlite(&cli.database_url)
        .await?
        .with_mailer_from_env()?
        .with_concurrency(cli.concurrency)
        .with_send_timeout(Duration::from_secs(cli.send_timeout_secs))
        .with_reservation_lease(chrono::Duration::seconds(cli.reservation_lease_secs))
        .apply_migrations(apply_migrations);

    if let Some(interval) = tick_interval {
        builder = builder.with_scheduler_config(courier::SchedulerConfig {
            tick_interval: interval,
            ..Default::default()
        });
    }

    Ok(builder.build().await?)
}
