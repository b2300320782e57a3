use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env, Target};
use log::{error, info, warn};
use rustls::crypto::{CryptoProvider, ring::default_provider};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use uvtapp::{
    api_client::ApiClient,
    config::AppConfig,
    connectivity::ConnectivityMonitor,
    enrollment::{EnrollmentGate, RemoteEnrollment, Route},
    error::Error,
    models::{EnrollmentForm, VisitHeader, VisitRecord},
    store::LocalStore,
    visits::VisitSubmissionPipeline,
};

/// Underground visit tracking device client
#[derive(Parser)]
#[command(name = "uvtapp", version = env!("CARGO_PKG_VERSION"), long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show where a session on this device begins
    Start,

    /// Enroll this device for an employee
    Enroll {
        #[arg(long)]
        employee_code: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        designation: String,
    },

    /// Print a pre-filled visit header as JSON
    Draft,

    /// Submit a JSON array of visit headers
    Submit {
        /// File holding the visit headers
        file: PathBuf,
    },

    /// Print the visit history of an employee
    History {
        /// Defaults to the last employee who submitted visits on this device
        employee_code: Option<String>,
    },

    /// Print the visit history again whenever connectivity comes back
    Watch {
        /// Defaults to the last employee who submitted visits on this device
        employee_code: Option<String>,
    },
}

type Pipeline = VisitSubmissionPipeline<ApiClient, ConnectivityMonitor>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    initialize()?;

    let config = AppConfig::load().context("failed to load configuration")?;
    let api = ApiClient::from_config(&config.api)?;
    let monitor = ConnectivityMonitor::from_config(&config.connectivity);
    let store = LocalStore::from_config(&config.paths);

    match cli.command {
        Command::Start => {
            let gate = EnrollmentGate::start(api, monitor, store.clone()).await;
            print_route(&gate.initial_route());

            if let Some(enrollment) = store.enrollment().await {
                println!(
                    "enrolled for {} {} ({}) since {}",
                    enrollment.first_name,
                    enrollment.last_name,
                    enrollment.employee_code,
                    enrollment.date_enrolled
                );
            }
        }
        Command::Enroll {
            employee_code,
            first_name,
            last_name,
            designation,
        } => {
            let mut gate = EnrollmentGate::start(api, monitor, store).await;
            let form = EnrollmentForm {
                employee_code,
                first_name,
                last_name,
                designation,
            };

            let outcome = report_invalid_fields(gate.submit_enrollment(form).await)?;
            match &outcome.remote {
                RemoteEnrollment::Accepted => println!("device enrolled"),
                RemoteEnrollment::Failed(e) => {
                    warn!("enrollment was not recorded remotely: {e}")
                }
                RemoteEnrollment::Skipped => println!("device is already enrolled"),
            }
            print_route(&outcome.route);

            let (Route::Visitors(context), Some(pipeline)) = (outcome.route, gate.into_pipeline())
            else {
                return Ok(());
            };
            if let Some(employee_code) = context.employee_code {
                match pipeline.fetch_history(&employee_code).await {
                    Ok(records) => print_history(&employee_code, &records)?,
                    Err(e) => warn!("history of {employee_code} not available: {e}"),
                }
            }
        }
        Command::Draft => {
            let pipeline = Pipeline::new(api, monitor, store);
            let draft = pipeline.draft_header().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&draft).context("failed to serialize draft")?
            );
        }
        Command::Submit { file } => {
            let headers = read_headers(&file).await?;
            let pipeline = Pipeline::new(api, monitor, store);
            report_invalid_fields(pipeline.submit(&headers).await)?;
            println!("{} visit(s) synchronized", headers.len());
        }
        Command::History { employee_code } => {
            let employee_code = resolve_employee_code(employee_code, &store).await?;
            let pipeline = Pipeline::new(api, monitor, store);
            print_history(&employee_code, &pipeline.fetch_history(&employee_code).await?)?;
        }
        Command::Watch { employee_code } => {
            let employee_code = resolve_employee_code(employee_code, &store).await?;
            let _polling = monitor.spawn_polling(config.connectivity.poll_interval);
            let pipeline = Arc::new(Pipeline::new(api, monitor, store));

            watch(pipeline, employee_code).await?;
        }
    }

    Ok(())
}

fn initialize() -> Result<()> {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));

    CryptoProvider::install_default(default_provider())
        .map_err(|_| anyhow::anyhow!("crypto provider already installed"))?;

    Ok(())
}

async fn watch(pipeline: Arc<Pipeline>, employee_code: String) -> Result<()> {
    let (_watch, mut results) = pipeline.watch_history(employee_code.clone());

    match pipeline.fetch_history(&employee_code).await {
        Ok(records) => print_history(&employee_code, &records)?,
        Err(e) => warn!("history not available yet: {e}"),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("stopping history watch");
                return Ok(());
            }
            result = results.recv() => match result {
                Some(Ok(records)) => print_history(&employee_code, &records)?,
                Some(Err(e)) => warn!("history refresh failed: {e}"),
                None => return Ok(()),
            },
        }
    }
}

/// Print one line per invalid field before failing.
fn report_invalid_fields<T>(result: uvtapp::error::Result<T>) -> Result<T> {
    if let Err(Error::Validation(errors)) = &result {
        for field_error in errors.errors() {
            eprintln!("{}: {}", field_error.field, field_error.message);
        }
    }
    Ok(result?)
}

async fn resolve_employee_code(given: Option<String>, store: &LocalStore) -> Result<String> {
    if let Some(code) = given.filter(|code| !code.trim().is_empty()) {
        return Ok(code);
    }

    match store.last_employee_code().await {
        Some(code) => Ok(code),
        None => bail!("no employee code given and none stored on this device"),
    }
}

async fn read_headers(file: &Path) -> Result<Vec<VisitHeader>> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse visit headers from {}", file.display()))
}

fn print_route(route: &Route) {
    match route {
        Route::Enrollment => println!("route: enrollment"),
        Route::Visitors(context) => println!("route: visitors ({})", context.display_code()),
    }
}

fn print_history(employee_code: &str, records: &[VisitRecord]) -> Result<()> {
    println!("{} visit record(s) for {employee_code}", records.len());
    println!(
        "{}",
        serde_json::to_string_pretty(records).context("failed to serialize history")?
    );
    Ok(())
}
