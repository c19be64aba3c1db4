use crate::backend::DefaultBackend;
use clap::{Args, Parser, Subcommand};
use futures_util::join;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod api;
mod backend;
mod config;
mod database;
mod logging;
mod release;
#[cfg(test)]
pub mod test_utils;

pub type Backend = Arc<DefaultBackend>;

#[derive(Parser, Debug)]
#[clap(author, about, version)]
pub struct Opts {
    #[clap(subcommand)]
    pub sub_command: MainOperation,

    #[clap(flatten)]
    pub logging_opts: logging::LoggingOpts,

    #[clap(flatten)]
    pub runtime_args: logging::RuntimeArgs,
}

#[derive(Subcommand, Debug)]
pub enum MainOperation {
    /// Run the webhook receiver and the release worker
    #[clap(name = "serve")]
    RunWebServer(RunWebServerArgs),

    /// Create the state database tables
    #[clap(name = "db-migrate")]
    DatabaseMigration(RunDatabaseMigrationsArgs),
}

#[derive(Args, Debug)]
pub struct RunWebServerArgs {
    /// Account used to upload packages
    #[clap(long = "hackage-user", env = "HACKAGE_USER")]
    hackage_user: String,

    /// Password for the upload account
    #[clap(long = "hackage-password", env = "HACKAGE_PASSWORD", hide_env_values = true)]
    hackage_password: String,

    /// Package index to upload to
    #[clap(
        long = "hackage-url",
        env = "HACKAGE_URL",
        default_value("https://hackage.haskell.org")
    )]
    hackage_url: String,

    /// Directory holding the database and the release work area
    #[clap(long = "state-dir", env = "HACKAGESHIP_STATE_DIR")]
    state_dir: PathBuf,

    /// Database Connection String, defaults to a SQLite file in the state directory
    #[clap(long = "database-url", env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Address to expose the main API on
    #[clap(long = "server-address", env = "SERVER_ADDRESS", default_value("127.0.0.1:3030"))]
    server_address: String,

    /// Address to expose metrics and status on
    #[clap(long = "admin-address", env = "ADMIN_ADDRESS", default_value("127.0.0.1:3031"))]
    admin_address: String,

    /// Release jobs that may wait for the worker before webhooks block
    #[clap(long = "queue-capacity", env = "QUEUE_CAPACITY", default_value("100"))]
    queue_capacity: usize,

    /// Limit for each clone, checkout, build and upload step
    #[clap(long = "step-timeout-secs", env = "STEP_TIMEOUT_SECS", default_value("1800"))]
    step_timeout_secs: u64,
}

#[derive(Args, Debug)]
pub struct RunDatabaseMigrationsArgs {
    /// Directory holding the database
    #[clap(long = "state-dir", env = "HACKAGESHIP_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Database Connection String
    #[clap(long = "database-url", env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    human_panic::setup_panic!();
    dotenv::dotenv().ok();

    let opt = Opts::parse();

    logging::configure_logging(&opt.logging_opts, &opt.runtime_args)?;

    match opt.sub_command {
        MainOperation::RunWebServer(args) => run_webserver(args).await,
        MainOperation::DatabaseMigration(args) => run_db_migration(args).await,
    }
}

async fn run_db_migration(args: RunDatabaseMigrationsArgs) -> Result<(), anyhow::Error> {
    let database_url = match (args.database_url, args.state_dir) {
        (Some(url), _) => url,
        (None, Some(state_dir)) => {
            config::check_state_dir(&state_dir)?;
            config::default_database_url(&state_dir)
        }
        (None, None) => anyhow::bail!("Either --database-url or --state-dir is required"),
    };

    database::StateDatabase::open(database_url).await?;
    Ok(())
}

async fn run_webserver(args: RunWebServerArgs) -> Result<(), anyhow::Error> {
    use crate::config::ServerConfig;
    use crate::release::{
        release_queue, CabalToolchain, CommandRunner, HackageUploader, ReleaseWorker,
    };
    use std::convert::TryFrom;
    use warp::Filter;

    let config = ServerConfig::try_from(args)?;
    info!(
        state_dir = %config.state_dir.display(),
        index = %config.index_url,
        queue_capacity = config.queue_capacity,
        "Starting hackageship"
    );

    tokio::fs::create_dir_all(&config.work_dir).await?;

    let (queue, receiver) = release_queue(config.queue_capacity);
    let backend = Arc::new(DefaultBackend::new(&config.database_url, queue).await?);

    let toolchain = CabalToolchain::new(CommandRunner::new(Some(config.step_timeout)));
    let uploader = HackageUploader::new(
        &config.index_url,
        config.credentials.clone(),
        Some(config.step_timeout),
    )?;
    let worker = ReleaseWorker::new(
        backend.clone(),
        Arc::new(toolchain),
        Arc::new(uploader),
        config.work_dir.clone(),
    );

    match worker.purge_stale_workspaces().await {
        Ok(0) => {}
        Ok(removed) => info!("Removed {} abandoned workspaces", removed),
        Err(e) => warn!("Unable to clean {}: {}", config.work_dir.display(), e),
    }
    let worker = worker.spawn(receiver);

    let filters = api::create_filters(backend).await;
    let api_server = warp::serve(filters).run(config.server_address);

    let admin_server = warp::path("metrics")
        .map(api::metrics::metrics_endpoint)
        .or(warp::path("status").map(|| "OK"))
        .with(warp::trace::request());
    let admin_server = warp::serve(admin_server).run(config.admin_address);

    let (_main, _admin, worker) = join!(api_server, admin_server, worker);
    if let Err(e) = worker {
        error!("Release worker stopped unexpectedly: {}", e);
    }

    Ok(())
}
