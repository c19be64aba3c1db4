use crate::release::IndexCredentials;
use crate::RunWebServerArgs;
use std::convert::TryFrom;
use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DATABASE_FILE: &str = "hackageship.db";
pub const WORK_DIR: &str = "work";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--{flag} is required and must not be empty")]
    MissingCredential { flag: &'static str },
    #[error("State directory {} does not exist", path.display())]
    MissingStateDir { path: PathBuf },
    #[error("State directory {} is not a directory", path.display())]
    StateDirNotADirectory { path: PathBuf },
    #[error("--{flag} value '{value}' is not a valid address: {source}")]
    BadAddress {
        flag: &'static str,
        value: String,
        source: AddrParseError,
    },
    #[error("--queue-capacity must be at least 1")]
    EmptyQueue,
    #[error("--step-timeout-secs must be at least 1")]
    NoStepTimeout,
}

/// Everything the server needs, checked before any listener or worker
/// starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub credentials: IndexCredentials,
    pub index_url: String,
    pub state_dir: PathBuf,
    pub work_dir: PathBuf,
    pub database_url: String,
    pub server_address: SocketAddr,
    pub admin_address: SocketAddr,
    pub queue_capacity: usize,
    pub step_timeout: Duration,
}

/// SQLite URL for the state database kept inside `state_dir`. `mode=rwc`
/// creates the file on first start.
pub fn default_database_url(state_dir: &Path) -> String {
    format!(
        "sqlite://{}?mode=rwc",
        state_dir.join(DATABASE_FILE).display()
    )
}

fn required(flag: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingCredential { flag })
    } else {
        Ok(value)
    }
}

fn parse_address(flag: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|source| ConfigError::BadAddress {
        flag,
        value: value.to_owned(),
        source,
    })
}

pub fn check_state_dir(path: &Path) -> Result<(), ConfigError> {
    match std::fs::metadata(path) {
        Err(_) => Err(ConfigError::MissingStateDir {
            path: path.to_owned(),
        }),
        Ok(metadata) if !metadata.is_dir() => Err(ConfigError::StateDirNotADirectory {
            path: path.to_owned(),
        }),
        Ok(_) => Ok(()),
    }
}

impl TryFrom<RunWebServerArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: RunWebServerArgs) -> Result<Self, Self::Error> {
        let user = required("hackage-user", args.hackage_user)?;
        let password = required("hackage-password", args.hackage_password)?;

        check_state_dir(&args.state_dir)?;

        let server_address = parse_address("server-address", &args.server_address)?;
        let admin_address = parse_address("admin-address", &args.admin_address)?;

        if args.queue_capacity == 0 {
            return Err(ConfigError::EmptyQueue);
        }
        if args.step_timeout_secs == 0 {
            return Err(ConfigError::NoStepTimeout);
        }

        let database_url = args
            .database_url
            .unwrap_or_else(|| default_database_url(&args.state_dir));

        Ok(Self {
            credentials: IndexCredentials { user, password },
            index_url: args.hackage_url,
            work_dir: args.state_dir.join(WORK_DIR),
            state_dir: args.state_dir,
            database_url,
            server_address,
            admin_address,
            queue_capacity: args.queue_capacity,
            step_timeout: Duration::from_secs(args.step_timeout_secs),
        })
    }
}
