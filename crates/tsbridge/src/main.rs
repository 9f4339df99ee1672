//! tsbridge launcher
//!
//! Runs a query batch or a health check for one instance described by a
//! settings file and prints the response as JSON on stdout. Logs go to
//! `~/.tsbridge/logs` and to stderr.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use tsbridge::{Datasource, ServiceConfig};
use tsbridge_db::Driver;
use tsbridge_logging::{init_logging, LogConfig};
use tsbridge_protocol::defaults::{
    DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_INSTANCE_KEY, DEFAULT_POOL_SIZE,
};
use tsbridge_protocol::{
    CheckHealthRequest, DataQuery, InstanceSettings, PluginContext, QueryDataRequest,
};

#[derive(Parser, Debug)]
#[command(name = "tsbridge", about = "Run SQL and reshape the results into time-series frames")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a query batch and print the response
    Query {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Request file: `{"queries": [{"refId": ..., "json": {...}}]}`
        #[arg(long)]
        request: PathBuf,
    },
    /// Probe the instance and print the health result
    Health {
        #[command(flatten)]
        instance: InstanceArgs,
    },
}

#[derive(Args, Debug)]
struct InstanceArgs {
    /// Instance settings file: `{"name", "jsonData": {Host, Port, Database, User}}`
    #[arg(long)]
    settings: PathBuf,

    /// Instance password (overrides any password in the settings file)
    #[arg(long, env = "TSBRIDGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Backend driver
    #[arg(long, value_enum, default_value_t = DriverKind::Duckdb)]
    driver: DriverKind,

    /// Registered ODBC driver name (odbc backend only)
    #[arg(long, env = "TSBRIDGE_ODBC_DRIVER", default_value = "IBM DB2 ODBC DRIVER")]
    odbc_driver: String,

    /// Maximum physical sessions in the pool
    #[arg(long, env = "TSBRIDGE_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Seconds to wait for a free session (0 waits forever)
    #[arg(long, env = "TSBRIDGE_ACQUIRE_TIMEOUT", default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS)]
    acquire_timeout: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DriverKind {
    Duckdb,
    Odbc,
}

#[derive(Deserialize)]
struct RequestFile {
    #[serde(default)]
    queries: Vec<DataQuery>,
}

impl InstanceArgs {
    fn service_config(&self) -> ServiceConfig {
        let timeout = match self.acquire_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        ServiceConfig::default()
            .with_pool_size(self.pool_size)
            .with_acquire_timeout(timeout)
    }

    fn plugin_context(&self) -> Result<PluginContext> {
        let raw = read_file(&self.settings)?;
        let mut settings = InstanceSettings::from_json_str(&raw)
            .with_context(|| format!("Failed to parse settings {}", self.settings.display()))?;
        if let Some(password) = &self.password {
            settings = settings.with_password(password.clone());
        }
        Ok(PluginContext::new(DEFAULT_INSTANCE_KEY, settings))
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tsbridge")
        .build()
        .context("Failed to start async runtime")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_query<D: Driver>(driver: D, args: &InstanceArgs, request: &Path) -> Result<()> {
    let raw = read_file(request)?;
    let file: RequestFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse request {}", request.display()))?;
    let req = QueryDataRequest {
        plugin_context: args.plugin_context()?,
        queries: file.queries,
    };

    let datasource = Datasource::new(driver, args.service_config());
    let result = runtime()?.block_on(datasource.query_data(req));
    datasource.shutdown();

    let response = result?;
    info!(
        responses = response.len(),
        errors = response.error_count(),
        "Query batch finished"
    );
    print_json(&response)
}

fn run_health<D: Driver>(driver: D, args: &InstanceArgs) -> Result<()> {
    let req = CheckHealthRequest {
        plugin_context: args.plugin_context()?,
    };
    let datasource = Datasource::new(driver, args.service_config());
    let result = runtime()?.block_on(datasource.check_health(req));
    datasource.shutdown();

    let result = result?;
    print_json(&result)?;
    if !result.is_ok() {
        bail!("Health check reported {}", result.status);
    }
    Ok(())
}

fn with_driver(args: &InstanceArgs, command: &Commands) -> Result<()> {
    match args.driver {
        DriverKind::Duckdb => {
            #[cfg(feature = "duckdb")]
            {
                dispatch(tsbridge_db::DuckDbDriver, args, command)
            }
            #[cfg(not(feature = "duckdb"))]
            {
                Err(anyhow::anyhow!("tsbridge was built without the duckdb feature"))
            }
        }
        DriverKind::Odbc => {
            #[cfg(feature = "odbc")]
            {
                dispatch(tsbridge_db::OdbcDriver::new(args.odbc_driver.clone()), args, command)
            }
            #[cfg(not(feature = "odbc"))]
            {
                Err(anyhow::anyhow!(
                    "tsbridge was built without the odbc feature (driver '{}')",
                    args.odbc_driver
                ))
            }
        }
    }
}

fn dispatch<D: Driver>(driver: D, args: &InstanceArgs, command: &Commands) -> Result<()> {
    match command {
        Commands::Query { request, .. } => run_query(driver, args, request),
        Commands::Health { .. } => run_health(driver, args),
    }
}

fn run_command(cli: &Cli) -> Result<()> {
    let args = match &cli.command {
        Commands::Query { instance, .. } => instance,
        Commands::Health { instance } => instance,
    };
    with_driver(args, &cli.command)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(LogConfig {
        app_name: "tsbridge",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: {:#}", err);
            None
        }
    };

    match run_command(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_query_command() {
        let cli = Cli::try_parse_from([
            "tsbridge",
            "query",
            "--settings",
            "s.json",
            "--request",
            "r.json",
            "--pool-size",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Query { instance, request } => {
                assert_eq!(request, PathBuf::from("r.json"));
                assert_eq!(instance.pool_size, 4);
                assert_eq!(instance.driver, DriverKind::Duckdb);
                assert_eq!(instance.service_config().pool.max_connections, 4);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_zero_acquire_timeout_waits_forever() {
        let cli = Cli::try_parse_from([
            "tsbridge",
            "health",
            "--settings",
            "s.json",
            "--acquire-timeout",
            "0",
            "--driver",
            "odbc",
        ])
        .unwrap();
        match cli.command {
            Commands::Health { instance } => {
                assert_eq!(instance.driver, DriverKind::Odbc);
                assert_eq!(instance.service_config().pool.acquire_timeout, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_request_file_shape() {
        let file: RequestFile = serde_json::from_str(
            r#"{"queries": [{"refId": "A", "json": {"queryText": "select 1"}}]}"#,
        )
        .unwrap();
        assert_eq!(file.queries.len(), 1);
        assert_eq!(file.queries[0].ref_id, "A");
    }
}
