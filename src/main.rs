//! cljw CLI
//!
//! Entry point for the `cljw` worker binary. With `--persistent_worker` it
//! serves requests from stdin until end of input; otherwise the remaining
//! arguments form one request.

use clap::Parser;
use serde_json::{json, Value};
use std::env;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

use cljw::config::{deep_merge, EffectiveConfig};
use cljw::{ephemeral, logging};
use cljw_worker::{
    fingerprint_locations, DigestMap, Dispatcher, ProcessEnvironmentFactory, WorkerConfig,
    WorkerLoop,
};

/// Environment variable naming the config file when `--config` is absent.
const CONFIG_ENV: &str = "CLJW_CONFIG";

#[derive(Parser)]
#[command(name = "cljw")]
#[command(about = "Persistent Clojure compile worker", version)]
struct Cli {
    /// Serve work requests from stdin until end of input
    #[arg(long = "persistent_worker")]
    persistent_worker: bool,

    /// Path to a TOML config file (default: $CLJW_CONFIG)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Retries allowed after a restart signal
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Guest host program and arguments, comma-separated
    #[arg(long, value_delimiter = ',')]
    guest_command: Option<Vec<String>>,

    /// The worker's own classpath for the tooling environment, colon-separated
    #[arg(long, value_delimiter = ':')]
    tooling_classpath: Option<Vec<String>>,

    /// Tracing filter directives (overridden by $CLJW_LOG)
    #[arg(long)]
    log_filter: Option<String>,

    /// Skip the packaging step
    #[arg(long)]
    no_package: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Request arguments for ephemeral mode (`@flagfile` is expanded)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    /// The CLI configuration layer, if any flag sets a value.
    fn overrides(&self) -> Option<Value> {
        let mut layer = json!({});
        if let Some(max_restarts) = self.max_restarts {
            layer = deep_merge(layer, json!({"worker": {"max-restarts": max_restarts}}));
        }
        if let Some(command) = &self.guest_command {
            layer = deep_merge(layer, json!({"worker": {"guest": {"command": command}}}));
        }
        if let Some(classpath) = &self.tooling_classpath {
            layer = deep_merge(
                layer,
                json!({"worker": {"guest": {"tooling-classpath": classpath}}}),
            );
        }
        if let Some(filter) = &self.log_filter {
            layer = deep_merge(layer, json!({"logging": {"filter": filter}}));
        }
        if self.no_package {
            layer = deep_merge(layer, json!({"worker": {"entry-points": {"package": ""}}}));
        }
        (layer != json!({})).then_some(layer)
    }
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));
    let effective = match EffectiveConfig::build(config_path.as_deref(), cli.overrides()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(2);
        }
    };

    if cli.print_config {
        match effective.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing config: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let sources = effective.sources.len();
    let settings = effective.into_settings();
    logging::init(&settings.logging);
    info!(
        sources,
        persistent = cli.persistent_worker,
        "cljw {}",
        env!("CARGO_PKG_VERSION")
    );

    let tooling_key = match tooling_key(&settings.worker) {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "cannot fingerprint tooling classpath");
            process::exit(1);
        }
    };

    let factory = ProcessEnvironmentFactory::new(&settings.worker);
    let dispatcher = Dispatcher::new(settings.worker, factory).with_tooling_key(tooling_key);

    if cli.persistent_worker {
        run_persistent(dispatcher);
    } else {
        run_ephemeral(dispatcher, &cli.args);
    }
}

/// Digests of the tooling archives, taken once at startup.
fn tooling_key(config: &WorkerConfig) -> std::io::Result<DigestMap> {
    if !config.guest.fingerprint_tooling {
        return Ok(DigestMap::new());
    }
    let key = fingerprint_locations(&config.guest.tooling_classpath)?;
    info!(archives = key.len(), "tooling classpath fingerprinted");
    Ok(key)
}

fn run_persistent(dispatcher: Dispatcher<ProcessEnvironmentFactory>) {
    let mut worker = WorkerLoop::new(dispatcher);
    if let Err(e) = worker.run() {
        error!(error = %e, "request stream failed");
        process::exit(1);
    }
}

fn run_ephemeral(mut dispatcher: Dispatcher<ProcessEnvironmentFactory>, args: &[String]) {
    let arguments = match ephemeral::expand_flagfiles(args) {
        Ok(arguments) => arguments,
        Err(e) => {
            error!(error = %e, "cannot read arguments");
            process::exit(1);
        }
    };

    let response = ephemeral::run_once(&mut dispatcher, arguments);
    if !response.output.is_empty() {
        eprint!("{}", response.output);
    }
    process::exit(response.exit_code);
}
