use std::{env, io::Read, net::SocketAddr};

use clap::{Args, Parser, Subcommand};
use http::Uri;
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::{
    runtime::Builder,
    signal,
    time::{self, Duration},
};
use tracegen::{
    config::{self, Config, Telemetry},
    exporter::{self, Endpoint},
    scenario::{self, connection, customer, follows, stress},
    signals::Shutdown,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load tracegen config: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to deserialize connection config: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("Tracegen scenario returned an error: {0}")]
    Scenario(#[from] scenario::Error),
    #[error("Tracegen failed to signal shutdown: {0}")]
    Shutdown(#[from] tracegen::signals::Error),
    #[error("Invalid collector endpoint: {0}")]
    Uri(#[from] http::uri::InvalidUri),
}

fn default_config_path() -> String {
    "/etc/tracegen/tracegen.yaml".to_string()
}

fn default_connection_config_path() -> String {
    "./cmd/connection-tester/config.yml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by every command that runs scenarios
#[derive(Args, Clone)]
struct RuntimeArgs {
    /// address to bind prometheus exporter to, overrides the configured
    /// telemetry
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 30)]
    max_shutdown_delay: u16,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenarios of a configuration file
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
    /// Send paced, partly late traces through an OTLP gRPC exporter
    Stress(StressCommand),
    /// Send traces through every supported exporter in turn
    Customer(CustomerCommand),
    /// Check ingest tokens against a Zipkin receiver
    Connection(ConnectionCommand),
    /// Send one trace with follows-from references over Jaeger
    Follows(FollowsCommand),
}

#[derive(Args)]
struct RunCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

#[derive(Args)]
struct StressCommand {
    /// OTLP gRPC endpoint of the collector
    #[clap(long, env = "OTLP_ENDPOINT", default_value = "localhost:55680")]
    otlp_endpoint: String,
    /// token sent as `sumo-token` metadata
    #[clap(long, env = "SUMO_TOKEN")]
    sumo_token: Option<String>,
    /// target rate
    #[clap(long, env = "SPANS_PER_MIN")]
    spans_per_min: u64,
    /// spans in each trace
    #[clap(long, env = "SPANS_PER_TRACE", default_value_t = 100)]
    spans_per_trace: u64,
    /// spans to send before exiting
    #[clap(long, env = "TOTAL_SPANS", default_value_t = 10_000_000)]
    total_spans: u64,
    /// seconds late traces are held open
    #[clap(long, env = "LATE_TRACE_DELAY_S", default_value_t = 8)]
    late_trace_delay_s: u64,
    /// every n-th trace is late
    #[clap(long, env = "LATE_TRACE_FREQ", default_value_t = 20)]
    late_trace_freq: u64,
    /// spans of each trace ended as soon as they are created
    #[clap(long, env = "LATE_TRACE_SPANS_CREATED_IMM", default_value_t = 50)]
    late_trace_spans_created_imm: u64,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args)]
struct CustomerCommand {
    /// host running the collector
    #[clap(
        long,
        env = "COLLECTOR_HOSTNAME",
        default_value = "collection-sumologic-otelcol.sumologic"
    )]
    collector_hostname: String,
    /// spans in each trace
    #[clap(long, env = "SPANS_PER_TRACE", default_value_t = 10)]
    spans_per_trace: u64,
    /// traces sent through each exporter
    #[clap(long, env = "TOTAL_TRACES", default_value_t = 1)]
    total_traces: u64,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args)]
struct ConnectionCommand {
    /// path on disk to the token list
    #[clap(long, default_value_t = default_connection_config_path())]
    config_path: String,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args)]
struct FollowsCommand {
    /// Jaeger collector endpoint
    #[clap(
        long,
        env = "JAEGER_ENDPOINT",
        default_value = "http://localhost:14268/api/traces"
    )]
    jaeger_endpoint: String,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

fn load_config_contents(config_path: &str) -> Result<String, Error> {
    if let Ok(env_var_value) = env::var("TRACEGEN_CONFIG") {
        debug!("Using config from env var 'TRACEGEN_CONFIG'");
        Ok(env_var_value)
    } else {
        debug!("Attempting to open configuration file at: {config_path}");
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .open(config_path)
            .map_err(|err| {
                error!("Could not read config file '{config_path}': {err}");
                err
            })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

fn parse_config(contents: &str) -> Result<Config, Error> {
    Config::parse(contents).map_err(|err| {
        error!("Configuration validation failed: {err}");
        Error::Config(err)
    })
}

fn validate_config(config_path: &str) -> Result<Config, Error> {
    let contents = load_config_contents(config_path)?;
    let config = parse_config(&contents)?;
    info!("Configuration file is valid");
    Ok(config)
}

fn single(inner: scenario::Inner) -> Config {
    Config {
        telemetry: None,
        seed: None,
        scenarios: vec![scenario::Config {
            general: scenario::General::default(),
            inner,
        }],
    }
}

/// Translate a command into the configuration it runs, along with its
/// runtime arguments. `None` for commands that do not run scenarios.
fn get_config(command: Commands) -> Result<Option<(Config, RuntimeArgs)>, Error> {
    let (config, runtime) = match command {
        Commands::ConfigCheck(_) => return Ok(None),
        Commands::Run(cmd) => (
            parse_config(&load_config_contents(&cmd.config_path)?)?,
            cmd.runtime,
        ),
        Commands::Stress(cmd) => {
            let mut endpoint = Endpoint::new(cmd.otlp_endpoint.parse::<Uri>()?);
            if let Some(token) = cmd.sumo_token.as_deref().filter(|t| !t.is_empty()) {
                endpoint = endpoint.with_header("sumo-token", token);
            }
            let inner = scenario::Inner::Stress(stress::Config {
                exporter: exporter::Config::OtlpGrpc(endpoint),
                spans_per_minute: cmd.spans_per_min,
                spans_per_trace: cmd.spans_per_trace,
                total_spans: cmd.total_spans,
                late_trace_delay_seconds: cmd.late_trace_delay_s,
                late_trace_frequency: cmd.late_trace_freq,
                spans_created_immediately: cmd.late_trace_spans_created_imm,
                service_name: "stress-tester".to_string(),
            });
            (single(inner), cmd.runtime)
        }
        Commands::Customer(cmd) => {
            let inner = scenario::Inner::Customer(customer::Config {
                collector_hostname: cmd.collector_hostname,
                spans_per_trace: cmd.spans_per_trace,
                total_traces: cmd.total_traces,
                exporters: None,
                span_delay_millis: tracegen::common::ConfRange::Inclusive { min: 10, max: 1000 },
                service_name: "customer-trace-test-service".to_string(),
            });
            (single(inner), cmd.runtime)
        }
        Commands::Connection(cmd) => {
            let contents = std::fs::read_to_string(&cmd.config_path).map_err(|err| {
                error!("Could not read config file '{}': {err}", cmd.config_path);
                err
            })?;
            let conf: connection::Config = serde_yaml::from_str(&contents)?;
            (single(scenario::Inner::Connection(conf)), cmd.runtime)
        }
        Commands::Follows(cmd) => {
            let inner = scenario::Inner::Follows(follows::Config {
                endpoint: cmd.jaeger_endpoint.parse()?,
            });
            (single(inner), cmd.runtime)
        }
    };
    Ok(Some((config, runtime)))
}

async fn inner_main(mut config: Config, prometheus_addr: Option<SocketAddr>) -> Result<(), Error> {
    if let Some(addr) = prometheus_addr {
        config.telemetry = Some(Telemetry::Prometheus {
            addr,
            global_labels: Default::default(),
        });
    }

    // Set up the telemetry sub-system. In log mode no recorder is installed
    // and metrics macros are no-ops.
    match config.telemetry.unwrap_or_default() {
        Telemetry::Prometheus {
            addr,
            global_labels,
        } => {
            let mut builder = PrometheusBuilder::new().with_http_listener(addr);
            for (k, v) in global_labels {
                builder = builder.add_global_label(k, v);
            }
            tokio::spawn(async move {
                if let Err(err) = builder.install() {
                    error!("failed to install prometheus recorder: {err}");
                }
            });
        }
        Telemetry::Log { .. } => {
            debug!("telemetry in log mode, no metrics recorder installed");
        }
    }

    let seed = config.seed.unwrap_or_else(|| rand::rng().random());
    let mut seeds = StdRng::from_seed(seed);
    let mut shutdown = Shutdown::new();

    let mut scenario_joinset = tokio::task::JoinSet::new();
    for cfg in config.scenarios {
        let server = scenario::Server::new(cfg, seeds.random(), shutdown.clone())?;
        scenario_joinset.spawn(server.run());
    }

    let mut interval = time::interval(Duration::from_millis(400));
    let mut interrupted = false;
    let mut res = Ok(());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                gauge!("tracegen.running").set(1.0);
            },
            _ = signal::ctrl_c(), if !interrupted => {
                info!("received ctrl-c");
                interrupted = true;
                shutdown.signal()?;
            },
            next = scenario_joinset.join_next() => {
                match next {
                    None => break,
                    Some(Ok(Ok(()))) => debug!("Scenario completed"),
                    Some(Ok(Err(err))) => {
                        error!("Scenario shut down unexpectedly: {err}");
                        if res.is_ok() {
                            res = Err(Error::Scenario(err));
                        }
                    }
                    Some(Err(err)) => error!("Could not join the spawned scenario task: {err}"),
                }
            },
        }
    }
    if !shutdown.try_recv() {
        shutdown.signal()?;
    }
    res
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting tracegen {version} run.");

    let cli = Cli::parse();
    if let Commands::ConfigCheck(ref cmd) = cli.command {
        match validate_config(&cmd.config_path) {
            Ok(_) => std::process::exit(0),
            Err(_) => std::process::exit(1),
        }
    }
    let Some((config, runtime_args)) = get_config(cli.command)? else {
        return Ok(());
    };
    let max_shutdown_delay = Duration::from_secs(runtime_args.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, runtime_args.prometheus_addr));
    if let Err(ref err) = res {
        warn!("tracegen exiting with error: {err}");
    }
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}
