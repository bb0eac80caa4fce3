//! Starts a node running one application: a supervisor with a registered
//! counter server and a ticker. The counter is killed a few times to show
//! the supervisor restarting it under the same name.

use async_trait::async_trait;
use beamless::application::{AppConfig, AppSpec, Application, StartResult};
use beamless::config::NodeConfig;
use beamless::gen_server::{self, CallResult, CastResult, From, GenServer, InitResult, StartOpts};
use beamless::node::Node;
use beamless::supervisor::{
    self, ChildSpec, StartArgs, StartError, Strategy, Supervisor, SupervisorFlags, SupervisorSpec,
};
use beamless::runtime::{self, RecvError};
use beamless::{ExitReason, RuntimeHandle};
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Parser)]
#[command(about)]
struct Cli {
    /// Enable verbose output. (Specify twice for more verbosity.)
    #[arg(short = 'v', long, action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,

    /// Node name, `name@host`. Overrides BEAMLESS_NODE_NAME.
    #[arg(long)]
    name: Option<String>,

    /// How many times to kill the counter.
    #[arg(long, default_value_t = 3)]
    kills: u32,

    /// Milliseconds between ticks sent to the counter.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

const COUNTER: &str = "counter";

struct Counter;

#[derive(Serialize, Deserialize)]
enum CounterCall {
    Get,
}

#[async_trait]
impl GenServer for Counter {
    type State = u64;
    type InitArg = ();
    type Call = CounterCall;
    type Cast = u64;
    type Reply = u64;

    async fn init(_: ()) -> InitResult<u64> {
        InitResult::ok(0)
    }

    async fn handle_call(_: CounterCall, _from: From, count: &mut u64) -> CallResult<u64> {
        CallResult::reply(*count)
    }

    async fn handle_cast(by: u64, count: &mut u64) -> CastResult {
        *count += by;
        CastResult::NoReply
    }

    async fn terminate(reason: &ExitReason, count: &mut u64) {
        tracing::info!(%reason, count = *count, "counter stopping");
    }
}

struct Tree;

impl Supervisor for Tree {
    type InitArg = Duration;

    fn init(tick: Duration) -> SupervisorSpec {
        let counter = ChildSpec::new(COUNTER, |args: StartArgs| async move {
            let opts = StartOpts::new().link(args.supervisor).name(COUNTER);
            Ok(gen_server::start_opts::<Counter>(&args.runtime, (), opts).await?)
        });
        let ticker = ChildSpec::new("ticker", move |args: StartArgs| async move {
            let runtime = args.runtime.clone();
            Ok(args.runtime.spawn_link(args.supervisor, move || async move {
                loop {
                    // The counter may be between restarts.
                    let _ = gen_server::cast::<Counter>(&runtime, COUNTER, 1);
                    match runtime::recv_timeout(tick).await {
                        Ok(message) => tracing::debug!(?message, "ticker ignoring message"),
                        Err(RecvError::Timeout) => {}
                        Err(RecvError::Closed) => break,
                    }
                }
            }))
        });

        let flags = SupervisorFlags::new(Strategy::OneForOne)
            .max_restarts(5)
            .max_time(Duration::from_secs(10));
        SupervisorSpec::new(flags, vec![counter, ticker])
    }
}

struct Counters;

#[async_trait]
impl Application for Counters {
    fn spec() -> AppSpec {
        AppSpec::new("counters").description("a counter fed by a ticker")
    }

    async fn start(runtime: &RuntimeHandle, config: &AppConfig) -> Result<StartResult, StartError> {
        let tick_ms = config.get_int("tick_ms").unwrap_or(100).max(1) as u64;
        let pid = supervisor::start::<Tree>(runtime, Duration::from_millis(tick_ms)).await?;
        Ok(StartResult::Supervisor(pid))
    }
}

#[tokio::main]
async fn main() -> Result<(), beamless::Error> {
    let cli = Cli::parse();
    beamless::logging::init_with_default(cli.log_level());

    let mut config = NodeConfig::from_env()?;
    if let Some(name) = &cli.name {
        config = config.name(name.as_str());
    }
    let node = Node::start(config)?;
    let rt = node.runtime().clone();

    node.applications().register::<Counters>();
    let app_config = AppConfig::new().set("tick_ms", (cli.tick_ms as i64).into());
    node.applications().start_with_config("counters", app_config).await?;

    for round in 1..=cli.kills {
        tokio::time::sleep(Duration::from_millis(cli.tick_ms * 5)).await;
        let Some(counter) = rt.registry().whereis(COUNTER) else {
            tracing::warn!(round, "counter is not registered");
            continue;
        };
        match gen_server::call::<Counter>(&rt, counter, CounterCall::Get, node.call_timeout()).await {
            Ok(count) => tracing::info!(round, %counter, count, "killing counter"),
            Err(error) => tracing::warn!(round, %counter, %error, "counter did not answer"),
        }
        rt.exit(counter, ExitReason::Killed);
        rt.join(counter).await;
    }

    tokio::time::sleep(Duration::from_millis(cli.tick_ms * 5)).await;
    if let Some(counter) = rt.registry().whereis(COUNTER) {
        let count = gen_server::call::<Counter>(&rt, counter, CounterCall::Get, node.call_timeout()).await?;
        tracing::info!(%counter, count, "counter after restarts");
    }

    let report = node.stop().await;
    tracing::info!(graceful = report.graceful, forced = report.forced, "done");
    Ok(())
}
