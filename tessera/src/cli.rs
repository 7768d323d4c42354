use crate::config::{init_config, server_config};
use anyhow::{Context, bail};
use clap::{Args, Parser};
use std::time::Duration;
use tessera_rpc::{
    Address, CallFuture, Client, EventLoop, Server,
    config::{ClientConfig, RpcConfig},
    diagnostics::{self, Diagnostics, DiagnosticsState, DiagnosticsStub, EchoMessage, SumRequest},
};
use tracing::info;

#[derive(Parser)]
#[command(name = "tessera", about = "Serve or probe the tessera diagnostics service")]
pub enum Cli {
    /// Runs the diagnostics service until Ctrl-C.
    Serve(ServeArgs),
    /// Sends MESSAGE to a peer and prints the echo.
    Echo(EchoArgs),
    /// Asks a peer to add four numbers.
    Sum(SumArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub listen: Option<String>,
    #[arg(long)]
    pub workers: Option<usize>,
    /// How long the `delay` method waits before replying.
    #[arg(long, default_value_t = 3000)]
    pub delay_ms: u64,
}

#[derive(Args)]
pub struct EchoArgs {
    pub addr: String,
    pub message: String,
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Args)]
#[command(allow_negative_numbers = true)]
pub struct SumArgs {
    pub addr: String,
    pub x1: i32,
    pub x2: i64,
    pub x3: f64,
    pub x4: f32,
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = init_config()?;
    match cli {
        Cli::Serve(args) => serve(args, &config),
        Cli::Echo(args) => {
            println!("{}", echo(args, &config)?);
            Ok(())
        }
        Cli::Sum(args) => {
            println!("{}", sum(args, &config)?);
            Ok(())
        }
    }
}

pub fn start_server(args: ServeArgs, config: &RpcConfig) -> anyhow::Result<Server> {
    let state = DiagnosticsState::new(Duration::from_millis(args.delay_ms));
    let config = server_config(config, args.listen, args.workers);
    let server = Server::bind(diagnostics::service(state), config)?;
    server.start()?;
    Ok(server)
}

fn serve(args: ServeArgs, config: &RpcConfig) -> anyhow::Result<()> {
    let server = start_server(args, config)?;
    println!("listening on {}", server.listen_address());

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;

    info!("interrupted, shutting down");
    server.shutdown();
    Ok(())
}

pub fn echo(args: EchoArgs, config: &RpcConfig) -> anyhow::Result<String> {
    let response = with_stub(&args.addr, &config.client, |stub| {
        let future = CallFuture::new();
        stub.echo(future.controller(), &EchoMessage::new(args.message), future.clone());
        wait(&future, args.timeout_ms)
    })?;
    Ok(response.message)
}

pub fn sum(args: SumArgs, config: &RpcConfig) -> anyhow::Result<f64> {
    let request = SumRequest {
        x1: args.x1,
        x2: args.x2,
        x3: args.x3,
        x4: args.x4,
    };
    let response = with_stub(&args.addr, &config.client, |stub| {
        let future = CallFuture::new();
        stub.sum(future.controller(), &request, future.clone());
        wait(&future, args.timeout_ms)
    })?;
    Ok(response.result)
}

/// Connects, runs `f` and tears the connection down again.
fn with_stub<T>(
    addr: &str,
    config: &ClientConfig,
    f: impl FnOnce(&DiagnosticsStub) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let address = addr.parse::<Address>().with_context(|| format!("bad address `{addr}`"))?;
    let event_loop = EventLoop::new("tessera-client", config.io_threads)?;
    let result = Client::<Diagnostics>::new(address, &event_loop, config.clone())
        .map_err(anyhow::Error::from)
        .and_then(|client| f(&DiagnosticsStub::from(client.stub())));
    event_loop.shutdown();
    result
}

fn wait<T: Clone>(future: &CallFuture<T>, timeout_ms: u64) -> anyhow::Result<T> {
    let response = future.get_timeout(Duration::from_millis(timeout_ms))?;
    if let Some(error) = future.controller().error() {
        bail!("call failed: {error}");
    }
    response.context("peer replied with null")
}
