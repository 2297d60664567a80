//! Portico echo server.
//!
//! Serves length-prefixed frames back to the sender until SIGINT or SIGTERM.

use std::path::PathBuf;

use bytes::Bytes;
use portico_core::{handler_fn, BoxFuture, ChannelHandler, CoreError, Flow, HandlerContext};
use portico_server::{EndpointConfig, ServerEndpoint, ServerError, ShutdownSignal};
use portico_telemetry::{init_logging, LogConfig};
use tracing::{error, info};

/// Command-line arguments.
struct Args {
    /// Port to listen on; overrides the configuration.
    port: Option<i64>,
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut port = None;
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--port" | "-p" => {
                    let value = args.next().unwrap_or_default();
                    match value.parse() {
                        Ok(value) => port = Some(value),
                        Err(_) => {
                            eprintln!("Invalid port: {value}");
                            std::process::exit(1);
                        }
                    }
                }
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("portico-echo {}", portico_server::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { port, config }
    }
}

fn print_help() {
    println!(
        r"Portico echo server

USAGE:
    portico-echo [OPTIONS]

OPTIONS:
    -p, --port <PORT>      Port to listen on (default: 8080)
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    PORTICO_HOST                Listen host (default: 0.0.0.0)
    PORTICO_PORT                Listen port (default: 8080)
    PORTICO_ACCEPTOR_THREADS    Acceptor pool size (default: 1)
    PORTICO_IO_THREADS          I/O pool size, 0 for one per core (default: 0)
    PORTICO_MAX_FRAME_LENGTH    Largest accepted frame in bytes (default: 16777216)
    PORTICO_TCP_NODELAY         Disable Nagle's algorithm (default: true)
    RUST_LOG                    Log filter (default: info)

Frames are a 4-byte big-endian length followed by the payload.
"
    );
}

/// Logs connection events and passes frames through.
struct LogStage;

impl ChannelHandler for LogStage {
    fn channel_active(&self, ctx: &mut HandlerContext) -> Result<(), CoreError> {
        info!(peer = ?ctx.peer_addr(), "Connection opened");
        Ok(())
    }

    fn channel_read<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        frame: Bytes,
    ) -> BoxFuture<'a, Result<Flow, CoreError>> {
        tracing::debug!(peer = ?ctx.peer_addr(), bytes = frame.len(), "Frame received");
        Box::pin(async move { Ok(Flow::Continue(frame)) })
    }

    fn channel_inactive(&self, ctx: &mut HandlerContext) {
        info!(peer = ?ctx.peer_addr(), "Connection closed");
    }

    fn exception_caught(&self, ctx: &mut HandlerContext, error: &CoreError) {
        tracing::warn!(peer = ?ctx.peer_addr(), %error, "Connection failed");
    }
}

fn load_config(path: Option<PathBuf>) -> EndpointConfig {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            match EndpointConfig::from_file(&path) {
                Ok(config) => config.with_env_overrides(),
                Err(e) => {
                    error!("Failed to load configuration: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => EndpointConfig::default().with_env_overrides(),
    };

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    config
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&LogConfig::production().with_env_level()) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = load_config(args.config);
    let port = args.port.unwrap_or_else(|| i64::from(config.port()));

    let endpoint = match ServerEndpoint::builder()
        .config(config)
        .named_handler("log", LogStage)
        .named_handler(
            "echo",
            handler_fn(|ctx, frame| {
                ctx.write(frame);
                Ok(Flow::Consumed)
            }),
        )
        .build()
    {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!("Failed to create endpoint: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting portico-echo v{} on port {}", portico_server::VERSION, port);

    let stop = ShutdownSignal::with_os_signals(endpoint.acceptor_pool().handle());
    match endpoint.bind_until(port, stop) {
        Ok(()) | Err(ServerError::BindInterrupted { .. }) => info!("Server stopped"),
        Err(e) => {
            error!("Server error: {}", e);
            std::process::exit(1);
        }
    }
}
