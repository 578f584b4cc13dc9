// ABOUTME: Server entry point: parses the CLI surface, builds the sized tokio runtime, and
// ABOUTME: runs the fan-out engine until Ctrl+C, exiting non-zero only on a startup failure

use argh::FromArgs;
use std::process::ExitCode;
use std::sync::Arc;
use stream_relay::frame::DEFAULT_MAX_FRAME_SIZE;
use stream_relay::Server;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Live media-stream fan-out server.
#[derive(FromArgs)]
struct CliArgs {
    /// port to listen on
    #[argh(option, short = 'p')]
    port: u16,

    /// number of tokio worker threads driving the shared I/O reactor
    #[argh(option, short = 't')]
    thread_number: usize,

    /// maximum frame size in bytes (default: 10 MiB)
    #[argh(option)]
    max_frame_size: Option<u32>,

    /// enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,
}

fn main() -> ExitCode {
    let args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.debugging {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.thread_number.max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let max_frame_size = args.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE);
    let port = args.port;

    runtime.block_on(async move {
        let server = Arc::new(Server::new(max_frame_size));
        let shutdown = server.shutdown_handle();

        let mut run_handle = tokio::spawn({
            let server = server.clone();
            async move { server.run(port).await }
        });

        let result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                shutdown.cancel();
                (&mut run_handle).await
            }
            result = &mut run_handle => result,
        };

        match result {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(e)) => {
                error!(error = %e, "server exited with an error");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!(error = %e, "server task panicked");
                ExitCode::FAILURE
            }
        }
    })
}
