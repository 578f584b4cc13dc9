// ABOUTME: Demo viewer client: subscribes to a stream id and logs each chunk received
// ABOUTME: Applies the client's configurable per-operation deadline to every read, per spec section 5

use argh::FromArgs;
use std::error::Error;
use std::time::Duration;
use stream_relay::codec::Message;
use stream_relay::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Demo viewer client for the live-stream fan-out server.
#[derive(FromArgs)]
struct CliArgs {
    /// server host (default: localhost)
    #[argh(option)]
    host: Option<String>,

    /// server port
    #[argh(option, short = 'p')]
    port: u16,

    /// stream identifier to subscribe to
    #[argh(option, short = 's')]
    stream_id: String,

    /// per-operation deadline in seconds (default: 60)
    #[argh(option)]
    deadline: Option<u64>,

    /// enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: CliArgs = argh::from_env();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.debugging {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let host = args.host.unwrap_or_else(|| "localhost".to_string());
    let deadline = Duration::from_secs(args.deadline.unwrap_or(60));

    info!(host = %host, port = args.port, stream_id = %args.stream_id, "connecting");
    let socket = timeout(deadline, TcpStream::connect((host.as_str(), args.port))).await??;
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE);
    let mut writer = FrameWriter::new(write_half);

    timeout(
        deadline,
        writer.write_frame(
            &Message::StartLiveStreamViewing {
                stream_id: args.stream_id.clone(),
            }
            .encode(),
        ),
    )
    .await??;

    match timeout(deadline, reader.read_frame()).await?? {
        Some(body) => match Message::decode(&body)? {
            Message::OkStreamingResponse => info!("attached, stream is live"),
            Message::IsNotStartedResponse => info!("attached, stream has not started yet"),
            other => warn!(response = ?other, "unexpected response to START_LIVE_STREAM_VIEWING"),
        },
        None => {
            warn!("server closed the connection before responding");
            return Ok(());
        }
    }

    let mut received = 0u64;
    loop {
        let body = match timeout(deadline, reader.read_frame()).await {
            Ok(Ok(Some(body))) => body,
            Ok(Ok(None)) => {
                info!(received, "stream ended");
                break;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "transport error");
                break;
            }
            Err(_elapsed) => {
                warn!(?deadline, "deadline exceeded waiting for the next chunk, closing");
                break;
            }
        };

        match Message::decode(&body)? {
            Message::StreamingData { chunk_index, data } => {
                received += 1;
                info!(chunk_index, bytes = data.len(), "chunk received");
            }
            other => warn!(message = ?other, "unexpected message"),
        }
    }

    Ok(())
}
