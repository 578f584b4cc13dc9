// ABOUTME: Demo producer client: declares a stream id, then pushes synthetic chunks with
// ABOUTME: monotonically increasing indices, mirroring the teacher's send_sms example client

use argh::FromArgs;
use bytes::Bytes;
use std::error::Error;
use std::time::Duration;
use stream_relay::codec::Message;
use stream_relay::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Demo producer client for the live-stream fan-out server.
#[derive(FromArgs)]
struct CliArgs {
    /// server host (default: localhost)
    #[argh(option)]
    host: Option<String>,

    /// server port
    #[argh(option, short = 'p')]
    port: u16,

    /// stream identifier to publish under
    #[argh(option, short = 's')]
    stream_id: String,

    /// number of chunks to emit (default: 100)
    #[argh(option)]
    chunk_count: Option<u32>,

    /// bytes per chunk (default: 20000)
    #[argh(option)]
    chunk_size: Option<u32>,

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
    let chunk_count = args.chunk_count.unwrap_or(100);
    let chunk_size = args.chunk_size.unwrap_or(20_000) as usize;

    info!(host = %host, port = args.port, "connecting");
    let socket = timeout(deadline, TcpStream::connect((host.as_str(), args.port))).await??;
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE);
    let mut writer = FrameWriter::new(write_half);

    send(
        &mut writer,
        &Message::StartStreaming {
            stream_id: args.stream_id.clone(),
        },
        deadline,
    )
    .await?;

    match recv(&mut reader, deadline).await? {
        Some(Message::OkStreamingResponse) => info!(stream_id = %args.stream_id, "producer attached"),
        Some(Message::ErrorStreamingResponse { message }) => {
            error!(error = %message, "server refused producer attach");
            return Ok(());
        }
        other => {
            warn!(response = ?other, "unexpected response to START_STREAMING");
            return Ok(());
        }
    }

    let payload = vec![0xEEu8; chunk_size.max(2)];
    for chunk_index in 0..chunk_count {
        let mut data = payload.clone();
        if let Some(first) = data.first_mut() {
            *first = 0xAA;
        }
        if let Some(last) = data.last_mut() {
            *last = 0xAA;
        }

        send(
            &mut writer,
            &Message::StreamingData {
                chunk_index,
                data: Bytes::from(data),
            },
            deadline,
        )
        .await?;

        match recv(&mut reader, deadline).await? {
            Some(Message::OkStreamingResponse) => {}
            other => warn!(chunk_index, response = ?other, "unexpected reply to chunk"),
        }
    }

    send(
        &mut writer,
        &Message::EndStreaming {
            stream_id: args.stream_id.clone(),
        },
        deadline,
    )
    .await?;
    info!(stream_id = %args.stream_id, chunks_sent = chunk_count, "stream ended");

    Ok(())
}

async fn send(
    writer: &mut FrameWriter,
    message: &Message,
    deadline: Duration,
) -> Result<(), Box<dyn Error>> {
    timeout(deadline, writer.write_frame(&message.encode())).await??;
    Ok(())
}

async fn recv(
    reader: &mut FrameReader,
    deadline: Duration,
) -> Result<Option<Message>, Box<dyn Error>> {
    let body = timeout(deadline, reader.read_frame()).await??;
    Ok(match body {
        Some(b) => Some(Message::decode(&b)?),
        None => None,
    })
}
