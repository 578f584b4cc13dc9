// ABOUTME: Stress test driver: spawns one producer and many concurrent viewers against a
// ABOUTME: running server, then checks every viewer observed every chunk in order and intact

use argh::FromArgs;
use bytes::Bytes;
use std::error::Error;
use std::time::{Duration, Instant};
use stream_relay::codec::Message;
use stream_relay::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Stress test driver: one producer, N viewers, verifies ordered exactly-once delivery.
#[derive(FromArgs)]
struct CliArgs {
    /// server host (default: localhost)
    #[argh(option)]
    host: Option<String>,

    /// server port
    #[argh(option, short = 'p')]
    port: u16,

    /// stream identifier to use for this run
    #[argh(option, short = 's')]
    stream_id: Option<String>,

    /// number of concurrent viewers (default: 1000)
    #[argh(option)]
    viewer_count: Option<u32>,

    /// number of chunks the producer emits (default: 100)
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
    let stream_id = args.stream_id.unwrap_or_else(|| "STRESS_TEST".to_string());
    let viewer_count = args.viewer_count.unwrap_or(1000);
    let chunk_count = args.chunk_count.unwrap_or(100);
    let chunk_size = args.chunk_size.unwrap_or(20_000) as usize;
    let deadline = Duration::from_secs(args.deadline.unwrap_or(60));

    info!(
        host = %host,
        port = args.port,
        viewer_count,
        chunk_count,
        "starting stress run"
    );

    let mut viewers = Vec::with_capacity(viewer_count as usize);
    for _ in 0..viewer_count {
        let (reader, _writer) = connect_viewer(&host, args.port, &stream_id, deadline).await?;
        viewers.push(reader);
    }
    info!(attached = viewers.len(), "all viewers attached");

    let mut producer_reader;
    let mut producer_writer;
    {
        let socket = timeout(deadline, TcpStream::connect((host.as_str(), args.port))).await??;
        let (read_half, write_half) = socket.into_split();
        producer_reader = FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE);
        producer_writer = FrameWriter::new(write_half);
        send(
            &mut producer_writer,
            &Message::StartStreaming {
                stream_id: stream_id.clone(),
            },
            deadline,
        )
        .await?;
        match recv(&mut producer_reader, deadline).await? {
            Some(Message::OkStreamingResponse) => {}
            other => return Err(format!("producer attach refused: {other:?}").into()),
        }
    }

    let mut payload = vec![0xEEu8; chunk_size.max(2)];
    if let Some(first) = payload.first_mut() {
        *first = 0xAA;
    }
    if let Some(last) = payload.last_mut() {
        *last = 0xAA;
    }
    let payload = Bytes::from(payload);

    let started = Instant::now();
    for chunk_index in 0..chunk_count {
        send(
            &mut producer_writer,
            &Message::StreamingData {
                chunk_index,
                data: payload.clone(),
            },
            deadline,
        )
        .await?;
        match recv(&mut producer_reader, deadline).await? {
            Some(Message::OkStreamingResponse) => {}
            other => warn!(chunk_index, response = ?other, "unexpected reply to chunk"),
        }
    }
    info!(elapsed = ?started.elapsed(), "producer finished emitting chunks");

    let mut failures = 0u32;
    for (index, reader) in viewers.iter_mut().enumerate() {
        if let Err(e) = verify_viewer(reader, &payload, chunk_count, deadline).await {
            error!(viewer = index, error = %e, "viewer verification failed");
            failures += 1;
        }
    }

    send(
        &mut producer_writer,
        &Message::EndStreaming { stream_id },
        deadline,
    )
    .await?;

    if failures == 0 {
        info!(viewers = viewers.len(), chunks = chunk_count, "stress run passed");
        Ok(())
    } else {
        Err(format!("{failures} of {} viewers failed verification", viewers.len()).into())
    }
}

async fn connect_viewer(
    host: &str,
    port: u16,
    stream_id: &str,
    deadline: Duration,
) -> Result<(FrameReader, FrameWriter), Box<dyn Error>> {
    let socket = timeout(deadline, TcpStream::connect((host, port))).await??;
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE);
    let mut writer = FrameWriter::new(write_half);
    send(
        &mut writer,
        &Message::StartLiveStreamViewing {
            stream_id: stream_id.to_string(),
        },
        deadline,
    )
    .await?;
    // Either response is valid here: the viewer may race the producer's attach.
    recv(&mut reader, deadline).await?;
    Ok((reader, writer))
}

async fn verify_viewer(
    reader: &mut FrameReader,
    expected_payload: &Bytes,
    chunk_count: u32,
    deadline: Duration,
) -> Result<(), Box<dyn Error>> {
    for expected_index in 0..chunk_count {
        match recv(reader, deadline).await? {
            Some(Message::StreamingData { chunk_index, data }) => {
                if chunk_index != expected_index {
                    return Err(format!(
                        "out-of-order chunk: expected {expected_index}, got {chunk_index}"
                    )
                    .into());
                }
                if &data != expected_payload {
                    return Err(format!("payload mismatch at chunk {chunk_index}").into());
                }
            }
            other => return Err(format!("unexpected message: {other:?}").into()),
        }
    }
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
