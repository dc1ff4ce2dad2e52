// ABOUTME: Sender companion — opens a session to a receiver and transmits one message from a file
// ABOUTME: Reuses the Fsm's sender-role framing (ENQ/EOT, frame encoding) for a one-shot, one-frame-at-a-time exchange

use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use astm_gateway::codec::{ACK, NAK};
use astm_gateway::config::SenderArgs;
use astm_gateway::fsm::{Fsm, Input, Output, Phase};

const MAX_RETRIES_PER_FRAME: u32 = 6;

#[tokio::main]
async fn main() -> ExitCode {
    let args = SenderArgs::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "send failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: SenderArgs) -> Result<(), Box<dyn std::error::Error>> {
    let records = read_records(&args.input).await?;
    if records.is_empty() {
        return Err("input file contains no records".into());
    }

    let t1 = Duration::from_secs(args.t1);
    let mut stream = TcpStream::connect(&args.connect).await?;
    info!(peer = %args.connect, "connected");

    let mut fsm = Fsm::new(args.timers());
    send_outputs(&mut stream, fsm.begin_send()).await?;

    let reply = read_one_byte(&mut stream, t1)
        .await?
        .ok_or("no reply to ENQ within T1")?;
    // Feed the reply through the same Fsm that drove the ENQ, rather than
    // matching it by hand, so establishment here tracks exactly what
    // `step_establishment_pending` decides for the receiver role.
    fsm.handle(Input::Bytes(Bytes::copy_from_slice(&[reply])));
    match fsm.phase() {
        Phase::Transfer => info!("establishment accepted"),
        Phase::Idle if reply == NAK => return Err("peer refused establishment (NAK)".into()),
        Phase::Idle => {
            return Err(format!(
                "establishment contention: peer sent 0x{reply:02X} instead of ACK/NAK"
            )
            .into())
        }
        other => return Err(format!("unexpected phase after establishment reply: {other:?}").into()),
    }

    for line in &records {
        let outputs = fsm.send_message(std::slice::from_ref(line));
        for output in outputs {
            if let Output::Send(frame) = output {
                send_frame_with_retry(&mut stream, &frame, t1).await?;
            }
        }
    }

    send_outputs(&mut stream, fsm.end_send()).await?;
    info!(records = records.len(), "message sent");
    Ok(())
}

/// Write one already-encoded frame and retry it, unchanged, on NAK — up to
/// [`MAX_RETRIES_PER_FRAME`] times — exactly as the receiver role retries
/// `Output::Send` bytes when its own peer NAKs.
async fn send_frame_with_retry(
    stream: &mut TcpStream,
    frame: &[u8],
    t1: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut attempts = 0;
    loop {
        stream.write_all(frame).await?;
        stream.flush().await?;
        match read_one_byte(stream, t1).await? {
            Some(ACK) => return Ok(()),
            Some(NAK) => {
                attempts += 1;
                if attempts >= MAX_RETRIES_PER_FRAME {
                    return Err("peer NAKed frame past retry limit".into());
                }
                warn!(attempts, "frame NAKed, retrying");
            }
            Some(other) => return Err(format!("unexpected reply: 0x{other:02X}").into()),
            None => return Err("no reply within T1".into()),
        }
    }
}

async fn send_outputs(stream: &mut TcpStream, outputs: Vec<Output>) -> std::io::Result<()> {
    for output in outputs {
        if let Output::Send(bytes) = output {
            stream.write_all(&bytes).await?;
            stream.flush().await?;
        }
    }
    Ok(())
}

async fn read_one_byte(stream: &mut TcpStream, t: Duration) -> std::io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match timeout(t, stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Ok(Some(buf[0])),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}

async fn read_records(path: &std::path::Path) -> std::io::Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(text
        .split(|c| c == '\r' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn init_tracing(verbose: u8) {
    let default_level = if verbose > 0 { "astm_gateway=debug" } else { "astm_gateway=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
