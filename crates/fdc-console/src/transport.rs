//! Client side of the debug channel: one task owns the socket, decodes
//! inbound frames, and forwards engine-relevant events over mpsc. The engine
//! never touches the stream directly.

use std::io;
use std::time::Duration;

use chrono::Utc;
use fdc_core::wire::{
    encode_line, CommandPayload, Envelope, LineDecoder, Msg, ReplyPayload, RequestPayload,
    DEFAULT_MAX_FRAME_BYTES, PROTOCOL_VERSION,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::commands::Outbound;
use crate::Config;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What the engine sees from the link, already filtered and correlated.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    Closed { reason: String },
    Push(Msg),
    Reply {
        request_id: String,
        payload: ReplyPayload,
    },
}

/// Maps one decoded envelope to an engine event. Inbound frames for other
/// zones, stale protocol versions, uncorrelated replies, and client-only
/// message kinds are dropped here.
fn classify(envelope: Envelope, zone: &str) -> Option<LinkEvent> {
    if envelope.zone != zone {
        debug!(event = "link_foreign_zone", zone = %envelope.zone);
        return None;
    }
    if envelope.version > PROTOCOL_VERSION {
        warn!(event = "link_version_ahead", version = envelope.version);
        return None;
    }
    match envelope.msg {
        Msg::Reply(payload) => match envelope.request_id {
            Some(request_id) => Some(LinkEvent::Reply {
                request_id,
                payload,
            }),
            None => {
                warn!(event = "link_uncorrelated_reply");
                None
            }
        },
        // client-to-controller kinds echoed back are meaningless here
        Msg::Request(_) | Msg::Command(_) => None,
        msg => Some(LinkEvent::Push(msg)),
    }
}

fn build_envelope(config: &Config, outbound: Outbound) -> Envelope {
    let (request_id, msg) = match outbound {
        Outbound::Request {
            request_id,
            call,
            params,
        } => (
            Some(request_id),
            Msg::Request(RequestPayload { call, params }),
        ),
        Outbound::Command { command, params } => {
            (None, Msg::Command(CommandPayload { command, params }))
        }
    };
    Envelope {
        version: PROTOCOL_VERSION,
        zone: config.zone.clone(),
        sender: config.client_id.clone(),
        timestamp: Utc::now().to_rfc3339(),
        request_id,
        msg,
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[cfg(not(unix))]
pub async fn link_loop(
    _config: Config,
    tx: mpsc::Sender<LinkEvent>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    let _ = tx
        .send(LinkEvent::Closed {
            reason: "debug channel requires a unix socket".to_string(),
        })
        .await;
    while outbound_rx.recv().await.is_some() {}
}

#[cfg(unix)]
pub async fn link_loop(
    config: Config,
    tx: mpsc::Sender<LinkEvent>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::net::UnixStream;

    let mut backoff = INITIAL_BACKOFF;
    let mut outbound_open = true;

    loop {
        let stream = match UnixStream::connect(&config.socket_path).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(event = "link_connect_error", error = %err);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;

        let (reader_half, mut writer_half) = stream.into_split();
        let _ = tx.send(LinkEvent::Connected).await;
        let mut reader = BufReader::new(reader_half);
        let mut decoder = LineDecoder::default();
        let mut read_buf = [0u8; 8192];

        let reason = loop {
            tokio::select! {
                read = reader.read(&mut read_buf) => {
                    match read {
                        Ok(0) => break "connection closed by controller".to_string(),
                        Ok(n) => {
                            for result in decoder.feed::<Envelope>(&read_buf[..n]) {
                                match result {
                                    Ok(envelope) => {
                                        if let Some(event) = classify(envelope, &config.zone) {
                                            let _ = tx.send(event).await;
                                        }
                                    }
                                    Err(err) => warn!(event = "link_decode_error", error = %err),
                                }
                            }
                        }
                        Err(err) => break format!("read failed: {err}"),
                    }
                }
                maybe_outbound = outbound_rx.recv(), if outbound_open => {
                    match maybe_outbound {
                        Some(outbound) => {
                            let envelope = build_envelope(&config, outbound);
                            if let Err(err) = send_envelope(&mut writer_half, &envelope).await {
                                break format!("write failed: {err}");
                            }
                        }
                        None => outbound_open = false,
                    }
                }
            }
        };

        if let Some(Err(err)) = decoder.finish::<Envelope>() {
            warn!(event = "link_decode_error", error = %err);
        }
        let _ = tx.send(LinkEvent::Closed { reason }).await;
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

#[cfg(unix)]
async fn send_envelope(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &Envelope,
) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let frame = encode_line(envelope, DEFAULT_MAX_FRAME_BYTES)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}
