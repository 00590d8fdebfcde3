//! TCP bridge for feature reports.
//!
//! Each request is `[direction][len][report bytes]` with direction 0 = SET
//! and 1 = GET; the report bytes start with the report id.  Each response is
//! `[status][len][bytes]`:
//!
//! | Status | Meaning                        | Bytes                     |
//! |--------|--------------------------------|---------------------------|
//! | 0      | handled                        | GET response (empty for SET) |
//! | 1      | no handler claimed the report  | none                      |
//! | 2      | the handler returned an error  | error message (UTF-8)     |
//!
//! Reports are dispatched on the blocking pool because a COMMIT may flush
//! the keymap to disk.  Connections are served concurrently; they all share
//! the one editor lock.

use std::io::ErrorKind;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use keymap_core::protocol::report::ReportDirection;
use keymap_core::ProtocolError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::stream_bridge::ACCEPT_POLL;
use crate::application::report_handler::{
    FeatureReport, ReportDispatcher, ReportError, ReportOutcome,
};

pub const STATUS_HANDLED: u8 = 0;
pub const STATUS_UNCLAIMED: u8 = 1;
pub const STATUS_ERROR: u8 = 2;

/// Longest report or response body a single length byte can carry.
pub const MAX_BODY_LEN: usize = u8::MAX as usize;

// ── Wire helpers ──────────────────────────────────────────────────────────────

/// Encodes a request frame.
///
/// # Errors
///
/// [`ProtocolError::MalformedPayload`] if `report` is longer than
/// [`MAX_BODY_LEN`].
pub fn encode_request(direction: ReportDirection, report: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u8::try_from(report.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!("report of {} bytes is too long", report.len()))
    })?;
    let mut buf = Vec::with_capacity(2 + report.len());
    buf.push(direction as u8);
    buf.push(len);
    buf.extend_from_slice(report);
    Ok(buf)
}

/// Builds the [`FeatureReport`] carried by a request.
///
/// # Errors
///
/// - [`ProtocolError::MalformedPayload`] for an unknown direction byte.
/// - [`ProtocolError::InsufficientData`] for an empty body.
pub fn parse_request(direction: u8, body: Vec<u8>) -> Result<FeatureReport, ProtocolError> {
    let direction = ReportDirection::try_from(direction).map_err(|()| {
        ProtocolError::MalformedPayload(format!("unknown report direction {direction:#04x}"))
    })?;
    let id = *body.first().ok_or(ProtocolError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    Ok(FeatureReport {
        direction,
        id,
        data: body,
    })
}

/// The answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportResponse {
    Handled(Vec<u8>),
    Unclaimed,
    Failed(String),
}

impl ReportResponse {
    pub fn from_dispatch(result: Result<ReportOutcome, ReportError>) -> Self {
        match result {
            Ok(ReportOutcome::Handled(bytes)) => ReportResponse::Handled(bytes),
            Ok(ReportOutcome::Bubble) => ReportResponse::Unclaimed,
            Err(e) => ReportResponse::Failed(e.to_string()),
        }
    }

    /// Encodes the response; bodies longer than [`MAX_BODY_LEN`] are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let (status, body) = match self {
            ReportResponse::Handled(bytes) => (STATUS_HANDLED, bytes.as_slice()),
            ReportResponse::Unclaimed => (STATUS_UNCLAIMED, &[][..]),
            ReportResponse::Failed(message) => (STATUS_ERROR, message.as_bytes()),
        };
        let body = &body[..body.len().min(MAX_BODY_LEN)];
        let mut buf = Vec::with_capacity(2 + body.len());
        buf.push(status);
        buf.push(body.len() as u8);
        buf.extend_from_slice(body);
        buf
    }

    /// Decodes one response from the front of `buf`.
    ///
    /// Returns the response and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InsufficientData`] if the frame is incomplete.
    /// - [`ProtocolError::MalformedPayload`] for an unknown status.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        if buf.len() < 2 {
            return Err(ProtocolError::InsufficientData {
                needed: 2,
                available: buf.len(),
            });
        }
        let total = 2 + buf[1] as usize;
        if buf.len() < total {
            return Err(ProtocolError::InsufficientData {
                needed: total,
                available: buf.len(),
            });
        }
        let body = &buf[2..total];
        let response = match buf[0] {
            STATUS_HANDLED => ReportResponse::Handled(body.to_vec()),
            STATUS_UNCLAIMED => ReportResponse::Unclaimed,
            STATUS_ERROR => ReportResponse::Failed(String::from_utf8_lossy(body).into_owned()),
            other => {
                return Err(ProtocolError::MalformedPayload(format!(
                    "unknown response status {other}"
                )))
            }
        };
        Ok((response, total))
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serves report connections on `listener` until `running` is cleared.
///
/// # Errors
///
/// Returns an error only if the listener's local address cannot be read.
pub async fn run_report_bridge(
    listener: TcpListener,
    dispatcher: Arc<ReportDispatcher>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("report listener has no local address")?;
    info!("report bridge listening on {local}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping report bridge");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("report connection from {peer}");
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    match serve_connection(stream, dispatcher).await {
                        Ok(()) => debug!("report connection {peer} closed"),
                        Err(e) => warn!("report connection {peer} closed with error: {e:#}"),
                    }
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

async fn serve_connection(
    mut stream: TcpStream,
    dispatcher: Arc<ReportDispatcher>,
) -> anyhow::Result<()> {
    loop {
        let mut header = [0u8; 2];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e).context("report request read failed"),
        }
        let mut body = vec![0u8; header[1] as usize];
        stream
            .read_exact(&mut body)
            .await
            .context("truncated report request")?;

        let response = match parse_request(header[0], body) {
            Ok(report) => {
                let dispatcher = Arc::clone(&dispatcher);
                let result = tokio::task::spawn_blocking(move || dispatcher.dispatch(&report))
                    .await
                    .context("report dispatch panicked")?;
                if let Err(e) = &result {
                    debug!(error = %e, "report failed");
                }
                ReportResponse::from_dispatch(result)
            }
            Err(e) => {
                warn!(error = %e, "malformed report request");
                ReportResponse::Failed(e.to_string())
            }
        };

        stream
            .write_all(&response.encode())
            .await
            .context("report response write failed")?;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
