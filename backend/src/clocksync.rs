//! ClockSync Protocol
//!
//! A four-timestamp exchange over TCP. The client writes its send time `T1`
//! as a decimal string, the service answers `T1,T2,T3` where `T2` is the
//! receive time and `T3` the reply time. The client stamps `T4` on receipt.
//!
//! Neither side relies on the other closing the connection. Requests and
//! replies end with a newline; a bare number that is followed by a short
//! silence also counts as a complete request.
//!
//! ```text
//! delay  = ((T2 - T1) + (T4 - T3)) / 2
//! offset = ((T2 - T1) + (T3 - T4)) / 2
//! ```

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Quiet period after which an unterminated request is answered
const REQUEST_GRACE: Duration = Duration::from_millis(100);

/// Longest request or reply a well-behaved peer ever sends
const MAX_FRAME: usize = 128;

/// Current wall clock in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One completed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub t1: i64,
    pub t2: i64,
    pub t3: i64,
    pub t4: i64,
}

impl ClockSample {
    pub fn delay(&self) -> f64 {
        (span(self.t1, self.t2) + span(self.t3, self.t4)) as f64 / 2.0
    }

    pub fn offset(&self) -> f64 {
        (span(self.t1, self.t2) + span(self.t4, self.t3)) as f64 / 2.0
    }
}

// i128: the stamps come off the wire
fn span(from: i64, to: i64) -> i128 {
    to as i128 - from as i128
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Connecting,
    AwaitingReply,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Connecting => write!(f, "connecting"),
            SyncPhase::AwaitingReply => write!(f, "awaiting reply"),
        }
    }
}

/// Client-side handshake state
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    Idle,
    Connecting,
    AwaitingReply,
    Computed(ClockSample),
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ClockSyncError {
    #[error("cannot connect to clock service at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out while {0}")]
    Timeout(SyncPhase),

    #[error("clock service i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed clock reply: {0:?}")]
    MalformedReply(String),

    #[error("handshake already finished")]
    Finished,
}

/// Build the service reply for a request carrying `T1`
pub fn stamp_reply(request: &str, t2: i64, t3: i64) -> Result<String, ClockSyncError> {
    let t1: i64 = request
        .trim()
        .parse()
        .map_err(|_| ClockSyncError::MalformedReply(request.to_string()))?;
    Ok(format!("{},{},{}", t1, t2, t3))
}

/// Parse a `T1,T2,T3` reply
pub fn parse_reply(reply: &str) -> Result<(i64, i64, i64), ClockSyncError> {
    let malformed = || ClockSyncError::MalformedReply(reply.to_string());
    let fields: Vec<i64> = reply
        .trim()
        .split(',')
        .map(|f| f.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .map_err(|_| malformed())?;

    match fields.as_slice() {
        [t1, t2, t3] => Ok((*t1, *t2, *t3)),
        _ => Err(malformed()),
    }
}

/// Peer side of the handshake. Runs once per peer lifetime.
#[derive(Debug)]
pub struct ClockSyncClient {
    addr: String,
    timeout: Duration,
    state: SyncState,
}

impl ClockSyncClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub async fn synchronize(&mut self) -> Result<ClockSample, ClockSyncError> {
        if self.state != SyncState::Idle {
            return Err(ClockSyncError::Finished);
        }

        match self.exchange().await {
            Ok(sample) => {
                info!("Delay: {} ms", sample.delay());
                info!("Offset: {} ms", sample.offset());
                self.state = SyncState::Computed(sample);
                Ok(sample)
            }
            Err(e) => {
                warn!("Error when connecting to clock service: {}", e);
                self.state = SyncState::Failed;
                Err(e)
            }
        }
    }

    async fn exchange(&mut self) -> Result<ClockSample, ClockSyncError> {
        self.state = SyncState::Connecting;
        info!("Connecting to clock service at {}...", self.addr);
        let mut stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ClockSyncError::Timeout(SyncPhase::Connecting))?
            .map_err(|source| ClockSyncError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        self.state = SyncState::AwaitingReply;
        debug!("Connected to clock service. Sending current time...");
        let t1 = now_millis();
        stream.write_all(format!("{}\n", t1).as_bytes()).await?;

        let reply = timeout(self.timeout, read_reply(&mut stream))
            .await
            .map_err(|_| ClockSyncError::Timeout(SyncPhase::AwaitingReply))??;
        let t4 = now_millis();

        let (echoed, t2, t3) = parse_reply(&reply)?;
        if echoed != t1 {
            return Err(ClockSyncError::MalformedReply(reply));
        }

        Ok(ClockSample { t1, t2, t3, t4 })
    }
}

/// Read one reply without waiting for the service to close the connection.
///
/// The reply is complete at the first newline, as soon as the bytes so far
/// form a full `T1,T2,T3` triple, or at end of stream.
async fn read_reply<R>(reader: &mut R) -> Result<String, ClockSyncError>
where
    R: AsyncRead + Unpin,
{
    let mut pending = Vec::new();
    let mut chunk = [0u8; 64];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&pending).into_owned());
        }
        pending.extend_from_slice(&chunk[..n]);

        if let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            return Ok(String::from_utf8_lossy(&pending[..pos]).into_owned());
        }
        let text = String::from_utf8_lossy(&pending).into_owned();
        if parse_reply(&text).is_ok() {
            return Ok(text);
        }
        if pending.len() > MAX_FRAME {
            return Err(ClockSyncError::MalformedReply(text));
        }
    }
}

/// Accept handshake connections for the process lifetime.
///
/// The service is stateless per request: it stamps `T2` and `T3` and echoes
/// `T1`. A connection may carry several requests.
pub async fn serve(listener: TcpListener) {
    if let Ok(addr) = listener.local_addr() {
        info!("Clock service listening on {}", addr);
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream).await {
                        debug!("clock connection from {} ended: {}", peer, e);
                    }
                });
            }
            Err(e) => warn!("clock service accept failed: {}", e),
        }
    }
}

/// Answer every request on one connection.
///
/// Bytes are buffered until a newline, end of stream, or `REQUEST_GRACE` of
/// silence, so a request split across segments is stamped once and several
/// requests in one segment are each answered. `T2` is the arrival time of
/// the segment that completed the request.
async fn handle_connection<S>(mut stream: S) -> Result<(), ClockSyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut arrived = now_millis();
    let mut chunk = [0u8; 64];
    loop {
        let read = if pending.is_empty() {
            Some(stream.read(&mut chunk).await?)
        } else {
            match timeout(REQUEST_GRACE, stream.read(&mut chunk)).await {
                Ok(read) => Some(read?),
                Err(_) => None,
            }
        };

        match read {
            Some(0) => {
                answer(&mut stream, &pending, arrived).await?;
                return Ok(());
            }
            Some(n) => {
                arrived = now_millis();
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    answer(&mut stream, &line, arrived).await?;
                }
                if pending.len() > MAX_FRAME {
                    let request = String::from_utf8_lossy(&pending).into_owned();
                    return Err(ClockSyncError::MalformedReply(request));
                }
            }
            None => {
                let request = std::mem::take(&mut pending);
                answer(&mut stream, &request, arrived).await?;
            }
        }
    }
}

async fn answer<S>(stream: &mut S, request: &[u8], t2: i64) -> Result<(), ClockSyncError>
where
    S: AsyncWrite + Unpin,
{
    let request = String::from_utf8_lossy(request);
    if request.trim().is_empty() {
        return Ok(());
    }
    let reply = stamp_reply(&request, t2, now_millis())?;
    stream.write_all(format!("{}\n", reply).as_bytes()).await?;
    Ok(())
}
