// src/connection.rs - One-shot TCP exchange with the printer firmware
//
// The firmware speaks unframed text: there is no length prefix and no "done"
// marker. An exchange therefore reads whatever banner arrives, writes the
// command, waits a fixed settle delay and drains the socket once.
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{sleep, timeout};

use crate::gcode::GCode;

/// Where the printer's control port lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Timing knobs for a single exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeTimings {
    pub connect_timeout: Duration,
    /// Bounds the banner read, the command write and the final drain.
    pub read_timeout: Duration,
    /// Quiet period between writing the command and draining the reply.
    pub settle_delay: Duration,
    pub banner_lines: usize,
    pub drain_chunk_size: usize,
}

impl Default for ExchangeTimings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(4),
            settle_delay: Duration::from_secs(4),
            banner_lines: 4,
            drain_chunk_size: 10_000,
        }
    }
}

impl ExchangeTimings {
    /// Upper bound on how long one exchange can take.
    pub fn worst_case(&self) -> Duration {
        self.connect_timeout + self.read_timeout * 3 + self.settle_delay
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("printer at {endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
}

/// Step of the exchange a fault happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    Banner,
    Write,
    Drain,
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeStage::Banner => f.write_str("banner read"),
            ExchangeStage::Write => f.write_str("command write"),
            ExchangeStage::Drain => f.write_str("response read"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    TimedOut,
    Io(io::ErrorKind),
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::TimedOut => f.write_str("timed out"),
            FaultKind::Io(kind) => write!(f, "{}", kind),
        }
    }
}

/// A failure after the socket was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{stage} failed: {kind}")]
pub struct ExchangeFault {
    pub stage: ExchangeStage,
    pub kind: FaultKind,
}

impl ExchangeFault {
    fn timed_out(stage: ExchangeStage) -> Self {
        Self { stage, kind: FaultKind::TimedOut }
    }

    fn io(stage: ExchangeStage, err: &io::Error) -> Self {
        Self { stage, kind: FaultKind::Io(err.kind()) }
    }

    /// Whether this fault fails the exchange. Banner faults do not.
    pub fn is_transport_failure(&self) -> bool {
        self.stage != ExchangeStage::Banner
    }

    /// Marker line appended to the transcript.
    pub fn tag(&self) -> String {
        format!("<{}>", self)
    }
}

/// Lines gathered during one exchange, plus the fault that cut it short, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub lines: Vec<String>,
    pub fault: Option<ExchangeFault>,
}

impl Response {
    pub fn is_transport_failure(&self) -> bool {
        self.fault.is_some_and(|f| f.is_transport_failure())
    }

    /// Response lines with the fault tag, if any, as the final entry.
    pub fn transcript(&self) -> Vec<String> {
        let mut lines = self.lines.clone();
        if let Some(fault) = self.fault {
            lines.push(fault.tag());
        }
        lines
    }
}

/// Something that can run one command exchange against a printer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, command: &GCode) -> Result<Response, ConnectionError>;
}

/// Opens a dedicated socket for every exchange.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    endpoint: Endpoint,
    timings: ExchangeTimings,
}

impl TcpTransport {
    pub fn new(endpoint: Endpoint, timings: ExchangeTimings) -> Self {
        Self { endpoint, timings }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(&self, command: &GCode) -> Result<Response, ConnectionError> {
        Connection::new(self.endpoint.clone(), self.timings)
            .exchange(command)
            .await
    }
}

/// A single request/response cycle. Consumed by [`Connection::exchange`].
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    timings: ExchangeTimings,
}

impl Connection {
    pub fn new(endpoint: Endpoint, timings: ExchangeTimings) -> Self {
        Self { endpoint, timings }
    }

    /// Dial, read the banner, send `command`, settle, drain, close.
    ///
    /// Only a failed dial is an `Err`. Anything that goes wrong later is
    /// recorded in [`Response::fault`] next to the lines read so far.
    pub async fn exchange(self, command: &GCode) -> Result<Response, ConnectionError> {
        let stream = self.dial().await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        let response = self.converse(&mut reader, &mut writer, command).await;
        close(writer).await;

        if let Some(fault) = response.fault {
            tracing::debug!(
                "Exchange with {} ended early: {} {:?}",
                self.endpoint,
                fault,
                response.transcript()
            );
        }
        Ok(response)
    }

    async fn dial(&self) -> Result<TcpStream, ConnectionError> {
        let addr = self.endpoint.to_string();
        tracing::debug!("Dialing printer at {}", addr);

        match timeout(self.timings.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ConnectionError::Unreachable {
                endpoint: self.endpoint.clone(),
                source: e,
            }),
            Err(_) => Err(ConnectionError::Unreachable {
                endpoint: self.endpoint.clone(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer within {:?}", self.timings.connect_timeout),
                ),
            }),
        }
    }

    async fn converse(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        command: &GCode,
    ) -> Response {
        let mut response = Response::default();
        let read_timeout = self.timings.read_timeout;

        // outlives the timed read so a half-received line survives a timeout
        let mut partial = Vec::new();
        let banner = timeout(
            read_timeout,
            read_banner(reader, self.timings.banner_lines, &mut partial, &mut response.lines),
        )
        .await;
        match banner {
            Ok(Ok(())) => {}
            Ok(Err(e)) => response.fault = Some(ExchangeFault::io(ExchangeStage::Banner, &e)),
            Err(_) => response.fault = Some(ExchangeFault::timed_out(ExchangeStage::Banner)),
        }
        if !partial.is_empty() {
            response.lines.extend(split_lines(&String::from_utf8_lossy(&partial)));
        }
        tracing::debug!("Banner from {}: {:?}", self.endpoint, response.lines);

        let wire = command.to_wire();
        tracing::debug!("TX {}: {}", self.endpoint, command);
        let write = async {
            writer.write_all(wire.as_bytes()).await?;
            writer.flush().await
        };
        let written: Result<io::Result<()>, _> = timeout(read_timeout, write).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                response.fault = Some(ExchangeFault::io(ExchangeStage::Write, &e));
                return response;
            }
            Err(_) => {
                response.fault = Some(ExchangeFault::timed_out(ExchangeStage::Write));
                return response;
            }
        }

        sleep(self.timings.settle_delay).await;

        match drain(reader, self.timings.drain_chunk_size, read_timeout).await {
            Ok(text) => {
                tracing::debug!("RX {}: {} bytes", self.endpoint, text.len());
                response.lines.extend(split_lines(&text));
            }
            Err(fault) => response.fault = Some(fault),
        }

        response
    }
}

/// Read up to `count` lines. Bytes of a line still in progress stay in `partial`.
async fn read_banner(
    reader: &mut BufReader<OwnedReadHalf>,
    count: usize,
    partial: &mut Vec<u8>,
    lines: &mut Vec<String>,
) -> io::Result<()> {
    for _ in 0..count {
        if reader.read_until(b'\n', partial).await? == 0 {
            break;
        }
        lines.extend(split_lines(&String::from_utf8_lossy(partial)));
        partial.clear();
    }
    Ok(())
}

/// One read of everything the firmware has produced so far.
///
/// Bytes the banner reader buffered but did not consume come first.
async fn drain(
    reader: &mut BufReader<OwnedReadHalf>,
    chunk_size: usize,
    read_timeout: Duration,
) -> Result<String, ExchangeFault> {
    let mut bytes = reader.buffer().to_vec();
    reader.consume(bytes.len());

    let mut chunk = vec![0u8; chunk_size];
    match timeout(read_timeout, reader.get_mut().read(&mut chunk)).await {
        Ok(Ok(n)) => bytes.extend_from_slice(&chunk[..n]),
        Ok(Err(e)) => return Err(ExchangeFault::io(ExchangeStage::Drain, &e)),
        Err(_) if !bytes.is_empty() => {}
        Err(_) => return Err(ExchangeFault::timed_out(ExchangeStage::Drain)),
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn close(mut writer: OwnedWriteHalf) {
    if let Err(e) = writer.flush().await {
        tracing::debug!("Flush on close failed: {}", e);
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Shutdown on close failed: {}", e);
    }
}

/// Split raw socket text into non-empty lines, tolerating `\r\n` and `\n\r`.
pub fn split_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split('\n')
        .map(|line| line.trim_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_handles_both_terminators() {
        let lines: Vec<String> = split_lines("ok\r\nT0:20.0 /0.0\n\rbusy\n\n").collect();
        assert_eq!(lines, vec!["ok", "T0:20.0 /0.0", "busy"]);
    }

    #[test]
    fn test_banner_faults_are_tolerated() {
        let banner = ExchangeFault::timed_out(ExchangeStage::Banner);
        let drain = ExchangeFault::timed_out(ExchangeStage::Drain);
        assert!(!banner.is_transport_failure());
        assert!(drain.is_transport_failure());
    }

    #[test]
    fn test_transcript_ends_with_fault_tag() {
        let response = Response {
            lines: vec!["ok".to_string()],
            fault: Some(ExchangeFault {
                stage: ExchangeStage::Write,
                kind: FaultKind::Io(io::ErrorKind::BrokenPipe),
            }),
        };
        let transcript = response.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1], "<command write failed: broken pipe>");
        assert!(response.is_transport_failure());
    }

    #[test]
    fn test_default_timings_bound_an_exchange() {
        let timings = ExchangeTimings::default();
        assert_eq!(timings.worst_case(), Duration::from_secs(18));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("192.168.1.50", 8080).to_string(), "192.168.1.50:8080");
    }
}
