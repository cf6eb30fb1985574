// src/printer.rs - Printer client: device state, refresh coordination, commands
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::connection::{Endpoint, ExchangeFault, ExchangeTimings, TcpTransport, Transport};
use crate::gcode::GCode;
use crate::logging::Logger;
use crate::telemetry::{self, StatusReading, TemperaturePair, TelemetryUpdate};

/// Consecutive failed refreshes before the printer is reported as disconnected.
pub const FAILURES_TO_DISCONNECT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("Disconnected"),
            ConnectionStatus::Connected => f.write_str("Connected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrintStatus {
    Idle,
    Busy,
    Printing,
}

impl fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintStatus::Idle => f.write_str("Idle"),
            PrintStatus::Busy => f.write_str("Busy"),
            PrintStatus::Printing => f.write_str("Printing"),
        }
    }
}

/// Why an exchange did not produce telemetry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeFailure {
    #[error("{0}")]
    Unreachable(String),
    #[error(transparent)]
    Transport(#[from] ExchangeFault),
    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

/// Result of one exchange as seen by callers, plus connectivity afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeReport {
    pub outcome: Result<(), ExchangeFailure>,
    pub connection: ConnectionStatus,
    pub failure_streak: u32,
}

impl ExchangeReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Last known device values. Never handed out directly; see [`DeviceSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub bed: Option<TemperaturePair>,
    pub extruder: Option<TemperaturePair>,
    pub print_progress: Option<f64>,
    pub print_status: PrintStatus,
    pub connection: ConnectionStatus,
    pub failure_streak: u32,
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            bed: None,
            extruder: None,
            print_progress: None,
            print_status: PrintStatus::Idle,
            connection: ConnectionStatus::Disconnected,
            failure_streak: 0,
        }
    }

    /// Fold a parsed batch in. Fields the batch did not report keep their value.
    pub fn apply(&mut self, update: &TelemetryUpdate) {
        if let Some(extruder) = update.extruder {
            self.extruder = Some(extruder);
        }
        if let Some(bed) = update.bed {
            self.bed = Some(bed);
        }
        match update.status {
            Some(StatusReading::Printing { progress }) => {
                self.print_status = PrintStatus::Printing;
                self.print_progress = Some(progress);
            }
            Some(StatusReading::Busy) => self.print_status = PrintStatus::Busy,
            Some(StatusReading::Idle) => self.print_status = PrintStatus::Idle,
            None => {}
        }
    }

    /// Returns true when this flips the status to connected.
    pub fn record_success(&mut self) -> bool {
        self.failure_streak = 0;
        let changed = self.connection != ConnectionStatus::Connected;
        self.connection = ConnectionStatus::Connected;
        changed
    }

    /// Returns true when this flips the status to disconnected.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.failure_streak = self.failure_streak.saturating_add(1);
        if self.failure_streak >= threshold && self.connection == ConnectionStatus::Connected {
            self.connection = ConnectionStatus::Disconnected;
            return true;
        }
        false
    }

    /// Caller-facing view: nothing numeric survives a disconnect.
    pub fn snapshot(&self) -> DeviceSnapshot {
        if self.connection != ConnectionStatus::Connected {
            return DeviceSnapshot::unknown(self.connection);
        }
        DeviceSnapshot {
            connection: self.connection,
            bed_temp: self.bed.map(|b| b.current),
            target_bed_temp: self.bed.map(|b| b.target),
            extruder_temp: self.extruder.map(|e| e.current),
            target_extruder_temp: self.extruder.map(|e| e.target),
            print_status: Some(self.print_status),
            print_progress: match self.print_status {
                PrintStatus::Printing => self.print_progress,
                _ => None,
            },
        }
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Masked device view. `None` means unknown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub connection: ConnectionStatus,
    pub bed_temp: Option<f64>,
    pub target_bed_temp: Option<f64>,
    pub extruder_temp: Option<f64>,
    pub target_extruder_temp: Option<f64>,
    pub print_status: Option<PrintStatus>,
    pub print_progress: Option<f64>,
}

impl DeviceSnapshot {
    fn unknown(connection: ConnectionStatus) -> Self {
        Self {
            connection,
            bed_temp: None,
            target_bed_temp: None,
            extruder_temp: None,
            target_extruder_temp: None,
            print_status: None,
            print_progress: None,
        }
    }
}

type PendingRefresh = Shared<BoxFuture<'static, ExchangeReport>>;

struct Inner {
    transport: Arc<dyn Transport>,
    logger: Logger,
    failures_to_disconnect: u32,
    state: RwLock<DeviceState>,
    // one exchange on the wire at a time
    exchange_gate: Mutex<()>,
    inflight: Mutex<Option<PendingRefresh>>,
}

/// Client for one printer. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PrinterClient {
    inner: Arc<Inner>,
}

impl PrinterClient {
    /// Client with the stock timings and failure threshold.
    pub fn new(endpoint: Endpoint, logger: Logger) -> Self {
        Self::with_timings(endpoint, ExchangeTimings::default(), logger)
    }

    pub fn with_timings(endpoint: Endpoint, timings: ExchangeTimings, logger: Logger) -> Self {
        Self::with_transport(
            Arc::new(TcpTransport::new(endpoint, timings)),
            logger,
            FAILURES_TO_DISCONNECT,
        )
    }

    pub fn from_config(config: &Config, logger: Logger) -> Self {
        Self::with_transport(
            Arc::new(TcpTransport::new(config.endpoint(), config.connection.timings())),
            logger,
            config.client.failures_to_disconnect,
        )
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        logger: Logger,
        failures_to_disconnect: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                logger,
                failures_to_disconnect: failures_to_disconnect.max(1),
                state: RwLock::new(DeviceState::new()),
                exchange_gate: Mutex::new(()),
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Query `M27` and fold the answer into the device state.
    ///
    /// Concurrent callers share a single exchange and all receive its report.
    /// The exchange runs on its own task, so dropping a caller does not abort it.
    pub async fn refresh(&self) -> ExchangeReport {
        let pending = {
            let mut slot = self.inner.inflight.lock().await;
            match slot.as_ref() {
                Some(pending) if pending.peek().is_none() => pending.clone(),
                _ => {
                    let pending = self.start_refresh();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn start_refresh(&self) -> PendingRefresh {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.refresh_cycle().await });

        let inner = self.inner.clone();
        async move {
            match task.await {
                Ok(report) => report,
                Err(e) => {
                    inner.inflight.lock().await.take();
                    inner.logger.log(format!("Refresh aborted: {}", e));
                    let state = inner.state.read().await;
                    ExchangeReport {
                        outcome: Err(ExchangeFailure::Aborted(e.to_string())),
                        connection: state.connection,
                        failure_streak: state.failure_streak,
                    }
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Send an arbitrary command; whatever telemetry comes back is applied.
    ///
    /// Does not count toward the failure streak.
    pub async fn issue_command(&self, command: GCode) -> ExchangeReport {
        self.inner.run_exchange(&command, false).await
    }

    pub async fn beep(&self) -> ExchangeReport {
        self.issue_command(GCode::Beep).await
    }

    pub async fn set_target_bed_temp(&self, celsius: f64) -> ExchangeReport {
        self.issue_command(GCode::SetBedTarget(celsius)).await
    }

    pub async fn set_target_extruder_temp(&self, celsius: f64) -> ExchangeReport {
        self.issue_command(GCode::set_extruder0_target(celsius)).await
    }

    pub async fn snapshot(&self) -> DeviceSnapshot {
        self.inner.state.read().await.snapshot()
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.read().await.connection
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_status().await == ConnectionStatus::Connected
    }

    pub async fn failure_streak(&self) -> u32 {
        self.inner.state.read().await.failure_streak
    }

    pub async fn bed_temp(&self) -> Option<f64> {
        self.snapshot().await.bed_temp
    }

    pub async fn target_bed_temp(&self) -> Option<f64> {
        self.snapshot().await.target_bed_temp
    }

    pub async fn extruder_temp(&self) -> Option<f64> {
        self.snapshot().await.extruder_temp
    }

    pub async fn target_extruder_temp(&self) -> Option<f64> {
        self.snapshot().await.target_extruder_temp
    }

    pub async fn print_status(&self) -> Option<PrintStatus> {
        self.snapshot().await.print_status
    }

    pub async fn print_progress(&self) -> Option<f64> {
        self.snapshot().await.print_progress
    }
}

impl Inner {
    async fn refresh_cycle(self: Arc<Self>) -> ExchangeReport {
        let report = self.run_exchange(&GCode::SdPrintStatus, true).await;
        self.inflight.lock().await.take();
        report
    }

    /// Run one exchange and apply it. The gate is held until state is updated,
    /// so exchanges land in the order they went out.
    async fn run_exchange(&self, command: &GCode, track_connectivity: bool) -> ExchangeReport {
        let _gate = self.exchange_gate.lock().await;
        let result = self.perform(command).await;

        let mut state = self.state.write().await;
        if let Ok(update) = &result {
            state.apply(update);
        }
        if track_connectivity {
            match &result {
                Ok(_) => {
                    if state.record_success() {
                        self.logger.log("Printer connected");
                    }
                }
                Err(_) => {
                    if state.record_failure(self.failures_to_disconnect) {
                        self.logger.log(format!(
                            "Printer disconnected after {} failed exchanges",
                            state.failure_streak
                        ));
                    }
                }
            }
        }

        ExchangeReport {
            outcome: result.map(|_| ()),
            connection: state.connection,
            failure_streak: state.failure_streak,
        }
    }

    async fn perform(&self, command: &GCode) -> Result<TelemetryUpdate, ExchangeFailure> {
        let response = match self.transport.exchange(command).await {
            Ok(response) => response,
            Err(e) => {
                self.logger.log(format!("{} failed: {}", command.mnemonic(), e));
                return Err(ExchangeFailure::Unreachable(e.to_string()));
            }
        };

        if let Some(fault) = response.fault {
            if fault.is_transport_failure() {
                self.logger.log(format!("{} failed: {}", command.mnemonic(), fault));
                return Err(fault.into());
            }
            self.logger.log(format!("{}: tolerated {}", command.mnemonic(), fault));
        }

        let update = telemetry::parse_response(&response.lines);
        for failure in &update.errors {
            self.logger.log(format!(
                "Update failed with: {} (line '{}')",
                failure.error, failure.line
            ));
        }
        Ok(update)
    }
}
