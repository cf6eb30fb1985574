// shui-rs: telemetry and control client for Shui-firmware 3D printers

pub mod config;
pub mod connection;
pub mod gcode;
pub mod logging;
pub mod printer;
pub mod telemetry;

pub use config::{Config, ConfigError, load_config};
pub use connection::{
    Connection, ConnectionError, Endpoint, ExchangeFault, ExchangeTimings, Response, TcpTransport,
    Transport,
};
pub use gcode::GCode;
pub use logging::Logger;
pub use printer::{
    ConnectionStatus, DeviceSnapshot, ExchangeFailure, ExchangeReport, PrintStatus, PrinterClient,
};
