use std::time::Duration;

use thiserror::Error;

use crate::radio::model::DeviceId;

/// The operation kinds that hold single-flight slots per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OperationKind {
    Connect,
    Disconnect,
    DiscoverServices,
}

/// Errors returned by manager operations.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("a {operation} request for `{device}` is already pending")]
    AlreadyPending {
        operation: OperationKind,
        device: DeviceId,
    },
    #[error("device `{device}` is already connected")]
    AlreadyConnected { device: DeviceId },
    #[error("device `{device}` is not connected")]
    NotConnected { device: DeviceId },
    #[error("connecting to `{device}` failed: {reason}")]
    ConnectionFailed { device: DeviceId, reason: String },
    #[error("disconnecting from `{device}` failed: {reason}")]
    DisconnectionFailed { device: DeviceId, reason: String },
    #[error("service discovery on `{device}` failed: {reason}")]
    DiscoveryFailed { device: DeviceId, reason: String },
    #[error(
        "timed out waiting for the {operation} event from `{device}` after {timeout}",
        timeout = humantime::format_duration(*timeout)
    )]
    Timeout {
        operation: OperationKind,
        device: DeviceId,
        timeout: Duration,
    },
    #[error("the request was cancelled before completion")]
    Cancelled,
    #[error("the manager has shut down")]
    ManagerClosed,
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Errors surfaced by a radio backend while issuing commands.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("the radio event channel is closed")]
    EventChannelClosed,
    #[error("peripheral `{device}` is unknown to the adapter")]
    UnknownPeripheral { device: DeviceId },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned when parsing fake scan fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake scan fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain an empty device id")]
    EmptyDeviceId,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
