use async_trait::async_trait;
use tokio::sync::mpsc;

use super::model::{DeviceId, ServiceDescriptor};
use crate::error::RadioError;

/// Command surface of a radio backend.
///
/// Commands only *issue* work; outcomes arrive later as [`RadioEvent`]s on the
/// event channel handed out at backend construction. A command returning `Ok`
/// therefore means "accepted", not "completed".
#[async_trait]
pub trait RadioLink: Send + Sync + 'static {
    async fn start_scan(&self) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn connect(&self, device: &DeviceId) -> Result<(), RadioError>;

    async fn disconnect(&self, device: &DeviceId) -> Result<(), RadioError>;

    async fn discover_services(&self, device: &DeviceId) -> Result<(), RadioError>;
}

/// Asynchronous callbacks from the radio stack.
///
/// Events may originate on arbitrary backend tasks; the manager funnels them
/// into its own single-owner loop before touching shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StateChanged {
        authorized: bool,
        powered: bool,
    },
    Discovered {
        id: DeviceId,
        local_name: Option<String>,
        rssi: Option<i16>,
    },
    Connected {
        id: DeviceId,
    },
    ConnectFailed {
        id: DeviceId,
        reason: String,
    },
    Disconnected {
        id: DeviceId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        id: DeviceId,
        result: Result<Vec<ServiceDescriptor>, String>,
    },
}

/// Channel on which a backend delivers its events.
pub type EventSender = mpsc::Sender<RadioEvent>;

/// Buffer depth for backend event channels.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;
