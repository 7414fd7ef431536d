use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable opaque identity of a remote BLE peripheral.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    Serialize,
    Deserialize,
)]
pub struct DeviceId(String);

impl DeviceId {
    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Connection lifecycle state of a remote peripheral.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A peripheral observed during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    id: DeviceId,
    local_name: Option<String>,
    rssi: Option<i16>,
    state: ConnectionState,
}

impl FoundDevice {
    /// Creates a discovered-device record in the disconnected state.
    pub(crate) fn new(id: DeviceId, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id,
            local_name,
            rssi,
            state: ConnectionState::Disconnected,
        }
    }

    /// Returns the stable device identity.
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Refreshes advertisement data after a re-discovery of the same identity.
    pub(crate) fn refresh(&mut self, local_name: Option<String>, rssi: Option<i16>) {
        if local_name.is_some() {
            self.local_name = local_name;
        }
        if rssi.is_some() {
            self.rssi = rssi;
        }
    }
}

/// Shared snapshot of the current discovered-device list.
///
/// Snapshots are immutable once published; every subscriber observes whole
/// replacement lists, never in-place edits.
pub type DeviceListSnapshot = Arc<Vec<FoundDevice>>;

/// Metadata describing one service exposed by a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    uuid: String,
    primary: bool,
}

impl ServiceDescriptor {
    /// Creates a service descriptor.
    #[must_use]
    pub fn new(uuid: impl Into<String>, primary: bool) -> Self {
        Self {
            uuid: uuid.into(),
            primary,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns whether this is a primary service.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }
}

/// Immutable view of the radio's readiness and scan activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RadioSnapshot {
    pub authorized: bool,
    pub powered: bool,
    pub scanning: bool,
}

impl RadioSnapshot {
    /// Returns whether the radio is both authorized and powered.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.authorized && self.powered
    }
}
