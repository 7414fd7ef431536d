use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;

use super::link::{EVENT_CHANNEL_CAPACITY, RadioEvent, RadioLink};
use super::model::{DeviceId, ServiceDescriptor};
use crate::error::{FixtureError, RadioError};

/// A radio command observed by the fake backend, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices(DeviceId),
}

/// Parsed fake scan fixture: `id|name|rssi` records separated by `;`,
/// with `-` for an absent name or RSSI.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<FixtureDevice>,
}

#[derive(Debug, Clone)]
pub struct FixtureDevice {
    id: DeviceId,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let devices = value
            .split(';')
            .map(parse_fixture_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }
}

fn parse_fixture_record(raw_record: &str) -> Result<FixtureDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields[0].is_empty() {
        return Err(FixtureError::EmptyDeviceId);
    }

    let local_name = if fields[1] == "-" {
        None
    } else {
        Some(fields[1].to_string())
    };
    let rssi = if fields[2] == "-" {
        None
    } else {
        Some(fields[2].parse::<i16>()?)
    };

    Ok(FixtureDevice {
        id: fields[0].into(),
        local_name,
        rssi,
    })
}

/// Settings for constructing a fake radio backend.
#[derive(Debug, Builder)]
pub struct FakeRadioConfig {
    /// Devices emitted as discovery events whenever a scan starts.
    scan_fixture: Option<ScanFixture>,
    /// Emit `Connected` in response to connect commands.
    #[builder(default = true)]
    auto_connect: bool,
    /// Fail this many connect commands (with `ConnectFailed`) before
    /// `auto_connect` behaviour resumes.
    #[builder(default)]
    connect_failures: u32,
    /// Emit `Disconnected` in response to disconnect commands.
    #[builder(default = true)]
    auto_disconnect: bool,
    /// Emit `ServicesDiscovered` with this fixture in response to
    /// discover-services commands.
    auto_discover: Option<Vec<ServiceDescriptor>>,
}

/// Fake backend used in tests and non-hardware environments.
///
/// Commands are journaled and, depending on configuration, answered with
/// scripted events so the full event round-trip is exercised without a
/// radio. The paired [`FakeRadioHandle`] injects further events manually.
pub struct FakeRadio {
    events: mpsc::Sender<RadioEvent>,
    journal: Arc<Mutex<Vec<RadioCommand>>>,
    scan_fixture: Vec<FixtureDevice>,
    auto_connect: bool,
    remaining_connect_failures: Mutex<u32>,
    auto_disconnect: bool,
    auto_discover: Option<Vec<ServiceDescriptor>>,
}

impl FakeRadio {
    /// Creates a fake radio, its event channel, and a test handle.
    #[must_use]
    pub fn new(config: FakeRadioConfig) -> (Self, mpsc::Receiver<RadioEvent>, FakeRadioHandle) {
        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let journal = Arc::new(Mutex::new(Vec::new()));
        let radio = Self {
            events: events.clone(),
            journal: Arc::clone(&journal),
            scan_fixture: config
                .scan_fixture
                .map(Into::into)
                .unwrap_or_default(),
            auto_connect: config.auto_connect,
            remaining_connect_failures: Mutex::new(config.connect_failures),
            auto_disconnect: config.auto_disconnect,
            auto_discover: config.auto_discover,
        };
        let handle = FakeRadioHandle { events, journal };
        (radio, event_rx, handle)
    }

    fn record(&self, command: RadioCommand) {
        self.journal
            .lock()
            .expect("journal lock should not be poisoned")
            .push(command);
    }

    async fn emit(&self, event: RadioEvent) -> Result<(), RadioError> {
        self.events
            .send(event)
            .await
            .map_err(|_| RadioError::EventChannelClosed)
    }
}

#[async_trait]
impl RadioLink for FakeRadio {
    async fn start_scan(&self) -> Result<(), RadioError> {
        self.record(RadioCommand::StartScan);
        for device in &self.scan_fixture {
            self.emit(RadioEvent::Discovered {
                id: device.id.clone(),
                local_name: device.local_name.clone(),
                rssi: device.rssi,
            })
            .await?;
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.record(RadioCommand::StopScan);
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<(), RadioError> {
        self.record(RadioCommand::Connect(device.clone()));

        let fail = {
            let mut remaining = self
                .remaining_connect_failures
                .lock()
                .expect("failure counter lock should not be poisoned");
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        };

        if fail {
            self.emit(RadioEvent::ConnectFailed {
                id: device.clone(),
                reason: "scripted connect failure".to_string(),
            })
            .await?;
        } else if self.auto_connect {
            self.emit(RadioEvent::Connected { id: device.clone() }).await?;
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<(), RadioError> {
        self.record(RadioCommand::Disconnect(device.clone()));
        if self.auto_disconnect {
            self.emit(RadioEvent::Disconnected {
                id: device.clone(),
                reason: None,
            })
            .await?;
        }
        Ok(())
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<(), RadioError> {
        self.record(RadioCommand::DiscoverServices(device.clone()));
        if let Some(services) = &self.auto_discover {
            self.emit(RadioEvent::ServicesDiscovered {
                id: device.clone(),
                result: Ok(services.clone()),
            })
            .await?;
        }
        Ok(())
    }
}

/// Test-side view of a [`FakeRadio`]: inspects the command journal and
/// injects events as if the radio stack had emitted them.
#[derive(Clone)]
pub struct FakeRadioHandle {
    events: mpsc::Sender<RadioEvent>,
    journal: Arc<Mutex<Vec<RadioCommand>>>,
}

impl FakeRadioHandle {
    /// Returns all commands issued so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<RadioCommand> {
        self.journal
            .lock()
            .expect("journal lock should not be poisoned")
            .clone()
    }

    /// Counts issued commands matching a predicate.
    #[must_use]
    pub fn command_count(&self, predicate: impl Fn(&RadioCommand) -> bool) -> usize {
        self.journal
            .lock()
            .expect("journal lock should not be poisoned")
            .iter()
            .filter(|command| predicate(command))
            .count()
    }

    /// Counts connect commands for one device.
    #[must_use]
    pub fn connect_attempts(&self, device: &DeviceId) -> usize {
        self.command_count(|command| matches!(command, RadioCommand::Connect(id) if id == device))
    }

    /// Injects a radio event.
    ///
    /// # Panics
    ///
    /// Panics if the consuming manager has been dropped.
    pub async fn emit(&self, event: RadioEvent) {
        self.events
            .send(event)
            .await
            .expect("manager should still be consuming radio events");
    }

    /// Marks the radio authorized and powered.
    pub async fn power_on(&self) {
        self.emit(RadioEvent::StateChanged {
            authorized: true,
            powered: true,
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("AA:BB|Sensor-1|-43", 1)]
    #[case("AA:BB|Sensor-1|-43;CC:DD|-|-", 2)]
    fn scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let fixture: ScanFixture = fixture.parse().expect("fixture should parse");
        let devices: Vec<FixtureDevice> = fixture.into();
        assert_eq!(expected_count, devices.len());
    }

    #[test]
    fn scan_fixture_dash_means_absent() {
        let fixture: ScanFixture = "AA:BB|-|-".parse().expect("fixture should parse");
        let devices: Vec<FixtureDevice> = fixture.into();
        assert_eq!(None, devices[0].local_name);
        assert_eq!(None, devices[0].rssi);
    }

    #[rstest]
    #[case("", FixtureError::EmptyFixture)]
    #[case("AA:BB|Sensor-1", FixtureError::InvalidRecordFieldCount)]
    #[case("|Sensor-1|-43", FixtureError::EmptyDeviceId)]
    fn scan_fixture_rejects_malformed_records(
        #[case] fixture: &str,
        #[case] expected: FixtureError,
    ) {
        let result = fixture.parse::<ScanFixture>();
        let error = result.expect_err("fixture should be rejected");
        assert_eq!(
            std::mem::discriminant(&expected),
            std::mem::discriminant(&error)
        );
    }

    #[test]
    fn scan_fixture_rejects_bad_rssi() {
        let result = "AA:BB|Sensor-1|not-a-number".parse::<ScanFixture>();
        assert_matches!(result, Err(FixtureError::InvalidRssi(_)));
    }

    #[tokio::test]
    async fn start_scan_emits_fixture_devices() {
        let config = FakeRadioConfig::builder()
            .scan_fixture("AA:BB|Sensor-1|-43;CC:DD|Sensor-2|-60".parse().expect("fixture"))
            .build();
        let (radio, mut event_rx, handle) = FakeRadio::new(config);

        radio.start_scan().await.expect("scan should start");

        assert_matches!(
            event_rx.recv().await,
            Some(RadioEvent::Discovered { id, .. }) if id == "AA:BB".into()
        );
        assert_matches!(
            event_rx.recv().await,
            Some(RadioEvent::Discovered { id, .. }) if id == "CC:DD".into()
        );
        assert_eq!(vec![RadioCommand::StartScan], handle.commands());
    }

    #[tokio::test]
    async fn commands_report_a_closed_event_channel() {
        let config = FakeRadioConfig::builder()
            .scan_fixture("AA:BB|Sensor-1|-43".parse().expect("fixture"))
            .build();
        let (radio, event_rx, _handle) = FakeRadio::new(config);
        drop(event_rx);

        let result = radio.start_scan().await;
        assert_matches!(result, Err(RadioError::EventChannelClosed));
    }

    #[tokio::test]
    async fn connect_failures_are_consumed_before_auto_connect() {
        let config = FakeRadioConfig::builder().connect_failures(1).build();
        let (radio, mut event_rx, _handle) = FakeRadio::new(config);
        let device: DeviceId = "AA:BB".into();

        radio.connect(&device).await.expect("command accepted");
        assert_matches!(
            event_rx.recv().await,
            Some(RadioEvent::ConnectFailed { .. })
        );

        radio.connect(&device).await.expect("command accepted");
        assert_matches!(event_rx.recv().await, Some(RadioEvent::Connected { .. }));
    }
}
