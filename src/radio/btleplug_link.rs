use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, trace};

use super::link::{EVENT_CHANNEL_CAPACITY, EventSender, RadioEvent, RadioLink};
use super::model::{DeviceId, ServiceDescriptor};
use crate::error::RadioError;

/// Radio backend backed by `btleplug`, bound to the first system adapter.
///
/// Commands return once issued; outcomes of connection-shaped requests are
/// completed on detached tasks and delivered as [`RadioEvent`]s, the same
/// way unsolicited central events are.
pub struct BtleplugLink {
    adapter: Adapter,
    events: EventSender,
}

impl BtleplugLink {
    /// Creates the real BLE backend and its event channel.
    ///
    /// Platform authorization is checked by `btleplug` at manager creation,
    /// so an adapter we can open is treated as authorized; power state
    /// arrives through central `StateUpdate` events.
    pub async fn new() -> Result<(Self, mpsc::Receiver<RadioEvent>), RadioError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(RadioError::NoAdapters)?;

        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        spawn_event_pump(adapter.clone(), events.clone()).await?;

        Ok((Self { adapter, events }, event_rx))
    }

    async fn peripheral(&self, device: &DeviceId) -> Result<Peripheral, RadioError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.id().to_string() == device.as_str() {
                return Ok(peripheral);
            }
        }
        Err(RadioError::UnknownPeripheral {
            device: device.clone(),
        })
    }
}

#[async_trait]
impl RadioLink for BtleplugLink {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<(), RadioError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(device = %device))]
    async fn connect(&self, device: &DeviceId) -> Result<(), RadioError> {
        let peripheral = self.peripheral(device).await?;
        let events = self.events.clone();
        let id = device.clone();
        tokio::spawn(async move {
            let outcome = async {
                if !peripheral.is_connected().await? {
                    peripheral.connect().await?;
                }
                Ok::<_, btleplug::Error>(())
            }
            .await;
            let event = match outcome {
                Ok(()) => RadioEvent::Connected { id },
                Err(error) => RadioEvent::ConnectFailed {
                    id,
                    reason: error.to_string(),
                },
            };
            let _ = events.send(event).await;
        });
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(device = %device))]
    async fn disconnect(&self, device: &DeviceId) -> Result<(), RadioError> {
        let peripheral = self.peripheral(device).await?;
        let events = self.events.clone();
        let id = device.clone();
        tokio::spawn(async move {
            let reason = peripheral
                .disconnect()
                .await
                .err()
                .map(|error| error.to_string());
            let _ = events.send(RadioEvent::Disconnected { id, reason }).await;
        });
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(device = %device))]
    async fn discover_services(&self, device: &DeviceId) -> Result<(), RadioError> {
        let peripheral = self.peripheral(device).await?;
        let events = self.events.clone();
        let id = device.clone();
        tokio::spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(collect_services(&peripheral)),
                Err(error) => Err(error.to_string()),
            };
            let _ = events
                .send(RadioEvent::ServicesDiscovered { id, result })
                .await;
        });
        Ok(())
    }
}

async fn spawn_event_pump(adapter: Adapter, events: EventSender) -> Result<(), RadioError> {
    let mut stream = adapter.events().await?;
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            trace!(?event, "central event");
            let translated = match event {
                CentralEvent::StateUpdate(state) => Some(RadioEvent::StateChanged {
                    authorized: true,
                    powered: matches!(state, CentralState::PoweredOn),
                }),
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    discovered_event(&adapter, &id).await
                }
                CentralEvent::DeviceConnected(id) => Some(RadioEvent::Connected {
                    id: device_id(&id),
                }),
                CentralEvent::DeviceDisconnected(id) => Some(RadioEvent::Disconnected {
                    id: device_id(&id),
                    reason: None,
                }),
                _ => None,
            };
            if let Some(event) = translated
                && events.send(event).await.is_err()
            {
                break;
            }
        }
        debug!("btleplug event stream ended");
    });
    Ok(())
}

async fn discovered_event(adapter: &Adapter, id: &PeripheralId) -> Option<RadioEvent> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok().flatten();
    Some(RadioEvent::Discovered {
        id: device_id(id),
        local_name: properties
            .as_ref()
            .and_then(|properties| properties.local_name.clone()),
        rssi: properties.as_ref().and_then(|properties| properties.rssi),
    })
}

fn device_id(id: &PeripheralId) -> DeviceId {
    id.to_string().into()
}

fn collect_services(peripheral: &Peripheral) -> Vec<ServiceDescriptor> {
    let mut services: Vec<ServiceDescriptor> = peripheral
        .services()
        .iter()
        .map(|service| ServiceDescriptor::new(service.uuid.to_string().to_lowercase(), service.primary))
        .collect();
    services.sort_by(|left, right| left.uuid().cmp(right.uuid()));
    services
}
