use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::broadcaster::{DiscoveryBroadcaster, SubscriberId};
use super::cache::ServiceCache;
use super::pending::{PendingRequestRegistry, Reply, TimeoutNotice};
use super::scan::{RadioStateTracker, ScanScheduler};
use crate::config::ManagerConfig;
use crate::error::{CommandError, OperationKind};
use crate::radio::link::{RadioEvent, RadioLink};
use crate::radio::model::{
    ConnectionState, DeviceId, DeviceListSnapshot, FoundDevice, RadioSnapshot, ServiceDescriptor,
};

/// Requests posted from [`crate::BleManager`] handles into the actor.
pub(crate) enum Command {
    Connect {
        device: DeviceId,
        reply: Reply<()>,
    },
    Disconnect {
        device: DeviceId,
        reply: Reply<()>,
    },
    DiscoverServices {
        device: DeviceId,
        reply: Reply<Vec<ServiceDescriptor>>,
    },
    OpenDeviceStream {
        reply: oneshot::Sender<(SubscriberId, watch::Receiver<DeviceListSnapshot>)>,
    },
    CachedServices {
        device: DeviceId,
        reply: oneshot::Sender<Option<Vec<ServiceDescriptor>>>,
    },
    StoreServices {
        device: DeviceId,
        services: Vec<ServiceDescriptor>,
    },
    InvalidateServices {
        device: DeviceId,
        reply: oneshot::Sender<bool>,
    },
    ClearServiceCache,
    ResetDiscovered,
    SubscriberCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Single owner of all mutable manager state.
///
/// Every mutation (pending-request tables, the discovered-device list, the
/// subscriber set, the cache, scan state) happens inside `run`'s `select!`
/// loop. Radio callbacks, API calls, timer firings and stream drop guards all
/// funnel through it as messages, which is what eliminates callback races.
pub(crate) struct ManagerActor {
    link: Arc<dyn RadioLink>,
    config: ManagerConfig,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<RadioEvent>,
    timeout_tx: mpsc::UnboundedSender<TimeoutNotice>,
    timeout_rx: mpsc::UnboundedReceiver<TimeoutNotice>,
    unsubscribe_rx: mpsc::UnboundedReceiver<SubscriberId>,
    devices: HashMap<DeviceId, FoundDevice>,
    discovery_order: Vec<DeviceId>,
    connects: PendingRequestRegistry<()>,
    disconnects: PendingRequestRegistry<()>,
    discoveries: PendingRequestRegistry<Vec<ServiceDescriptor>>,
    cache: ServiceCache,
    broadcaster: DiscoveryBroadcaster,
    tracker: RadioStateTracker,
    scheduler: ScanScheduler,
    state_tx: watch::Sender<RadioSnapshot>,
}

impl ManagerActor {
    pub(crate) fn new(
        link: Arc<dyn RadioLink>,
        config: ManagerConfig,
        command_rx: mpsc::Receiver<Command>,
        event_rx: mpsc::Receiver<RadioEvent>,
        unsubscribe_rx: mpsc::UnboundedReceiver<SubscriberId>,
        state_tx: watch::Sender<RadioSnapshot>,
    ) -> Self {
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        Self {
            link,
            config,
            command_rx,
            event_rx,
            timeout_tx,
            timeout_rx,
            unsubscribe_rx,
            devices: HashMap::new(),
            discovery_order: Vec::new(),
            connects: PendingRequestRegistry::new(OperationKind::Connect),
            disconnects: PendingRequestRegistry::new(OperationKind::Disconnect),
            discoveries: PendingRequestRegistry::new(OperationKind::DiscoverServices),
            cache: ServiceCache::default(),
            broadcaster: DiscoveryBroadcaster::new(),
            tracker: RadioStateTracker::default(),
            scheduler: ScanScheduler::default(),
            state_tx,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("manager actor started");

        loop {
            tokio::select! {
                maybe_command = self.command_rx.recv() => {
                    match maybe_command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            debug!("all manager handles dropped");
                            break;
                        }
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }
                Some(notice) = self.timeout_rx.recv() => {
                    self.handle_timeout(notice);
                }
                Some(subscriber) = self.unsubscribe_rx.recv() => {
                    if self.broadcaster.close(subscriber) {
                        self.reconcile_scan().await;
                    }
                }
            }
        }

        self.shutdown_cleanup().await;
    }

    /// Returns `false` when the actor should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { device, reply } => self.handle_connect(device, reply).await,
            Command::Disconnect { device, reply } => self.handle_disconnect(device, reply).await,
            Command::DiscoverServices { device, reply } => {
                self.handle_discover_services(device, reply).await;
            }
            Command::OpenDeviceStream { reply } => {
                let (id, rx) = self.broadcaster.open();
                if reply.send((id, rx)).is_err() {
                    self.broadcaster.close(id);
                }
                self.reconcile_scan().await;
            }
            Command::CachedServices { device, reply } => {
                let cached = self.cache.get(&device).map(<[ServiceDescriptor]>::to_vec);
                let _ = reply.send(cached);
            }
            Command::StoreServices { device, services } => {
                trace!(%device, count = services.len(), "caching discovered services");
                self.cache.put(device, services);
            }
            Command::InvalidateServices { device, reply } => {
                let _ = reply.send(self.cache.invalidate(&device));
            }
            Command::ClearServiceCache => self.cache.clear(),
            Command::ResetDiscovered => {
                debug!("resetting discovered-device list");
                self.discovery_order.clear();
                self.devices
                    .retain(|_, device| device.state() != ConnectionState::Disconnected);
                self.publish_devices();
            }
            Command::SubscriberCount { reply } => {
                let _ = reply.send(self.broadcaster.subscriber_count());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn handle_connect(&mut self, device: DeviceId, reply: Reply<()>) {
        if self.device_state(&device) == ConnectionState::Connected {
            let _ = reply.send(Err(CommandError::AlreadyConnected { device }));
            return;
        }
        if !self.connects.begin(
            device.clone(),
            reply,
            self.config.connect_timeout(),
            &self.timeout_tx,
        ) {
            return;
        }

        self.set_device_state(&device, ConnectionState::Connecting);
        if let Err(error) = self.link.connect(&device).await {
            warn!(%device, %error, "connect command rejected by radio");
            self.set_device_state(&device, ConnectionState::Disconnected);
            self.connects.resolve(
                &device,
                Err(CommandError::ConnectionFailed {
                    device: device.clone(),
                    reason: error.to_string(),
                }),
            );
        }
    }

    async fn handle_disconnect(&mut self, device: DeviceId, reply: Reply<()>) {
        if self.device_state(&device) != ConnectionState::Connected {
            let _ = reply.send(Err(CommandError::NotConnected { device }));
            return;
        }
        if !self.disconnects.begin(
            device.clone(),
            reply,
            self.config.disconnect_timeout(),
            &self.timeout_tx,
        ) {
            return;
        }

        self.set_device_state(&device, ConnectionState::Disconnecting);
        if let Err(error) = self.link.disconnect(&device).await {
            warn!(%device, %error, "disconnect command rejected by radio");
            self.set_device_state(&device, ConnectionState::Connected);
            self.disconnects.resolve(
                &device,
                Err(CommandError::DisconnectionFailed {
                    device: device.clone(),
                    reason: error.to_string(),
                }),
            );
        }
    }

    async fn handle_discover_services(
        &mut self,
        device: DeviceId,
        reply: Reply<Vec<ServiceDescriptor>>,
    ) {
        if self.device_state(&device) != ConnectionState::Connected {
            let _ = reply.send(Err(CommandError::NotConnected { device }));
            return;
        }
        if !self.discoveries.begin(
            device.clone(),
            reply,
            self.config.discovery_timeout(),
            &self.timeout_tx,
        ) {
            return;
        }

        if let Err(error) = self.link.discover_services(&device).await {
            warn!(%device, %error, "service discovery rejected by radio");
            self.discoveries.resolve(
                &device,
                Err(CommandError::DiscoveryFailed {
                    device: device.clone(),
                    reason: error.to_string(),
                }),
            );
        }
    }

    async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateChanged {
                authorized,
                powered,
            } => {
                if self.tracker.update(authorized, powered) {
                    info!(authorized, powered, "radio state changed");
                }
                self.reconcile_scan().await;
            }
            RadioEvent::Discovered {
                id,
                local_name,
                rssi,
            } => {
                self.devices
                    .entry(id.clone())
                    .and_modify(|device| device.refresh(local_name.clone(), rssi))
                    .or_insert_with(|| FoundDevice::new(id.clone(), local_name, rssi));
                if !self.discovery_order.contains(&id) {
                    debug!(device = %id, "peripheral discovered");
                    self.discovery_order.push(id);
                }
                self.publish_devices();
            }
            RadioEvent::Connected { id } => {
                trace!(device = %id, "connected");
                self.set_device_state(&id, ConnectionState::Connected);
                self.connects.resolve(&id, Ok(()));
            }
            RadioEvent::ConnectFailed { id, reason } => {
                debug!(device = %id, reason, "connect failed");
                self.set_device_state(&id, ConnectionState::Disconnected);
                self.connects.resolve(
                    &id,
                    Err(CommandError::ConnectionFailed {
                        device: id.clone(),
                        reason,
                    }),
                );
            }
            RadioEvent::Disconnected { id, reason } => {
                trace!(device = %id, ?reason, "disconnected");
                self.set_device_state(&id, ConnectionState::Disconnected);
                match reason {
                    Some(reason) if self.disconnects.is_pending(&id) => {
                        self.disconnects.resolve(
                            &id,
                            Err(CommandError::DisconnectionFailed {
                                device: id.clone(),
                                reason,
                            }),
                        );
                    }
                    _ => {
                        self.disconnects.resolve(&id, Ok(()));
                    }
                }
                // A device that went away cannot finish service discovery.
                self.discoveries
                    .resolve(&id, Err(CommandError::NotConnected { device: id.clone() }));
            }
            RadioEvent::ServicesDiscovered { id, result } => {
                let result = result.map_err(|reason| CommandError::DiscoveryFailed {
                    device: id.clone(),
                    reason,
                });
                self.discoveries.resolve(&id, result);
            }
        }
    }

    fn handle_timeout(&mut self, notice: TimeoutNotice) {
        match notice.operation {
            OperationKind::Connect => {
                let was_pending = self.connects.is_pending(&notice.device);
                self.connects.handle_timeout(&notice);
                // The radio never answered; report the device as it stands.
                if was_pending
                    && !self.connects.is_pending(&notice.device)
                    && self.device_state(&notice.device) == ConnectionState::Connecting
                {
                    self.set_device_state(&notice.device, ConnectionState::Disconnected);
                }
            }
            OperationKind::Disconnect => self.disconnects.handle_timeout(&notice),
            OperationKind::DiscoverServices => self.discoveries.handle_timeout(&notice),
        }
    }

    fn device_state(&self, device: &DeviceId) -> ConnectionState {
        self.devices
            .get(device)
            .map_or(ConnectionState::Disconnected, FoundDevice::state)
    }

    fn set_device_state(&mut self, device: &DeviceId, state: ConnectionState) {
        let entry = self
            .devices
            .entry(device.clone())
            .or_insert_with(|| FoundDevice::new(device.clone(), None, None));
        if entry.state() != state {
            entry.set_state(state);
            self.publish_devices();
        }
    }

    /// Rebuilds the first-seen-ordered snapshot and broadcasts it.
    fn publish_devices(&mut self) {
        let devices = self
            .discovery_order
            .iter()
            .filter_map(|id| self.devices.get(id).cloned())
            .collect();
        self.broadcaster.publish(devices);
    }

    async fn reconcile_scan(&mut self) {
        self.scheduler
            .reconcile(
                self.tracker.ready(),
                self.broadcaster.subscriber_count(),
                self.link.as_ref(),
            )
            .await;
        self.publish_radio_state();
    }

    fn publish_radio_state(&self) {
        self.state_tx.send_replace(RadioSnapshot {
            authorized: self.tracker.authorized(),
            powered: self.tracker.powered(),
            scanning: self.scheduler.is_scanning(),
        });
    }

    async fn shutdown_cleanup(&mut self) {
        info!("manager actor stopping");
        self.connects.cancel_all();
        self.disconnects.cancel_all();
        self.discoveries.cancel_all();
        if self.scheduler.is_scanning() {
            self.scheduler.reconcile(false, 0, self.link.as_ref()).await;
        }
        self.publish_radio_state();
        // Dropping the broadcaster ends every subscriber stream.
    }
}
