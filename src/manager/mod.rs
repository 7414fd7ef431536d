mod actor;
mod broadcaster;
mod cache;
mod fetch;
mod pending;
mod scan;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;
use tracing::instrument;

use self::actor::{Command, ManagerActor};
use self::broadcaster::SubscriberId;
use self::pending::Reply;
use crate::config::{FetchOptions, ManagerConfig};
use crate::error::CommandError;
use crate::radio::link::{RadioEvent, RadioLink};
use crate::radio::model::{DeviceId, DeviceListSnapshot, RadioSnapshot, ServiceDescriptor};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Concurrency-safe facade over an event-driven BLE central radio stack.
///
/// All shared state lives in a background actor; this handle is a cheap
/// clone that posts commands and awaits replies. Operations on the same
/// device are single-flight; operations on different devices proceed
/// independently.
#[derive(Clone)]
pub struct BleManager {
    commands: mpsc::Sender<Command>,
    unsubscribe_tx: mpsc::UnboundedSender<SubscriberId>,
    state_rx: watch::Receiver<RadioSnapshot>,
    config: Arc<ManagerConfig>,
}

impl BleManager {
    /// Spawns the manager actor over a radio backend and its event channel.
    #[must_use]
    pub fn new(
        link: impl RadioLink,
        events: mpsc::Receiver<RadioEvent>,
        config: ManagerConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RadioSnapshot::default());

        let actor = ManagerActor::new(
            Arc::new(link),
            config.clone(),
            command_rx,
            events,
            unsubscribe_rx,
            state_tx,
        );
        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            unsubscribe_tx,
            state_rx,
            config: Arc::new(config),
        }
    }

    /// Spawns a manager with default timeouts and retry policy.
    #[must_use]
    pub fn with_defaults(link: impl RadioLink, events: mpsc::Receiver<RadioEvent>) -> Self {
        Self::new(link, events, ManagerConfig::default())
    }

    /// Returns the current radio snapshot.
    #[must_use]
    pub fn state(&self) -> RadioSnapshot {
        *self.state_rx.borrow()
    }

    /// Returns a stream of radio snapshots, starting with the current one.
    #[must_use]
    pub fn state_stream(&self) -> WatchStream<RadioSnapshot> {
        WatchStream::new(self.state_rx.clone())
    }

    /// Opens a discovery stream.
    ///
    /// The first element is the current device list, even when no new
    /// discovery has happened since. The stream is infinite and not
    /// restartable; dropping it deregisters its subscriber, and scanning
    /// stops once no subscriber remains.
    pub async fn discovered_devices(&self) -> Result<DeviceStream, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::OpenDeviceStream { reply: tx }).await?;
        let (subscriber, devices_rx) = rx.await.map_err(|_| CommandError::ManagerClosed)?;
        Ok(DeviceStream {
            inner: WatchStream::new(devices_rx),
            _guard: StreamGuard {
                subscriber,
                unsubscribe: self.unsubscribe_tx.clone(),
            },
        })
    }

    /// Connects to a device, resolving when the radio reports the outcome.
    #[instrument(skip(self), level = "debug", fields(device = %device))]
    pub async fn connect(&self, device: &DeviceId) -> Result<(), CommandError> {
        self.request(|reply| Command::Connect {
            device: device.clone(),
            reply,
        })
        .await
    }

    /// Disconnects from a connected device.
    #[instrument(skip(self), level = "debug", fields(device = %device))]
    pub async fn disconnect(&self, device: &DeviceId) -> Result<(), CommandError> {
        self.request(|reply| Command::Disconnect {
            device: device.clone(),
            reply,
        })
        .await
    }

    /// Discovers services on a connected device.
    #[instrument(skip(self), level = "debug", fields(device = %device))]
    pub async fn discover_services(
        &self,
        device: &DeviceId,
    ) -> Result<Vec<ServiceDescriptor>, CommandError> {
        self.request(|reply| Command::DiscoverServices {
            device: device.clone(),
            reply,
        })
        .await
    }

    /// Fetches services through the retrying pipeline (cache fast-exit,
    /// bounded exponential backoff, final unconditional attempt).
    pub async fn fetch_services(
        &self,
        device: &DeviceId,
        options: FetchOptions,
    ) -> Result<Vec<ServiceDescriptor>, CommandError> {
        fetch::fetch_services(self, device, &options, self.config.retry()).await
    }

    /// Returns the cached services for a device, if any.
    pub async fn cached_services(
        &self,
        device: &DeviceId,
    ) -> Result<Option<Vec<ServiceDescriptor>>, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::CachedServices {
            device: device.clone(),
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| CommandError::ManagerClosed)
    }

    pub(crate) async fn store_services(
        &self,
        device: &DeviceId,
        services: Vec<ServiceDescriptor>,
    ) -> Result<(), CommandError> {
        self.send(Command::StoreServices {
            device: device.clone(),
            services,
        })
        .await
    }

    /// Drops the cached services for a device; returns whether an entry
    /// existed.
    pub async fn invalidate_services(&self, device: &DeviceId) -> Result<bool, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::InvalidateServices {
            device: device.clone(),
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| CommandError::ManagerClosed)
    }

    /// Empties the service cache.
    pub async fn clear_service_cache(&self) -> Result<(), CommandError> {
        self.send(Command::ClearServiceCache).await
    }

    /// Clears the discovered-device list. Devices with a live connection
    /// state are kept in the manager's bookkeeping but leave the list until
    /// re-discovered.
    pub async fn reset_discovered(&self) -> Result<(), CommandError> {
        self.send(Command::ResetDiscovered).await
    }

    /// Returns the number of open discovery streams. Diagnostic.
    pub async fn subscriber_count(&self) -> Result<usize, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SubscriberCount { reply: tx }).await?;
        rx.await.map_err(|_| CommandError::ManagerClosed)
    }

    /// Stops scanning, cancels every pending request with `Cancelled` and
    /// terminates all discovery streams. Idempotent.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| CommandError::ManagerClosed)?
    }

    async fn send(&self, command: Command) -> Result<(), CommandError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CommandError::ManagerClosed)
    }
}

/// Lazy, infinite stream of device-list snapshots.
///
/// Yields the snapshot current at open time first, then every later
/// replacement; intermediate snapshots a slow consumer missed are skipped. Dropping the stream deregisters its subscriber.
pub struct DeviceStream {
    inner: WatchStream<DeviceListSnapshot>,
    _guard: StreamGuard,
}

impl Stream for DeviceStream {
    type Item = DeviceListSnapshot;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

struct StreamGuard {
    subscriber: SubscriberId,
    unsubscribe: mpsc::UnboundedSender<SubscriberId>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // Actor-side close is idempotent, so racing with shutdown is fine.
        let _ = self.unsubscribe.send(self.subscriber);
    }
}
