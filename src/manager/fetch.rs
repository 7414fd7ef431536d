use tokio::time::{Instant, sleep};
use tracing::{debug, instrument};

use super::BleManager;
use crate::config::{FetchOptions, RetryPolicy};
use crate::error::CommandError;
use crate::radio::model::{DeviceId, ServiceDescriptor};

/// Produces services for a device despite transient connection failures.
///
/// The cache is a fast exit at every retry boundary: before the first radio
/// command, and again after each backoff sleep, since a concurrent caller may
/// have populated it in the meantime. After the schedule is exhausted one
/// final unconditional attempt runs, so the pipeline never gives up without a
/// last-ditch effort.
#[instrument(skip(manager, options, retry), level = "debug", fields(device = %device))]
pub(crate) async fn fetch_services(
    manager: &BleManager,
    device: &DeviceId,
    options: &FetchOptions,
    retry: &RetryPolicy,
) -> Result<Vec<ServiceDescriptor>, CommandError> {
    if options.use_cache()
        && let Some(cached) = manager.cached_services(device).await?
    {
        debug!("serving services from cache");
        return Ok(cached);
    }

    let deadline = Instant::now() + retry.overall_deadline();
    for attempt in 0..retry.max_retries() {
        match attempt_fetch(manager, device).await {
            Ok(services) => {
                if options.use_cache() {
                    manager.store_services(device, services.clone()).await?;
                }
                cleanup(manager, device, options).await;
                return Ok(services);
            }
            Err(error) => {
                debug!(attempt, %error, "fetch attempt failed");
                let delay = retry.delay_for(attempt);
                if Instant::now() + delay >= deadline {
                    debug!("retry deadline reached");
                    break;
                }
                sleep(delay).await;

                if options.use_cache()
                    && let Some(cached) = manager.cached_services(device).await?
                {
                    debug!("cache was populated concurrently");
                    cleanup(manager, device, options).await;
                    return Ok(cached);
                }
            }
        }
    }

    let result = attempt_fetch(manager, device).await;
    if let Ok(services) = &result
        && options.use_cache()
    {
        manager.store_services(device, services.clone()).await?;
    }
    cleanup(manager, device, options).await;
    result
}

async fn attempt_fetch(
    manager: &BleManager,
    device: &DeviceId,
) -> Result<Vec<ServiceDescriptor>, CommandError> {
    match manager.connect(device).await {
        // Another caller holding the connection open is as good as connecting.
        Ok(()) | Err(CommandError::AlreadyConnected { .. }) => {}
        Err(error) => return Err(error),
    }
    manager.discover_services(device).await
}

/// Best-effort post-fetch disconnect. The primary result is already settled,
/// so failures are logged rather than surfaced.
async fn cleanup(manager: &BleManager, device: &DeviceId, options: &FetchOptions) {
    if !options.disconnect_after() {
        return;
    }
    match manager.disconnect(device).await {
        Ok(()) | Err(CommandError::NotConnected { .. }) => {}
        Err(error) => debug!(%device, %error, "post-fetch disconnect failed"),
    }
}
