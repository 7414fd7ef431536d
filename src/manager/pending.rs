use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{CommandError, OperationKind};
use crate::radio::model::DeviceId;

/// One-shot reply channel carried by every awaitable manager operation.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

/// Posted back into the owning loop when a pending request's timer fires.
///
/// The request id distinguishes the timed-out request from a later request
/// for the same device, so a stale timer can never cancel fresh work.
#[derive(Debug)]
pub(crate) struct TimeoutNotice {
    pub(crate) operation: OperationKind,
    pub(crate) device: DeviceId,
    pub(crate) request_id: u64,
    pub(crate) timeout: Duration,
}

struct Slot<T> {
    request_id: u64,
    reply: Reply<T>,
    timer: JoinHandle<()>,
}

/// Single-flight promise table for one operation kind.
///
/// At most one slot exists per device. Whichever of {resolve, timeout} acts
/// first wins; the loser is a no-op. All methods must be called from the
/// single owning task, which is what makes the races deterministic.
pub(crate) struct PendingRequestRegistry<T> {
    operation: OperationKind,
    slots: HashMap<DeviceId, Slot<T>>,
    next_request_id: u64,
}

impl<T> PendingRequestRegistry<T> {
    pub(crate) fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            slots: HashMap::new(),
            next_request_id: 0,
        }
    }

    /// Registers a pending slot and arms its timeout timer.
    ///
    /// Returns `false` after replying `AlreadyPending` when the device
    /// already holds a slot; the caller must then skip the radio command.
    pub(crate) fn begin(
        &mut self,
        device: DeviceId,
        reply: Reply<T>,
        timeout: Duration,
        timeouts: &mpsc::UnboundedSender<TimeoutNotice>,
    ) -> bool {
        if self.slots.contains_key(&device) {
            let _ = reply.send(Err(CommandError::AlreadyPending {
                operation: self.operation,
                device,
            }));
            return false;
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let timer = tokio::spawn({
            let operation = self.operation;
            let device = device.clone();
            let timeouts = timeouts.clone();
            async move {
                tokio::time::sleep(timeout).await;
                let _ = timeouts.send(TimeoutNotice {
                    operation,
                    device,
                    request_id,
                    timeout,
                });
            }
        });

        trace!(%device, operation = %self.operation, request_id, "pending request registered");
        self.slots.insert(
            device,
            Slot {
                request_id,
                reply,
                timer,
            },
        );
        true
    }

    /// Completes the pending slot for `device`, if one exists.
    ///
    /// A missing slot means a late or duplicate event; that is tolerated and
    /// reported via the `false` return, not treated as an error.
    pub(crate) fn resolve(
        &mut self,
        device: &DeviceId,
        result: Result<T, CommandError>,
    ) -> bool {
        let Some(slot) = self.slots.remove(device) else {
            trace!(%device, operation = %self.operation, "no pending slot for event");
            return false;
        };
        slot.timer.abort();
        // The awaiting caller may have walked away; a dead receiver is fine.
        let _ = slot.reply.send(result);
        true
    }

    /// Applies a timer firing. Stale notices (slot gone, or re-occupied by a
    /// newer request) are no-ops.
    pub(crate) fn handle_timeout(&mut self, notice: &TimeoutNotice) {
        let matches_current = self
            .slots
            .get(&notice.device)
            .is_some_and(|slot| slot.request_id == notice.request_id);
        if !matches_current {
            return;
        }

        debug!(device = %notice.device, operation = %self.operation, "pending request timed out");
        if let Some(slot) = self.slots.remove(&notice.device) {
            let _ = slot.reply.send(Err(CommandError::Timeout {
                operation: notice.operation,
                device: notice.device.clone(),
                timeout: notice.timeout,
            }));
        }
    }

    /// Resolves every remaining slot with `Cancelled` so no caller awaits
    /// forever past teardown.
    pub(crate) fn cancel_all(&mut self) {
        for (device, slot) in self.slots.drain() {
            trace!(%device, operation = %self.operation, "cancelling pending request");
            slot.timer.abort();
            let _ = slot.reply.send(Err(CommandError::Cancelled));
        }
    }

    pub(crate) fn is_pending(&self, device: &DeviceId) -> bool {
        self.slots.contains_key(device)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Drop for PendingRequestRegistry<T> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
