use tracing::{debug, warn};

use crate::radio::link::RadioLink;

/// Derives the radio's "ready" signal from its two raw inputs.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RadioStateTracker {
    authorized: bool,
    powered: bool,
}

impl RadioStateTracker {
    /// Records new raw inputs; returns whether either changed.
    pub(crate) fn update(&mut self, authorized: bool, powered: bool) -> bool {
        let changed = self.authorized != authorized || self.powered != powered;
        self.authorized = authorized;
        self.powered = powered;
        changed
    }

    pub(crate) fn authorized(&self) -> bool {
        self.authorized
    }

    pub(crate) fn powered(&self) -> bool {
        self.powered
    }

    pub(crate) fn ready(&self) -> bool {
        self.authorized && self.powered
    }
}

/// Demand-driven scan state machine.
///
/// Scanning runs iff the radio is ready and at least one discovery stream is
/// open. `reconcile` is safe to call on every input change; it issues a radio
/// command only when the desired state differs from the current one.
#[derive(Debug, Default)]
pub(crate) struct ScanScheduler {
    scanning: bool,
}

impl ScanScheduler {
    pub(crate) fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub(crate) async fn reconcile(
        &mut self,
        ready: bool,
        subscriber_count: usize,
        link: &dyn RadioLink,
    ) {
        let desired = ready && subscriber_count > 0;
        if desired == self.scanning {
            return;
        }

        if desired {
            match link.start_scan().await {
                Ok(()) => {
                    debug!(subscriber_count, "scan started");
                    self.scanning = true;
                }
                Err(error) => warn!(%error, "failed to start scan"),
            }
        } else {
            match link.stop_scan().await {
                Ok(()) => {
                    debug!("scan stopped");
                    self.scanning = false;
                }
                Err(error) => {
                    // Treat the scan as stopped anyway; a dead radio is not
                    // scanning, and the next ready transition re-reconciles.
                    warn!(%error, "failed to stop scan");
                    self.scanning = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::error::RadioError;
    use crate::radio::model::DeviceId;

    #[derive(Default)]
    struct StubLink {
        calls: Mutex<Vec<&'static str>>,
    }

    impl StubLink {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().expect("stub lock should not be poisoned").clone()
        }
    }

    #[async_trait]
    impl RadioLink for StubLink {
        async fn start_scan(&self) -> Result<(), RadioError> {
            self.calls.lock().expect("stub lock should not be poisoned").push("start");
            Ok(())
        }

        async fn stop_scan(&self) -> Result<(), RadioError> {
            self.calls.lock().expect("stub lock should not be poisoned").push("stop");
            Ok(())
        }

        async fn connect(&self, _device: &DeviceId) -> Result<(), RadioError> {
            unreachable!("scheduler never connects")
        }

        async fn disconnect(&self, _device: &DeviceId) -> Result<(), RadioError> {
            unreachable!("scheduler never disconnects")
        }

        async fn discover_services(&self, _device: &DeviceId) -> Result<(), RadioError> {
            unreachable!("scheduler never discovers services")
        }
    }

    #[rstest]
    #[case(false, false, 0, false)]
    #[case(false, false, 3, false)]
    #[case(true, false, 0, false)]
    #[case(true, false, 3, false)]
    #[case(false, true, 0, false)]
    #[case(false, true, 3, false)]
    #[case(true, true, 0, false)]
    #[case(true, true, 3, true)]
    #[tokio::test]
    async fn scanning_iff_authorized_powered_and_subscribed(
        #[case] authorized: bool,
        #[case] powered: bool,
        #[case] subscribers: usize,
        #[case] expected_scanning: bool,
    ) {
        let mut tracker = RadioStateTracker::default();
        tracker.update(authorized, powered);
        let mut scheduler = ScanScheduler::default();
        let link = StubLink::default();

        scheduler.reconcile(tracker.ready(), subscribers, &link).await;

        assert_eq!(expected_scanning, scheduler.is_scanning());
    }

    #[tokio::test]
    async fn reconcile_avoids_redundant_radio_commands() {
        let mut scheduler = ScanScheduler::default();
        let link = StubLink::default();

        scheduler.reconcile(true, 1, &link).await;
        scheduler.reconcile(true, 2, &link).await;
        scheduler.reconcile(true, 1, &link).await;
        assert_eq!(vec!["start"], link.calls());

        scheduler.reconcile(true, 0, &link).await;
        scheduler.reconcile(false, 0, &link).await;
        assert_eq!(vec!["start", "stop"], link.calls());
    }

    #[tokio::test]
    async fn losing_readiness_stops_the_scan() {
        let mut scheduler = ScanScheduler::default();
        let link = StubLink::default();

        scheduler.reconcile(true, 2, &link).await;
        assert!(scheduler.is_scanning());

        scheduler.reconcile(false, 2, &link).await;
        assert!(!scheduler.is_scanning());
        assert_eq!(vec!["start", "stop"], link.calls());
    }

    #[test]
    fn tracker_reports_input_changes() {
        let mut tracker = RadioStateTracker::default();
        assert!(tracker.update(true, false));
        assert!(!tracker.update(true, false));
        assert!(tracker.update(true, true));
        assert!(tracker.ready());
    }
}
