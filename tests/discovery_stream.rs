use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;

use blem::{
    BleManager, FakeRadio, FakeRadioConfig, FakeRadioHandle, RadioCommand, RadioEvent,
};

fn spawn_manager(config: FakeRadioConfig) -> (BleManager, FakeRadioHandle) {
    let (radio, events, handle) = FakeRadio::new(config);
    (BleManager::with_defaults(radio, events), handle)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}

fn scan_starts(handle: &FakeRadioHandle) -> usize {
    handle.command_count(|command| matches!(command, RadioCommand::StartScan))
}

fn scan_stops(handle: &FakeRadioHandle) -> usize {
    handle.command_count(|command| matches!(command, RadioCommand::StopScan))
}

#[tokio::test]
async fn scanning_waits_for_both_a_subscriber_and_a_ready_radio() {
    let (manager, handle) = spawn_manager(FakeRadioConfig::builder().build());

    // Ready radio alone must not scan.
    handle.power_on().await;
    wait_for(|| manager.state().ready()).await;
    assert_eq!(0, scan_starts(&handle));

    let stream = manager.discovered_devices().await.expect("stream should open");
    wait_for(|| manager.state().scanning).await;
    assert_eq!(1, scan_starts(&handle));

    drop(stream);
    wait_for(|| scan_stops(&handle) == 1).await;
    assert!(!manager.state().scanning);
}

#[tokio::test]
async fn subscriber_opened_before_power_on_triggers_scan_on_readiness() {
    let (manager, handle) = spawn_manager(FakeRadioConfig::builder().build());

    let _stream = manager.discovered_devices().await.expect("stream should open");
    assert_eq!(0, scan_starts(&handle));

    handle.power_on().await;
    wait_for(|| manager.state().scanning).await;
    assert_eq!(1, scan_starts(&handle));
}

#[tokio::test]
async fn losing_radio_readiness_stops_the_scan() {
    let (manager, handle) = spawn_manager(FakeRadioConfig::builder().build());

    let _stream = manager.discovered_devices().await.expect("stream should open");
    handle.power_on().await;
    wait_for(|| manager.state().scanning).await;

    handle
        .emit(RadioEvent::StateChanged {
            authorized: true,
            powered: false,
        })
        .await;
    wait_for(|| !manager.state().scanning).await;
    assert_eq!(1, scan_stops(&handle));
}

#[tokio::test]
async fn scan_continues_until_the_last_subscriber_leaves() {
    let (manager, handle) = spawn_manager(FakeRadioConfig::builder().build());
    handle.power_on().await;

    let first = manager.discovered_devices().await.expect("stream should open");
    let second = manager.discovered_devices().await.expect("stream should open");
    wait_for(|| manager.state().scanning).await;
    assert_eq!(
        2,
        manager.subscriber_count().await.expect("manager should answer")
    );
    assert_eq!(1, scan_starts(&handle));

    drop(first);
    wait_for_count(&manager, 1).await;
    assert!(manager.state().scanning);
    assert_eq!(0, scan_stops(&handle));

    drop(second);
    wait_for(|| scan_stops(&handle) == 1).await;
    wait_for_count(&manager, 0).await;
}

async fn wait_for_count(manager: &BleManager, expected: usize) {
    for _ in 0..200 {
        let count = manager
            .subscriber_count()
            .await
            .expect("manager should answer");
        if count == expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("subscriber count never reached {expected}");
}

#[tokio::test]
async fn new_subscriber_receives_the_current_list_immediately() -> anyhow::Result<()> {
    let (manager, handle) = spawn_manager(
        FakeRadioConfig::builder()
            .scan_fixture("AA:BB|Sensor-1|-43;CC:DD|-|-".parse()?)
            .build(),
    );

    let mut first = manager.discovered_devices().await?;
    handle.power_on().await;
    let populated = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let snapshot = first.next().await.expect("stream should stay open");
            if snapshot.len() == 2 {
                break snapshot;
            }
        }
    })
    .await?;

    // A stream opened later starts from the same list without a new event.
    let mut second = manager.discovered_devices().await?;
    let initial = tokio::time::timeout(Duration::from_secs(1), second.next())
        .await?
        .expect("stream should yield the starting snapshot");
    assert_eq!(populated, initial);
    assert_eq!("AA:BB", initial[0].id().as_str());
    assert_eq!("CC:DD", initial[1].id().as_str());
    Ok(())
}

#[tokio::test]
async fn rediscovery_refreshes_name_and_rssi_in_place() -> anyhow::Result<()> {
    let (manager, handle) = spawn_manager(FakeRadioConfig::builder().build());
    let mut stream = manager.discovered_devices().await?;
    handle.power_on().await;

    handle
        .emit(RadioEvent::Discovered {
            id: "AA:BB".into(),
            local_name: Some("Sensor-1".to_string()),
            rssi: Some(-40),
        })
        .await;
    handle
        .emit(RadioEvent::Discovered {
            id: "AA:BB".into(),
            local_name: None,
            rssi: Some(-62),
        })
        .await;

    let snapshot = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let snapshot = stream.next().await.expect("stream should stay open");
            if snapshot.first().is_some_and(|device| device.rssi() == Some(-62)) {
                break snapshot;
            }
        }
    })
    .await?;

    assert_eq!(1, snapshot.len());
    // The nameless re-advertisement must not erase the known name.
    assert_eq!(Some("Sensor-1"), snapshot[0].local_name());
    Ok(())
}

#[tokio::test]
async fn reset_discovered_empties_the_published_list() -> anyhow::Result<()> {
    let (manager, handle) = spawn_manager(
        FakeRadioConfig::builder()
            .scan_fixture("AA:BB|Sensor-1|-43".parse()?)
            .build(),
    );
    let mut stream = manager.discovered_devices().await?;
    handle.power_on().await;

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let snapshot = stream.next().await.expect("stream should stay open");
            if !snapshot.is_empty() {
                break;
            }
        }
    })
    .await?;

    manager.reset_discovered().await?;
    let cleared = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let snapshot = stream.next().await.expect("stream should stay open");
            if snapshot.is_empty() {
                break snapshot;
            }
        }
    })
    .await?;
    assert_eq!(0, cleared.len());
    Ok(())
}

#[tokio::test]
async fn shutdown_terminates_open_streams() -> anyhow::Result<()> {
    let (manager, handle) = spawn_manager(FakeRadioConfig::builder().build());
    let mut stream = manager.discovered_devices().await?;
    handle.power_on().await;
    wait_for(|| manager.state().scanning).await;

    manager.shutdown().await;

    let end = tokio::time::timeout(Duration::from_secs(1), async {
        // Drain the initial snapshot(s); the stream must then end.
        while stream.next().await.is_some() {}
    })
    .await;
    assert!(end.is_ok(), "stream should terminate after shutdown");
    assert_eq!(1, scan_stops(&handle));
    Ok(())
}
