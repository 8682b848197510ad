//! Driver-level integration tests: FIFO correlation, timeout slots,
//! disconnect semantics, and malformed-frame recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use boxlink::{DriverConfig, IdChain, LinkError, LinkState, MockConduit, ProtocolDriver};
use common::{encode_hex_line, EmulatedDevice};

fn chain(parts: &[u8]) -> IdChain {
    IdChain::new(parts.to_vec()).unwrap()
}

#[tokio::test]
async fn test_fifo_correlation_under_concurrency() {
    common::init_tracing();
    let (conduit, handle) = MockConduit::pair("fifo");
    let device = EmulatedDevice::start(handle);
    for slot in 1..=5u8 {
        device.seed_object(&[0, slot], 6, &[slot, slot * 2]);
    }

    let driver = ProtocolDriver::connect(Arc::new(conduit), DriverConfig::default()).unwrap();

    let reads = (1..=5u8).map(|slot| {
        let driver = driver.clone();
        async move { (slot, driver.read_object(&chain(&[0, slot])).await) }
    });
    for (slot, result) in join_all(reads).await {
        assert_eq!(result.unwrap(), vec![slot, slot * 2], "slot {slot}");
    }

    let stats = driver.stats();
    assert_eq!(stats.requests_sent, 5);
    assert_eq!(stats.responses_matched, 5);
    assert_eq!(stats.timeouts, 0);
}

#[tokio::test]
async fn test_timeout_keeps_wire_slot_for_late_response() {
    let (conduit, handle) = MockConduit::pair("timeout");
    let config = DriverConfig {
        response_timeout: Duration::from_millis(100),
        ..DriverConfig::default()
    };
    let driver = ProtocolDriver::connect(Arc::new(conduit), config).unwrap();

    // First command: the device stays silent past the deadline
    let first = driver.read_object(&chain(&[1])).await;
    assert!(matches!(first, Err(LinkError::Timeout(_))));
    handle.next_write().await.unwrap();

    // Second command goes out while the first response is still owed
    let second = tokio::spawn({
        let driver = driver.clone();
        async move { driver.read_object(&chain(&[2])).await }
    });
    handle.next_write().await.unwrap();

    // The late first response arrives, then the second; positional
    // matching must consume the late one against the timed-out slot
    handle.inject_line(&encode_hex_line(&[0x01, 0x01, 0x00, 0x01, 0xAA]));
    handle.inject_line(&encode_hex_line(&[0x01, 0x02, 0x00, 0x01, 0xBB]));

    assert_eq!(second.await.unwrap().unwrap(), vec![0xBB]);

    let stats = driver.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.late_responses, 1);
    assert_eq!(stats.responses_matched, 2);
}

#[tokio::test]
async fn test_disconnect_fails_every_pending_command() {
    let (conduit, handle) = MockConduit::pair("disconnect");
    let driver = ProtocolDriver::connect(Arc::new(conduit), DriverConfig::default()).unwrap();

    let first = tokio::spawn({
        let driver = driver.clone();
        async move { driver.read_object(&chain(&[1])).await }
    });
    handle.next_write().await.unwrap();
    let second = tokio::spawn({
        let driver = driver.clone();
        async move { driver.read_object(&chain(&[2])).await }
    });
    handle.next_write().await.unwrap();

    handle.close();

    assert!(matches!(
        first.await.unwrap(),
        Err(LinkError::Disconnected(_))
    ));
    assert!(matches!(
        second.await.unwrap(),
        Err(LinkError::Disconnected(_))
    ));

    let mut state = driver.watch_state();
    state
        .wait_for(|s| *s == LinkState::Disconnected)
        .await
        .unwrap();

    // New commands fail fast without touching the wire
    assert!(matches!(
        driver.read_object(&chain(&[3])).await,
        Err(LinkError::Disconnected(_))
    ));
}

#[tokio::test]
async fn test_malformed_response_advances_the_queue() {
    let (conduit, handle) = MockConduit::pair("malformed");
    let driver = ProtocolDriver::connect(Arc::new(conduit), DriverConfig::default()).unwrap();

    let first = tokio::spawn({
        let driver = driver.clone();
        async move { driver.read_object(&chain(&[1])).await }
    });
    handle.next_write().await.unwrap();

    // Odd digit count: undecodable, but it still answers the first command
    handle.inject_line("01 0\n");
    assert!(matches!(
        first.await.unwrap(),
        Err(LinkError::FrameDecode(_))
    ));

    // The stream resynced; the next command pairs with the next response
    let second = tokio::spawn({
        let driver = driver.clone();
        async move { driver.read_object(&chain(&[2])).await }
    });
    handle.next_write().await.unwrap();
    handle.inject_line(&encode_hex_line(&[0x01, 0x02, 0x00, 0x01, 0x5A]));
    assert_eq!(second.await.unwrap().unwrap(), vec![0x5A]);

    let stats = driver.stats();
    assert_eq!(stats.frame_errors, 1);
    assert_eq!(stats.responses_matched, 1);
}

#[tokio::test]
async fn test_annotated_response_decodes_normally() {
    let (conduit, handle) = MockConduit::pair("annotated");
    let driver = ProtocolDriver::connect(Arc::new(conduit), DriverConfig::default()).unwrap();

    let read = tokio::spawn({
        let driver = driver.clone();
        async move { driver.read_object(&chain(&[1])).await }
    });
    handle.next_write().await.unwrap();

    handle.inject_line("[device fw 1.4]01 01 [status ok]00 01 7E \n");
    assert_eq!(read.await.unwrap().unwrap(), vec![0x7E]);
}

#[tokio::test]
async fn test_system_object_commands_round_trip() {
    let (conduit, handle) = MockConduit::pair("system");
    let device = EmulatedDevice::start(handle);
    device.seed_object(&[2], 3, &[0x10, 0x20]);

    let driver = ProtocolDriver::connect(Arc::new(conduit), DriverConfig::default()).unwrap();

    assert_eq!(
        driver.read_system_object(&chain(&[2])).await.unwrap(),
        vec![0x10, 0x20]
    );

    // Masked system write changes only the masked byte
    let written = driver
        .write_system_object(&chain(&[2]), &[0xAA, 0xBB], Some(&[0x00, 0xFF]))
        .await
        .unwrap();
    assert_eq!(written, vec![0x10, 0xBB]);
    assert_eq!(device.object(&[2]).unwrap().state, vec![0x10, 0xBB]);

    // Plain system write replaces the state outright
    let written = driver
        .write_system_object(&chain(&[2]), &[0x01, 0x02], None)
        .await
        .unwrap();
    assert_eq!(written, vec![0x01, 0x02]);
}

#[tokio::test]
async fn test_profile_commands_round_trip() {
    let (conduit, handle) = MockConduit::pair("profiles");
    let _device = EmulatedDevice::start(handle);
    let driver = ProtocolDriver::connect(Arc::new(conduit), DriverConfig::default()).unwrap();

    let created = driver.create_profile().await.unwrap();
    let activated = driver.activate_profile(created).await.unwrap();
    assert_eq!(activated, created);

    let (active, defined) = driver.list_profiles().await.unwrap();
    assert_eq!(active, Some(created));
    assert_eq!(defined, vec![created]);

    driver.delete_profile(created).await.unwrap();
    let (active, defined) = driver.list_profiles().await.unwrap();
    assert_eq!(active, None);
    assert!(defined.is_empty());
}
