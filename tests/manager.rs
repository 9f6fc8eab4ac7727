//! Port registry behavior: routing, labels, per-port serialization and
//! independence between ports.

use mppc_hv::channel::{MockHandle, MockTransport, Transport};
use mppc_hv::config::{EngineConfig, EngineSettings, PortConfig, VoltageRange};
use mppc_hv::sink::{MemoryActionLog, MemoryTelemetry};
use mppc_hv::{CommandRequest, CommandType, PortManager};
use std::sync::Arc;
use std::time::Duration;

fn test_config(port_ids: &[u8]) -> EngineConfig {
    EngineConfig {
        settings: EngineSettings {
            poll_interval_s: 3600.0,
            exchange_timeout_ms: 50,
            retry_budget: 1,
            retry_backoff_ms: 5,
            degraded_threshold: 3,
            reconnect_initial_ms: 10,
            reconnect_max_ms: 100,
            history_capacity: 64,
            reset_settle_ms: 5,
            safe_range: VoltageRange {
                min: 0.0,
                max: 90.0,
            },
            hv_off_floor: 20.5,
            hv_off_ramp_steps: 4,
            hv_off_ramp_delay_s: 0.01,
        },
        ports: port_ids
            .iter()
            .map(|&id| PortConfig {
                id,
                device: format!("/dev/mock{}", id),
                baud: 38_400,
                label: Some(format!("module {}", id)),
                temp_params: None,
                safe_range: None,
            })
            .collect(),
    }
}

fn build(config: &EngineConfig) -> (Arc<PortManager>, Vec<MockHandle>) {
    let mut handles = Vec::new();
    let manager = PortManager::with_transport_factory(
        config,
        |port| {
            let (transport, handle) = MockTransport::new(format!("port{}", port.id));
            handles.push(handle);
            Box::new(transport) as Box<dyn Transport>
        },
        Arc::new(MemoryActionLog::new()),
        vec![Arc::new(MemoryTelemetry::new())],
    )
    .expect("manager builds");
    (Arc::new(manager), handles)
}

#[tokio::test]
async fn unknown_port_fails_fast_with_the_valid_set() {
    let (manager, _handles) = build(&test_config(&[0, 1]));
    let response = manager
        .submit(CommandRequest::new(9, CommandType::ReadStatus))
        .await;
    assert!(!response.success);
    assert!(response.message.contains("Unknown port id 9"));
    assert!(response.message.contains("[0, 1]"));
}

#[tokio::test]
async fn labels_come_from_configuration() {
    let (manager, _handles) = build(&test_config(&[0, 3]));
    let labels = manager.all_labels();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels[&0], "module 0");
    assert_eq!(labels[&3], "module 3");
}

#[tokio::test]
async fn state_query_for_unknown_port_is_none() {
    let (manager, _handles) = build(&test_config(&[0]));
    assert!(manager.get_state(7).await.is_none());
    assert!(manager.history(7, Duration::from_secs(60)).is_err());
}

#[tokio::test]
async fn fresh_port_has_empty_history_and_unknown_flags() {
    let (manager, _handles) = build(&test_config(&[0]));
    let state = manager.get_state(0).await.unwrap();
    assert!(state.voltage.is_none());
    assert!(state.is_hv_on.is_none());
    assert!(!state.degraded);
    assert!(manager
        .history(0, Duration::from_secs(60))
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn commands_on_one_port_are_strictly_sequential() {
    let (manager, handles) = build(&test_config(&[0]));
    handles[0].push_body("hbv0000");
    handles[0].push_body("hbv0000");

    let first_manager = manager.clone();
    let first = tokio::spawn(async move {
        first_manager
            .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(10.0))
            .await
    });
    let second_manager = manager.clone();
    let second = tokio::spawn(async move {
        second_manager
            .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(20.0))
            .await
    });

    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert!(first.success && second.success);

    // Two complete frames on the wire, one per command; the channel mutex
    // makes interleaving within a frame impossible.
    let frames = handles[0].sent_frames();
    assert_eq!(frames.len(), 2);
    for frame in frames {
        assert_eq!(frame.first(), Some(&0x02));
        assert_eq!(frame.last(), Some(&0x0D));
    }
}

#[tokio::test(start_paused = true)]
async fn io_failure_triggers_reconnect_with_capped_backoff() {
    let (manager, handles) = build(&test_config(&[0]));

    // Kill the connection mid-read; the command fails and the channel
    // drops its handle.
    handles[0].push_disconnect();
    let response = manager
        .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(10.0))
        .await;
    assert!(!response.success);

    handles[0].fail_opens(2);

    // First reopen attempt fails and arms the backoff.
    let response = manager
        .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(10.0))
        .await;
    assert!(!response.success);
    assert_eq!(handles[0].open_attempts(), 1);

    // Inside the backoff window the port fails fast without reopening.
    let response = manager
        .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(10.0))
        .await;
    assert!(!response.success);
    assert_eq!(handles[0].open_attempts(), 1, "backoff suppresses the retry");

    // After the window the next attempt runs (and fails again).
    tokio::time::sleep(Duration::from_millis(15)).await;
    let response = manager
        .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(10.0))
        .await;
    assert!(!response.success);
    assert_eq!(handles[0].open_attempts(), 2);

    // Backoff doubled to 20 ms; once it elapses the open succeeds and the
    // command goes through.
    tokio::time::sleep(Duration::from_millis(25)).await;
    handles[0].push_body("hbv0000");
    let response = manager
        .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(10.0))
        .await;
    assert!(response.success, "{}", response.message);
    assert_eq!(handles[0].open_attempts(), 3);
}

#[tokio::test]
async fn a_stuck_port_does_not_stall_its_neighbors() {
    let (manager, handles) = build(&test_config(&[0, 1]));
    // Port 0 never answers; port 1 is healthy.
    handles[1].push_body("hbv0000");

    let slow_manager = manager.clone();
    let slow = tokio::spawn(async move {
        slow_manager
            .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(10.0))
            .await
    });

    let fast = tokio::time::timeout(
        Duration::from_millis(40),
        manager.submit(CommandRequest::new(1, CommandType::SetVoltage).with_value(10.0)),
    )
    .await
    .expect("healthy port must answer while the other port is stuck");
    assert!(fast.success, "{}", fast.message);

    let slow = slow.await.unwrap();
    assert!(!slow.success, "stuck port times out on its own");
}
