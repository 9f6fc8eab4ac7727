//! Ramp decomposition, per-step records and cancellation.

use mppc_hv::channel::{MockHandle, MockTransport, Transport};
use mppc_hv::config::{EngineConfig, EngineSettings, PortConfig, VoltageRange};
use mppc_hv::protocol::codec;
use mppc_hv::sink::{MemoryActionLog, MemoryTelemetry};
use mppc_hv::{CommandRequest, CommandType, PortManager};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> EngineConfig {
    EngineConfig {
        settings: EngineSettings {
            poll_interval_s: 3600.0,
            exchange_timeout_ms: 20,
            retry_budget: 1,
            retry_backoff_ms: 5,
            degraded_threshold: 3,
            reconnect_initial_ms: 10,
            reconnect_max_ms: 100,
            history_capacity: 64,
            reset_settle_ms: 5,
            safe_range: VoltageRange {
                min: 0.0,
                max: 120.0,
            },
            hv_off_floor: 20.5,
            hv_off_ramp_steps: 4,
            hv_off_ramp_delay_s: 0.01,
        },
        ports: vec![PortConfig {
            id: 0,
            device: "/dev/mock0".into(),
            baud: 38_400,
            label: None,
            temp_params: None,
            safe_range: None,
        }],
    }
}

fn build(config: &EngineConfig) -> (Arc<PortManager>, Vec<MockHandle>, Arc<MemoryActionLog>) {
    let mut handles = Vec::new();
    let action_log = Arc::new(MemoryActionLog::new());
    let telemetry = Arc::new(MemoryTelemetry::new());
    let manager = PortManager::with_transport_factory(
        config,
        |port| {
            let (transport, handle) = MockTransport::new(format!("port{}", port.id));
            handles.push(handle);
            Box::new(transport) as Box<dyn Transport>
        },
        action_log.clone(),
        vec![telemetry],
    )
    .expect("manager builds");
    (Arc::new(manager), handles, action_log)
}

fn monitor_body_at(volts: f64) -> String {
    let counts = codec::volts_to_counts(volts);
    format!(
        "hpo0001{:04x}{:04x}0064{:04x}",
        counts,
        counts,
        codec::celsius_to_counts(24.0)
    )
}

#[tokio::test(start_paused = true)]
async fn ramp_issues_exactly_the_requested_step_count() {
    let (manager, handles, action_log) = build(&test_config());
    handles[0].push_body(&monitor_body_at(0.0));
    handles[0].set_default_body("hbv0000");

    let response = manager
        .submit(
            CommandRequest::new(0, CommandType::RampVoltage)
                .with_value(100.0)
                .with_ramp(10, 1.0),
        )
        .await;
    assert!(response.success, "{}", response.message);

    let bodies = handles[0].sent_bodies();
    assert_eq!(bodies[0], "HPO", "ramp reads the live voltage first");
    let steps: Vec<_> = bodies[1..].iter().filter(|b| b.starts_with("HBV")).collect();
    assert_eq!(steps.len(), 10, "exactly ramp_steps voltage writes");
    assert_eq!(
        *steps.last().unwrap(),
        &codec::encode_set_voltage(100.0),
        "last step lands on the target"
    );

    let step_records: Vec<_> = action_log
        .snapshot()
        .into_iter()
        .filter(|r| r.action.contains("step"))
        .collect();
    assert_eq!(step_records.len(), 10, "one record per step");
    assert!(step_records.iter().all(|r| r.success));
}

#[tokio::test(start_paused = true)]
async fn downward_ramp_steps_toward_the_target() {
    let (manager, handles, _action_log) = build(&test_config());
    handles[0].push_body(&monitor_body_at(80.0));
    handles[0].set_default_body("hbv0000");

    let response = manager
        .submit(
            CommandRequest::new(0, CommandType::RampVoltage)
                .with_value(20.0)
                .with_ramp(5, 0.5),
        )
        .await;
    assert!(response.success, "{}", response.message);

    let bodies = handles[0].sent_bodies();
    let counts: Vec<u16> = bodies[1..]
        .iter()
        .filter(|b| b.starts_with("HBV"))
        .map(|b| u16::from_str_radix(&b[3..], 16).unwrap())
        .collect();
    assert_eq!(counts.len(), 5);
    assert!(counts.windows(2).all(|w| w[1] < w[0]), "monotonic descent");
    assert_eq!(*counts.last().unwrap(), codec::volts_to_counts(20.0));
}

#[tokio::test(start_paused = true)]
async fn zero_steps_is_rejected_before_io() {
    let (manager, handles, _action_log) = build(&test_config());
    let response = manager
        .submit(
            CommandRequest::new(0, CommandType::RampVoltage)
                .with_value(50.0)
                .with_ramp(0, 1.0),
        )
        .await;
    assert!(!response.success);
    assert!(response.message.contains("ramp_steps"));
    assert_eq!(handles[0].sent_count(), 0);
}

#[tokio::test]
async fn newer_command_cancels_an_in_flight_ramp() {
    let (manager, handles, action_log) = build(&test_config());
    handles[0].push_body(&monitor_body_at(0.0));
    handles[0].set_default_body("hbv0000");

    let ramp_manager = manager.clone();
    let ramp = tokio::spawn(async move {
        ramp_manager
            .submit(
                CommandRequest::new(0, CommandType::RampVoltage)
                    .with_value(100.0)
                    .with_ramp(10, 0.05),
            )
            .await
    });

    // Let a few steps happen, then claim the port with a new command.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let response = manager
        .submit(CommandRequest::new(0, CommandType::SetVoltage).with_value(5.0))
        .await;
    assert!(response.success, "{}", response.message);

    let ramp_response = ramp.await.unwrap();
    assert!(!ramp_response.success);
    assert!(
        ramp_response.message.contains("cancelled after"),
        "got: {}",
        ramp_response.message
    );

    let step_records = action_log
        .snapshot()
        .into_iter()
        .filter(|r| r.action.starts_with("RAMP_VOLTAGE") && r.action.contains("step"))
        .count();
    assert!(
        step_records < 10,
        "cancellation must leave remaining steps unissued ({} issued)",
        step_records
    );
    assert!(step_records >= 1, "some steps ran before cancellation");

    // The partial-completion terminal record is on the log too.
    assert!(action_log
        .snapshot()
        .iter()
        .any(|r| r.action.starts_with("RAMP_VOLTAGE") && !r.success));
}

#[tokio::test]
async fn shutdown_cancels_an_in_flight_ramp() {
    let (manager, handles, _action_log) = build(&test_config());
    handles[0].push_body(&monitor_body_at(0.0));
    handles[0].set_default_body("hbv0000");

    let ramp_manager = manager.clone();
    let ramp = tokio::spawn(async move {
        ramp_manager
            .submit(
                CommandRequest::new(0, CommandType::RampVoltage)
                    .with_value(100.0)
                    .with_ramp(10, 0.05),
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.shutdown().await;

    let ramp_response = ramp.await.unwrap();
    assert!(!ramp_response.success);
    assert!(ramp_response.message.contains("cancelled"));
}
