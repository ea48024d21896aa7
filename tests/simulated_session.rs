//! End-to-end run of the dispatcher against the simulated sensor.

use std::time::Duration;
use tokio::sync::mpsc;
use valedo_home::domain::models::{AppEvent, BluetoothCommand, ConnectionStatus};
use valedo_home::infrastructure::bluetooth::simulated::{SimulatedPlatform, SIMULATED_DEVICE_ID};
use valedo_home::infrastructure::bluetooth::{channel, Dispatcher, DispatcherConfig};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<AppEvent>,
    mut matches: impl FnMut(&AppEvent) -> bool,
) -> Vec<AppEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("dispatcher stopped");
        let done = matches(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_scan_connect_stream_disconnect() {
    let (handle, inbox) = channel();
    let platform = SimulatedPlatform::new(handle.clone());
    let config = DispatcherConfig {
        device_name: "ValedoHome".to_string(),
        scan_timeout: Duration::from_millis(100),
    };
    let mut dispatcher = Dispatcher::new(platform, inbox, config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    dispatcher.subscribe(Box::new(tx));
    let task = tokio::spawn(dispatcher.run());

    // Only the sensor is listed, the other advertiser is filtered out
    handle.send_command(BluetoothCommand::StartScan).unwrap();
    let scan = wait_for(&mut rx, |e| *e == AppEvent::ScanStatus(false)).await;
    let found: Vec<_> = scan
        .iter()
        .filter_map(|e| match e {
            AppEvent::DeviceFound(d) => Some(d.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(found, vec![SIMULATED_DEVICE_ID.to_string()]);

    handle
        .send_command(BluetoothCommand::Connect(SIMULATED_DEVICE_ID.to_string()))
        .unwrap();
    let setup = wait_for(&mut rx, |e| *e == AppEvent::SensorsReady).await;
    let progress: Vec<_> = setup
        .iter()
        .filter_map(|e| match e {
            AppEvent::Progress(p) => Some(p.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        progress,
        vec![
            "Connecting to ValedoHome...",
            "Discovering Services...",
            "Reading Sensors...",
        ]
    );
    assert!(setup.contains(&AppEvent::ConnectionStatus(ConnectionStatus::Ready)));

    // Notifications keep flowing once enablement is done
    wait_for(&mut rx, |e| matches!(e, AppEvent::Orientation(_))).await;
    wait_for(&mut rx, |e| matches!(e, AppEvent::Velocity(_))).await;

    handle.send_command(BluetoothCommand::Disconnect).unwrap();
    let teardown = wait_for(&mut rx, |e| *e == AppEvent::Cleared).await;
    assert!(teardown.contains(&AppEvent::ConnectionStatus(ConnectionStatus::Disconnected)));

    handle.send_command(BluetoothCommand::Shutdown).unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}
