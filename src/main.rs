use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use valedo_home::domain::models::{AppEvent, BluetoothCommand};
use valedo_home::domain::settings::SettingsService;
use valedo_home::infrastructure::bluetooth::{
    channel, create_platform, Dispatcher, DispatcherConfig,
};
use valedo_home::infrastructure::logging::init_logger;
use valedo_home::presentation::console::ConsoleDisplay;

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings_service = SettingsService::new()?;

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting ValedoHome demo");
    info!("Settings: {}", settings_service.path().display());
    let settings = settings_service.get().clone();

    let (handle, inbox) = channel();
    let platform = create_platform(settings.ble_backend, handle.clone())?;
    let mut dispatcher = Dispatcher::new(platform, inbox, DispatcherConfig::from(&settings));

    let (app_tx, mut app_rx) = mpsc::unbounded_channel::<AppEvent>();
    dispatcher.subscribe(Box::new(app_tx));
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let mut display = ConsoleDisplay::new(std::io::stdout(), &settings);
    display.render()?;
    handle.send_command(BluetoothCommand::StartScan)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = app_rx.recv() => {
                let Some(event) = event else { break };

                if event == AppEvent::SensorsReady {
                    if let Some(device_id) = display.connected_device() {
                        if let Err(e) = settings_service.set_last_connected_device(device_id) {
                            warn!("Could not save settings: {}", e);
                        }
                    }
                }

                if let Some(command) = display.handle_event(event)? {
                    handle.send_command(command)?;
                }
            }
        }
    }

    if handle.send_command(BluetoothCommand::Shutdown).is_err() {
        warn!("Dispatcher already stopped");
    }
    if let Err(e) = dispatcher_task.await {
        error!("Dispatcher task failed: {}", e);
    }
    info!("Goodbye");
    Ok(())
}
