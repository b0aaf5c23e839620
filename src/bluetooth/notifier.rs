/// Bluetooth Low Energy connection and notification subscription
use bluer::gatt::remote::Characteristic;
use bluer::{Address, Device, Session, Uuid};
use futures_util::{pin_mut, StreamExt};
use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};

use crate::config::BluetoothConfig;
use crate::pipeline::NotificationSink;

// Battery monitor serial-over-GATT characteristic (0xFFE1)
const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);
const RETRY_SECS: u64 = 5; // Pause between connection attempts
const SERVICES_TIMEOUT_SECS: u64 = 30; // How long to wait for GATT service resolution

/// Connect to the configured peripheral and forward its notifications to `sink`
///
/// Runs until the task is cancelled. A failed connection, a missing
/// characteristic or the end of the notification stream all lead to a
/// reconnect after a short pause.
pub async fn stream_notifications<S: NotificationSink>(
    config: &BluetoothConfig,
    sink: &mut S,
) -> Result<(), Box<dyn std::error::Error>> {
    let address: Address = config
        .address
        .as_deref()
        .ok_or("BLE_ADDRESS environment variable not set")?
        .parse()?;

    // Initialize Bluetooth session
    let session = Session::new().await?;
    let adapter = match &config.adapter {
        Some(name) => session.adapter(name)?,
        None => session.default_adapter().await?,
    };
    adapter.set_powered(true).await?;
    info!("Using adapter {} for {}", adapter.name(), address);

    loop {
        let device = adapter.device(address)?;

        if let Err(e) = connect(&device).await {
            error!("Connection to {} failed, try again...: {}", address, e);
            sleep(Duration::from_secs(RETRY_SECS)).await;
            continue;
        }

        let characteristic = match find_notify_characteristic(&device).await {
            Ok(Some(characteristic)) => characteristic,
            Ok(None) => {
                error!("{} has no notify characteristic {}", address, NOTIFY_CHARACTERISTIC);
                disconnect(&device).await;
                sleep(Duration::from_secs(RETRY_SECS)).await;
                continue;
            }
            Err(e) => {
                error!("Service discovery on {} failed: {}", address, e);
                disconnect(&device).await;
                sleep(Duration::from_secs(RETRY_SECS)).await;
                continue;
            }
        };

        let handle = characteristic.id();
        let notifications = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to register notify handler: {}", e);
                disconnect(&device).await;
                sleep(Duration::from_secs(RETRY_SECS)).await;
                continue;
            }
        };
        info!("Registered notify handler on 0x{:04x}", handle);

        pin_mut!(notifications);
        while let Some(value) = notifications.next().await {
            sink.on_notification(handle, &value);
        }

        warn!("Notification stream from {} ended, reconnecting", address);
        sleep(Duration::from_secs(RETRY_SECS)).await;
    }
}

async fn connect(device: &Device) -> bluer::Result<()> {
    if !device.is_connected().await? {
        info!("Connecting to {}", device.address());
        device.connect().await?;
    }
    Ok(())
}

async fn disconnect(device: &Device) {
    if let Err(e) = device.disconnect().await {
        debug!("Disconnect from {} failed: {}", device.address(), e);
    }
}

/// Wait for GATT services and look up the notify characteristic
async fn find_notify_characteristic(
    device: &Device,
) -> bluer::Result<Option<Characteristic>> {
    for _ in 0..SERVICES_TIMEOUT_SECS {
        if device.is_services_resolved().await? {
            break;
        }
        sleep(Duration::from_secs(1)).await;
    }

    for service in device.services().await? {
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == NOTIFY_CHARACTERISTIC {
                return Ok(Some(characteristic));
            }
        }
    }

    Ok(None)
}
