use crate::sidekick_sdk::{DeviceHandle, QclSdk, SdkError};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("SDK error: {0}")]
    Sdk(#[from] SdkError),

    #[error("No QCL controller found on USB. Please connect the laser head controller")]
    NoDevices,

    #[error("QCL module not detected in the connected controller")]
    QclNotDetected,

    #[error("Safety interlock is open; close the interlock circuit before arming")]
    InterlockOpen,

    #[error("Key switch is off; turn the key switch before arming")]
    KeySwitchOff,
}

pub struct QclConnector;

impl QclConnector {
    /// Connect to the laser controller over USB and validate the handshake.
    ///
    /// Searches the bus, connects to the last enumerated device, then
    /// verifies the QCL module, interlock and key switch flags. Any unmet
    /// flag disconnects the already-open handle before the error is
    /// returned, so no half-open handle escapes.
    pub fn connect<S: QclSdk>(sdk: &mut S) -> Result<DeviceHandle, ConnectError> {
        sdk.search_for_usb_devices()?;
        let num_devices = sdk.num_devices()?;
        log::debug!("USB search found {} device(s)", num_devices);
        if num_devices == 0 {
            return Err(ConnectError::NoDevices);
        }

        let handle = sdk.connect_to_device(num_devices - 1)?;
        log::info!("Connected to laser controller (handle {})", handle.raw());
        sdk.read_admin_qcl_params(handle)?;

        Self::verify_flag(sdk, handle, QclSdk::is_qcl_available, ConnectError::QclNotDetected)?;
        Self::verify_flag(sdk, handle, QclSdk::is_interlock_set, ConnectError::InterlockOpen)?;
        Self::verify_flag(sdk, handle, QclSdk::is_key_switch_set, ConnectError::KeySwitchOff)?;

        Ok(handle)
    }

    /// Check one handshake flag, disconnecting the handle on failure.
    fn verify_flag<S: QclSdk>(
        sdk: &mut S,
        handle: DeviceHandle,
        flag: fn(&mut S, DeviceHandle) -> Result<bool, SdkError>,
        unmet: ConnectError,
    ) -> Result<(), ConnectError> {
        if flag(sdk, handle)? {
            Ok(())
        } else {
            log::warn!("Handshake check failed: {unmet}");
            if let Err(e) = sdk.disconnect(handle) {
                log::warn!("Disconnect after failed handshake also failed: {e}");
            }
            Err(unmet)
        }
    }
}
