use cpal::traits::DeviceTrait;
use voicelink_types::CaptureProfile;
use voicelink_utils as utils;

use crate::error::{Error, Result};

/// Exclusive microphone acquisition. Acquiring is the permission request;
/// refusal, or the absence of a usable device, is `PermissionDenied` and
/// leaves nothing behind to release.
pub trait PermissionGate: Send + Sync + 'static {
    type Device: Clone + Send + 'static;

    fn acquire(&self, profile: &CaptureProfile) -> Result<Self::Device>;
}

/// An acquired microphone: the device plus the stream config the session
/// will open it with. Dropping the last clone releases the device.
#[derive(Clone)]
pub struct AcquiredMic {
    pub device: cpal::Device,
    pub config: cpal::SupportedStreamConfig,
    pub profile: CaptureProfile,
}

/// Gate backed by the host audio stack.
pub struct MicPermissionGate {
    input_device: Option<String>,
}

impl MicPermissionGate {
    pub fn new(input_device: Option<String>) -> Self {
        Self { input_device }
    }
}

impl PermissionGate for MicPermissionGate {
    type Device = AcquiredMic;

    fn acquire(&self, profile: &CaptureProfile) -> Result<AcquiredMic> {
        let device = utils::device::get_or_default_input(self.input_device.clone())
            .map_err(|e| Error::PermissionDenied(e.to_string()))?;
        let config =
            utils::device::input_config_for(&device, profile.sample_rate, profile.channels)
                .map_err(|e| Error::PermissionDenied(e.to_string()))?;
        tracing::debug!(
            "microphone acquired: device={:?}, rate={}, channels={}",
            device.name().ok(),
            config.sample_rate().0,
            config.channels(),
        );
        Ok(AcquiredMic {
            device,
            config,
            profile: profile.clone(),
        })
    }
}
