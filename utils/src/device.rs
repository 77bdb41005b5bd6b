use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, SupportedStreamConfig};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        Some(target) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("no input device named {:?}", target)),
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no default input device")),
    }
}

pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        Some(target) => host
            .output_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("no output device named {:?}", target)),
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default output device")),
    }
}

/// Pick an input config carrying the requested rate and layout. Falls back to
/// the device default when no supported range matches; callers resample.
pub fn input_config_for(
    device: &Device,
    sample_rate: u32,
    channels: u16,
) -> anyhow::Result<SupportedStreamConfig> {
    let wanted = cpal::SampleRate(sample_rate);
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.channels() == channels
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
                && matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16)
            {
                return Ok(range.with_sample_rate(wanted));
            }
        }
    }
    device
        .default_input_config()
        .map_err(|e| anyhow::anyhow!("no usable input config: {e}"))
}

pub fn get_available_inputs() -> String {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut device_names: Vec<String> = Vec::new();
    let Ok(input_devices) = host.input_devices() else {
        return String::new();
    };
    for in_device in input_devices {
        let Ok(d_name) = in_device.name() else {
            continue;
        };
        let Ok(d_cfg) = in_device.default_input_config() else {
            continue;
        };
        let mut d = format!(
            " * {}({}ch, {}hz)",
            d_name,
            d_cfg.channels(),
            d_cfg.sample_rate().0
        );
        if Some(&d_name) == default_name.as_ref() {
            d.push_str(" [default]");
        }
        device_names.push(d);
    }
    device_names.join("\n")
}

pub fn get_available_outputs() -> String {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut device_names: Vec<String> = Vec::new();
    let Ok(output_devices) = host.output_devices() else {
        return String::new();
    };
    for out_device in output_devices {
        let Ok(d_name) = out_device.name() else {
            continue;
        };
        let Ok(d_cfg) = out_device.default_output_config() else {
            continue;
        };
        let mut d = format!(
            " * {}({}ch, {}hz)",
            d_name,
            d_cfg.channels(),
            d_cfg.sample_rate().0
        );
        if Some(&d_name) == default_name.as_ref() {
            d.push_str(" [default]");
        }
        device_names.push(d);
    }
    device_names.join("\n")
}
