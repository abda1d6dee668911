// Candle device selection

use anyhow::{bail, Context, Result};
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;

/// Resolve a device name from the config (`cpu`, `cuda`, `metal` or `auto`).
pub fn select_device(name: &str) -> Result<Device> {
    match name.trim().to_ascii_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).context("Failed to initialize CUDA device"),
        "metal" => Device::new_metal(0).context("Failed to initialize Metal device"),
        "auto" => {
            if cuda_is_available() {
                Device::new_cuda(0).context("Failed to initialize CUDA device")
            } else if metal_is_available() {
                Device::new_metal(0).context("Failed to initialize Metal device")
            } else {
                Ok(Device::Cpu)
            }
        }
        other => bail!("Unknown device '{}' (expected cpu, cuda, metal or auto)", other),
    }
}
