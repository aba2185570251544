// Layer and extension inventory
//
// Answers "what does this driver offer": instance layers, the instance-level
// extensions each layer provides, and device-level extensions.

use anyhow::Result;
use ash::{vk, Entry};
use std::ffi::CStr;

/// A layer descriptor plus the extension descriptors it provides.
pub struct LayerProperties {
    pub properties: vk::LayerProperties,
    pub extensions: Vec<vk::ExtensionProperties>,
}

/// Every instance layer the driver reported, in query order.
///
/// Fields are only populated once the corresponding query succeeded.
pub struct LayerInventory {
    pub layers: Vec<LayerProperties>,
}

impl LayerInventory {
    /// Query all instance layers and, for each, its instance-level extensions.
    ///
    /// Zero installed layers is not an error: machines without the SDK report
    /// none, and this call is informational.
    pub fn query(entry: &Entry) -> Result<Self> {
        let layer_props = entry.enumerate_instance_layer_properties()?;

        if layer_props.is_empty() {
            log::warn!("No instance layers installed");
        }

        let mut layers = Vec::with_capacity(layer_props.len());
        for properties in layer_props {
            let layer_name =
                unsafe { CStr::from_ptr(properties.layer_name.as_ptr()) }.to_owned();

            // A failed extension query skips the layer, it does not abort
            // the rest of the inventory
            match entry.enumerate_instance_extension_properties(Some(&layer_name)) {
                Ok(extensions) => layers.push(LayerProperties {
                    properties,
                    extensions,
                }),
                Err(e) => log::warn!(
                    "Skipping layer {}: extension query failed: {}",
                    layer_name.to_string_lossy(),
                    e
                ),
            }
        }

        Ok(Self { layers })
    }

    /// Layer names as owned strings, for availability checks.
    pub fn layer_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .map(|layer| cstr_field(&layer.properties.layer_name))
            .collect()
    }

    /// Log the layer/extension tree.
    pub fn log_report(&self) {
        log::debug!("Instance layers ({})", self.layers.len());
        for layer in &self.layers {
            log::debug!(
                "  {} - {}",
                cstr_field(&layer.properties.layer_name),
                cstr_field(&layer.properties.description)
            );
            for ext in &layer.extensions {
                log::debug!("    [extension] {}", cstr_field(&ext.extension_name));
            }
        }
    }
}

/// Device-level extensions for a physical device.
///
/// ash exposes only the implicit (unnamed-layer) set, which is the one that
/// matters for enabling device extensions.
pub fn device_extensions(
    instance: &ash::Instance,
    gpu: vk::PhysicalDevice,
) -> Result<Vec<vk::ExtensionProperties>> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(gpu) }?;
    Ok(extensions)
}

/// Log the device extension list at debug level.
pub fn log_device_extensions(extensions: &[vk::ExtensionProperties]) {
    log::debug!("Device extensions ({})", extensions.len());
    for ext in extensions {
        log::debug!("  [extension] {}", cstr_field(&ext.extension_name));
    }
}

/// Split requested names into (supported, missing) against the available set.
pub fn split_supported(requested: &[&str], available: &[String]) -> (Vec<String>, Vec<String>) {
    let mut supported = Vec::new();
    let mut missing = Vec::new();

    for &name in requested {
        if available.iter().any(|a| a == name) {
            supported.push(name.to_string());
        } else {
            missing.push(name.to_string());
        }
    }

    (supported, missing)
}

/// Read a NUL-terminated fixed-size Vulkan name field.
fn cstr_field(field: &[std::os::raw::c_char]) -> String {
    unsafe { CStr::from_ptr(field.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_only_available_names() {
        let available = vec![
            "VK_LAYER_KHRONOS_validation".to_string(),
            "VK_LAYER_MESA_overlay".to_string(),
        ];
        let requested = ["VK_LAYER_KHRONOS_validation", "VK_LAYER_LUNARG_api_dump"];

        let (supported, missing) = split_supported(&requested, &available);

        assert_eq!(supported, vec!["VK_LAYER_KHRONOS_validation"]);
        assert_eq!(missing, vec!["VK_LAYER_LUNARG_api_dump"]);
    }

    #[test]
    fn split_with_nothing_requested_is_empty() {
        let available = vec!["VK_LAYER_KHRONOS_validation".to_string()];
        let (supported, missing) = split_supported(&[], &available);
        assert!(supported.is_empty());
        assert!(missing.is_empty());
    }

    #[test]
    fn split_with_no_layers_installed_reports_all_missing() {
        let (supported, missing) = split_supported(&["VK_LAYER_KHRONOS_validation"], &[]);
        assert!(supported.is_empty());
        assert_eq!(missing, vec!["VK_LAYER_KHRONOS_validation"]);
    }

    #[test]
    fn cstr_field_stops_at_nul() {
        let mut field = [0 as std::os::raw::c_char; 16];
        for (i, b) in b"overlay".iter().enumerate() {
            field[i] = *b as std::os::raw::c_char;
        }
        assert_eq!(cstr_field(&field), "overlay");
    }
}
