// Shader module loading
//
// Vulkan consumes SPIR-V. The binaries are read from disk at startup (and on
// hot reload) rather than embedded, so they can be rebuilt without recompiling.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;
use super::VulkanDevice;

/// Read a SPIR-V file into 32-bit words, checking the magic number
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?}", path))?;

    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Vertex + fragment modules for one pipeline
pub struct ShaderPair {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderPair {
    pub fn load(device: Arc<VulkanDevice>, vertex_path: &Path, fragment_path: &Path) -> Result<Self> {
        // Read both first so a bad fragment file doesn't leak a vertex module
        let vertex_code = load_spirv(vertex_path)?;
        let fragment_code = load_spirv(fragment_path)?;

        let vertex = create_shader_module(&device, &vertex_code)?;
        let fragment = match create_shader_module(&device, &fragment_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        log::info!("Loaded shaders {:?} and {:?}", vertex_path, fragment_path);

        Ok(Self { vertex, fragment, device })
    }
}

impl Drop for ShaderPair {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.vertex, None);
            self.device.device.destroy_shader_module(self.fragment, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("home-invasion-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_spirv(Path::new("shaders/does-not-exist.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("does-not-exist.spv"));
    }

    #[test]
    fn rejects_bad_magic() {
        let path = temp_file("bad-magic.spv", &[0u8; 8]);
        assert!(load_spirv(&path).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rejects_unaligned_length() {
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.push(0);
        let path = temp_file("unaligned.spv", &bytes);
        assert!(load_spirv(&path).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn reads_words_in_order() {
        let words = [0x0723_0203u32, 0x0001_0000, 42];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let path = temp_file("words.spv", &bytes);
        assert_eq!(load_spirv(&path).unwrap(), words.to_vec());
        let _ = std::fs::remove_file(path);
    }
}
