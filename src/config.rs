use std::path::PathBuf;

use crate::vulkan::PoolSizeRatios;

/// Maximum number of directional lights in the light uniform buffer.
pub const MAX_DIR_LIGHTS: usize = 4;

/// Shader root baked in by `build.rs`.
pub const DEFAULT_SHADER_ROOT: &str = env!("SHADER_ROOT");

const SHADER_ROOT_ENV: &str = "ASH_EDITOR_SHADER_ROOT";
const VALIDATION_ENV: &str = "ASH_EDITOR_VALIDATION";

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub app_name: String,
    /// Directory holding the compiled `*.spv` shaders.
    pub shader_root: PathBuf,
    pub enable_validation: bool,
    /// Background color in sRGB space.
    pub clear_color: [f32; 4],
    pub pool_ratios: PoolSizeRatios,
    /// Number of sets each descriptor pool is sized for.
    pub pool_chunk_size: u32,
    /// Exponent pushed to the gamma-correct effect.
    pub gamma: f32,
    /// On-disk pipeline cache, loaded at startup and saved on shutdown.
    pub pipeline_cache_file: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "Ash Editor".to_string(),
            shader_root: PathBuf::from(DEFAULT_SHADER_ROOT),
            enable_validation: cfg!(all(debug_assertions, feature = "validation")),
            clear_color: [0.2, 0.3, 0.3, 1.0],
            pool_ratios: PoolSizeRatios::default(),
            pool_chunk_size: 1000,
            gamma: 2.2,
            pipeline_cache_file: Some(
                std::env::temp_dir()
                    .join("ash_editor_renderer")
                    .join("pipeline.cache"),
            ),
        }
    }
}

impl RendererConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup(SHADER_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.shader_root = PathBuf::from(root);
        }
        if let Some(flag) = lookup(VALIDATION_ENV) {
            match parse_flag(&flag) {
                Some(enabled) => self.enable_validation = enabled,
                None => log::warn!("Ignoring {VALIDATION_ENV}={flag:?}, expected 0 or 1"),
            }
        }
        self
    }

    pub fn shader_path(&self, file_name: &str) -> PathBuf {
        self.shader_root.join(file_name)
    }

    /// The clear color converted to linear space for the viewport pass.
    pub fn linear_clear_color(&self) -> [f32; 4] {
        let [r, g, b, a] = self.clear_color;
        [
            srgb_to_linear(r, self.gamma),
            srgb_to_linear(g, self.gamma),
            srgb_to_linear(b, self.gamma),
            a,
        ]
    }
}

pub fn srgb_to_linear(value: f32, gamma: f32) -> f32 {
    value.max(0.0).powf(gamma)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
