// Configuration management module
// Handles the TOML settings file and the on-disk layout under the base directory

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{Config, ConfigError, EmbedderKind, OllamaConfig, SearchConfig};

/// Resolve the base directory, preferring an explicit override
#[inline]
pub fn resolve_base_dir(
    explicit: Option<&std::path::Path>,
) -> Result<std::path::PathBuf, ConfigError> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Config::default_base_dir(),
    }
}
