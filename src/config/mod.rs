pub mod discovery;
pub mod error;
pub mod loader;
pub mod types;

pub use discovery::{discover, discover_from, DiscoveryResult};
pub use error::ConfigError;
pub use loader::{load, load_for_cli, load_single_file};
pub use types::{FormatDef, PipelineConfig, Source};
