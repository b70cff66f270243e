pub mod settings;

pub use settings::{
    AppConfig, AppServerConfig, CheckerConfig, CustomCheckConfig, CustomCheckEntry, DependencyConfig,
    DependencyEntry, ServerConfig, SystemChecksConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE,
};
