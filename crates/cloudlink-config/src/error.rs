use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Settings file not found. Looked in:\n\
        - current directory: cloudlink.local.yaml, cloudlink.yaml\n\
        - ./.cloudlink/ directory\n\
        - ~/.config/cloudlink/cloudlink.yaml\n\
        or set CLOUDLINK_CONFIG_PATH to point at one directly"
    )]
    SettingsFileNotFound,

    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },

    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
