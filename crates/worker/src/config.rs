//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use spritebatch_core::error::CoreError;
use spritebatch_core::settings::{
    BatchSettings, DEFAULT_CALL_TIMEOUT, DEFAULT_DESCRIBE_THRESHOLD, DEFAULT_GENERATE_PADDING,
    DEFAULT_GENERATE_THRESHOLD, DEFAULT_GRID_COLUMNS, DEFAULT_MAX_CONCURRENT,
};
use spritebatch_pipeline::describe::DescriptionFormat;
use spritebatch_pipeline::job_queue::{
    QueueSettings, DEFAULT_MAX_OUTSTANDING, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL,
    PENDING_JOBS_FILE,
};
use spritebatch_pipeline::RunOptions;
use spritebatch_remote::openrouter::{
    DEFAULT_DESCRIBE_MODEL, DEFAULT_IMAGE_MODEL, OPENROUTER_BASE_URL,
};
use spritebatch_remote::ImageConfig;

/// Cache index file for describe mode, inside the scan root.
pub const DESCRIBE_CACHE_FILE: &str = ".asset_descriptions_progress.json";

/// Cache index file for generate mode, inside the scan root.
pub const GENERATE_CACHE_FILE: &str = ".image_generation_progress.json";

/// Directory for kept sprite sheets, under the output directory.
pub const SHEETS_DIR: &str = "sprite_sheets";

/// What the worker does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Images to keyword descriptions.
    Describe,
    /// Keyword descriptions to images.
    Generate,
    /// Record original image sizes for generate mode.
    Sizes,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "describe" => Ok(Self::Describe),
            "generate" => Ok(Self::Generate),
            "sizes" => Ok(Self::Sizes),
            _ => Err("expected describe, generate or sizes".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenRouter,
    ComfyUi,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "comfyui" => Ok(Self::ComfyUi),
            _ => Err("expected openrouter or comfyui".to_string()),
        }
    }
}

/// Connection details for the configured provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    OpenRouter {
        api_key: String,
        base_url: String,
        model: String,
        image: ImageConfig,
    },
    ComfyUi {
        api_url: String,
        /// API-format workflow template.
        workflow: PathBuf,
    },
}

/// Errors detected while loading configuration. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Settings(#[from] CoreError),

    #[error("{0}")]
    Unsupported(String),
}

/// Everything one worker run needs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mode: Mode,
    /// Directory scanned for inputs; also holds the durable records.
    pub root: PathBuf,
    /// Where generated images go; next to their description when unset.
    pub output_dir: Option<PathBuf>,
    pub force: bool,
    pub limit: Option<usize>,
    pub test_mode: bool,
    /// Keep every fetched composite in [`WorkerConfig::sheet_dir`].
    pub save_sheets: bool,
    pub batch: BatchSettings,
    pub queue: QueueSettings,
    pub description_format: DescriptionFormat,
    /// `None` in sizes mode, which makes no remote calls.
    pub provider: Option<ProviderConfig>,
}

/// Typed access to a key/value source.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing { name })
    }

    fn parse<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse(name)?.unwrap_or(default))
    }

    fn secs_or(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse::<u64>(name)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }

    fn millis_or(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse::<u64>(name)?
            .map(Duration::from_millis)
            .unwrap_or(default))
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.get(name) {
            None => Ok(false),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    value,
                    reason: "expected true or false".to_string(),
                }),
            },
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                         |
    /// |----------------------------------|---------------------------------|
    /// | `SPRITEBATCH_MODE`               | `describe`                      |
    /// | `SPRITEBATCH_ROOT`               | `images`                        |
    /// | `SPRITEBATCH_OUTPUT_DIR`         | unset                           |
    /// | `SPRITEBATCH_FORCE`              | `false`                         |
    /// | `SPRITEBATCH_LIMIT`              | unset                           |
    /// | `SPRITEBATCH_TEST_MODE`          | `false`                         |
    /// | `SPRITEBATCH_GRID_COLUMNS`       | `10`                            |
    /// | `SPRITEBATCH_BATCH_SIZE`         | columns squared                 |
    /// | `SPRITEBATCH_SIZE_THRESHOLD`     | `150` describe, `128` generate  |
    /// | `SPRITEBATCH_CELL_PADDING`       | `0` describe, `20` generate     |
    /// | `SPRITEBATCH_MAX_CONCURRENT`     | `4`                             |
    /// | `SPRITEBATCH_CALL_TIMEOUT_SECS`  | `120`                           |
    /// | `SPRITEBATCH_CALL_DELAY_MS`      | `0`                             |
    /// | `SPRITEBATCH_SAVE_SHEETS`        | `false`                         |
    /// | `SPRITEBATCH_DESCRIPTION_FORMAT` | `json`                          |
    /// | `SPRITEBATCH_PROVIDER`           | `openrouter`                    |
    /// | `OPENROUTER_API_KEY`             | required for openrouter         |
    /// | `OPENROUTER_BASE_URL`            | `https://openrouter.ai/api/v1`  |
    /// | `SPRITEBATCH_MODEL`              | per mode                        |
    /// | `SPRITEBATCH_OUTPUT_SIZE`        | `2K`                            |
    /// | `SPRITEBATCH_ASPECT_RATIO`       | `1:1`                           |
    /// | `COMFYUI_API_URL`                | required for comfyui            |
    /// | `COMFYUI_WORKFLOW`               | required for comfyui            |
    /// | `SPRITEBATCH_MAX_OUTSTANDING`    | `10`                            |
    /// | `SPRITEBATCH_POLL_INTERVAL_SECS` | `5`                             |
    /// | `SPRITEBATCH_MAX_WAIT_SECS`      | `900`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let mode = env.parse_or("SPRITEBATCH_MODE", Mode::Describe)?;
        let root = PathBuf::from(env.get("SPRITEBATCH_ROOT").unwrap_or_else(|| "images".into()));
        let output_dir = env.get("SPRITEBATCH_OUTPUT_DIR").map(PathBuf::from);

        let columns = env.parse_or("SPRITEBATCH_GRID_COLUMNS", DEFAULT_GRID_COLUMNS)?;
        let (default_threshold, default_padding) = match mode {
            Mode::Generate => (DEFAULT_GENERATE_THRESHOLD, DEFAULT_GENERATE_PADDING),
            Mode::Describe | Mode::Sizes => (DEFAULT_DESCRIBE_THRESHOLD, 0),
        };
        let batch = BatchSettings {
            columns,
            capacity: env.parse_or(
                "SPRITEBATCH_BATCH_SIZE",
                columns as usize * columns as usize,
            )?,
            size_threshold: env.parse_or("SPRITEBATCH_SIZE_THRESHOLD", default_threshold)?,
            padding: env.parse_or("SPRITEBATCH_CELL_PADDING", default_padding)?,
            max_concurrent: env.parse_or("SPRITEBATCH_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)?,
            call_timeout: env.secs_or("SPRITEBATCH_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT)?,
            call_interval: env.millis_or("SPRITEBATCH_CALL_DELAY_MS", Duration::ZERO)?,
        }
        .validate()?;

        let queue = QueueSettings {
            max_outstanding: env.parse_or("SPRITEBATCH_MAX_OUTSTANDING", DEFAULT_MAX_OUTSTANDING)?,
            poll_interval: env.secs_or("SPRITEBATCH_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?,
            max_wait: env.secs_or("SPRITEBATCH_MAX_WAIT_SECS", DEFAULT_MAX_WAIT)?,
            call_timeout: batch.call_timeout,
            submit_interval: batch.call_interval,
        }
        .validate()?;

        let provider = match mode {
            Mode::Sizes => None,
            Mode::Describe | Mode::Generate => Some(Self::provider(&env, mode)?),
        };

        Ok(Self {
            mode,
            root,
            output_dir,
            force: env.flag("SPRITEBATCH_FORCE")?,
            limit: env.parse("SPRITEBATCH_LIMIT")?,
            test_mode: env.flag("SPRITEBATCH_TEST_MODE")?,
            save_sheets: env.flag("SPRITEBATCH_SAVE_SHEETS")?,
            batch,
            queue,
            description_format: env.parse_or("SPRITEBATCH_DESCRIPTION_FORMAT", DescriptionFormat::Json)?,
            provider,
        })
    }

    fn provider<F: Fn(&str) -> Option<String>>(
        env: &Env<F>,
        mode: Mode,
    ) -> Result<ProviderConfig, ConfigError> {
        match env.parse_or("SPRITEBATCH_PROVIDER", ProviderKind::OpenRouter)? {
            ProviderKind::OpenRouter => {
                let default_model = match mode {
                    Mode::Generate => DEFAULT_IMAGE_MODEL,
                    Mode::Describe | Mode::Sizes => DEFAULT_DESCRIBE_MODEL,
                };
                let image_size = env.get("SPRITEBATCH_OUTPUT_SIZE").unwrap_or_else(|| "2K".into());
                if !matches!(image_size.as_str(), "1K" | "2K") {
                    return Err(ConfigError::Invalid {
                        name: "SPRITEBATCH_OUTPUT_SIZE",
                        value: image_size,
                        reason: "expected 1K or 2K".to_string(),
                    });
                }
                Ok(ProviderConfig::OpenRouter {
                    api_key: env.require("OPENROUTER_API_KEY")?,
                    base_url: env
                        .get("OPENROUTER_BASE_URL")
                        .unwrap_or_else(|| OPENROUTER_BASE_URL.into()),
                    model: env
                        .get("SPRITEBATCH_MODEL")
                        .unwrap_or_else(|| default_model.into()),
                    image: ImageConfig {
                        aspect_ratio: env
                            .get("SPRITEBATCH_ASPECT_RATIO")
                            .unwrap_or_else(|| "1:1".into()),
                        image_size,
                    },
                })
            }
            ProviderKind::ComfyUi => {
                if mode == Mode::Describe {
                    return Err(ConfigError::Unsupported(
                        "describe mode needs a text-capable provider; comfyui only generates images"
                            .to_string(),
                    ));
                }
                Ok(ProviderConfig::ComfyUi {
                    api_url: env.require("COMFYUI_API_URL")?,
                    workflow: PathBuf::from(env.require("COMFYUI_WORKFLOW")?),
                })
            }
        }
    }

    /// Caps for this run: the limit, plus the smoke-run caps in test mode.
    pub fn run_options(&self) -> RunOptions {
        let mut options = if self.test_mode {
            match self.mode {
                Mode::Describe => RunOptions::smoke(1, 1),
                Mode::Generate | Mode::Sizes => RunOptions::smoke(2, 2),
            }
        } else {
            RunOptions::default()
        };
        options.limit = self.limit;
        options
    }

    /// Cache index path for the configured mode.
    pub fn cache_path(&self) -> PathBuf {
        match self.mode {
            Mode::Generate => self.root.join(GENERATE_CACHE_FILE),
            Mode::Describe | Mode::Sizes => self.root.join(DESCRIBE_CACHE_FILE),
        }
    }

    /// Where kept sprite sheets go: next to the outputs, or under the
    /// scan root when outputs sit beside their descriptions.
    pub fn sheet_dir(&self) -> PathBuf {
        self.output_dir
            .as_deref()
            .unwrap_or(&self.root)
            .join(SHEETS_DIR)
    }

    /// Durable record of jobs submitted to an asynchronous provider.
    pub fn pending_path(&self) -> PathBuf {
        self.root.join(PENDING_JOBS_FILE)
    }
}
