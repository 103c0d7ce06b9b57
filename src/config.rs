//! Persistent application configuration model and defaults.

use std::path::PathBuf;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Now-playing polling.
    pub polling: PollingConfig,
    #[serde(default)]
    /// Disc-swap emulation and player queue preferences.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Album/playlist search behavior.
    pub search: SearchConfig,
    #[serde(default)]
    /// Where changer state lives on disk.
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    /// Lower bound of the emulated disc-swap pause in five-disc shuffle.
    #[serde(default = "default_swap_delay_min_ms")]
    pub swap_delay_min_ms: u64,
    #[serde(default = "default_swap_delay_max_ms")]
    pub swap_delay_max_ms: u64,
    /// Name of the player playlist the changer fills before each play.
    #[serde(default = "default_queue_playlist_name")]
    pub queue_playlist_name: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    /// Overrides the default `state.json` location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_swap_delay_min_ms() -> u64 {
    350
}

fn default_swap_delay_max_ms() -> u64 {
    700
}

fn default_queue_playlist_name() -> String {
    "Five Disc Changer".to_string()
}

fn default_search_debounce_ms() -> u64 {
    350
}

fn default_min_query_chars() -> usize {
    2
}

fn default_result_limit() -> usize {
    12
}

fn default_persist_debounce_ms() -> u64 {
    200
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            swap_delay_min_ms: default_swap_delay_min_ms(),
            swap_delay_max_ms: default_swap_delay_max_ms(),
            queue_playlist_name: default_queue_playlist_name(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_search_debounce_ms(),
            min_query_chars: default_min_query_chars(),
            result_limit: default_result_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist_debounce_ms: default_persist_debounce_ms(),
            state_file: None,
        }
    }
}

/// Clamps user-edited values into ranges the runtime can work with.
pub fn sanitize_config(config: Config) -> Config {
    let swap_min = config.playback.swap_delay_min_ms.min(10_000);
    let swap_max = config.playback.swap_delay_max_ms.clamp(swap_min, 10_000);
    let queue_playlist_name = if config.playback.queue_playlist_name.trim().is_empty() {
        default_queue_playlist_name()
    } else {
        config.playback.queue_playlist_name.trim().to_string()
    };

    Config {
        polling: PollingConfig {
            poll_interval_ms: config.polling.poll_interval_ms.clamp(250, 10_000),
        },
        playback: PlaybackConfig {
            swap_delay_min_ms: swap_min,
            swap_delay_max_ms: swap_max,
            queue_playlist_name,
        },
        search: SearchConfig {
            debounce_ms: config.search.debounce_ms.min(5_000),
            min_query_chars: config.search.min_query_chars.clamp(1, 32),
            result_limit: config.search.result_limit.clamp(1, 100),
        },
        storage: StorageConfig {
            persist_debounce_ms: config.storage.persist_debounce_ms.min(5_000),
            state_file: config.storage.state_file,
        },
    }
}

/// Parses `config.toml` text, falling back to defaults for anything invalid.
pub fn parse_config(text: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(text).map(sanitize_config)
}

pub fn config_root() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("fivedisc"))
}

pub fn data_root() -> Option<PathBuf> {
    dirs::data_dir().map(|path| path.join("fivedisc"))
}

impl Config {
    /// Effective state file path.
    pub fn state_file(&self) -> Option<PathBuf> {
        self.storage
            .state_file
            .clone()
            .or_else(|| data_root().map(|root| root.join("state.json")))
    }
}
