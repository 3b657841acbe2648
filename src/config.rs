//! Persistent application configuration model and defaults.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Library storage preferences.
    pub library: LibraryConfig,
    #[serde(default)]
    /// Playback defaults applied when the session has no saved value.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Offline shell cache settings.
    pub offline: OfflineConfig,
}

/// Library storage preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// Upper bound on stored audio bytes. Zero disables the quota.
    #[serde(default)]
    pub max_content_bytes: u64,
}

/// Playback defaults.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Restart the track that was current when the last session ended.
    #[serde(default = "default_true")]
    pub resume_last_track: bool,
}

/// Offline shell cache settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OfflineConfig {
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    #[serde(default = "default_static_assets")]
    pub static_assets: Vec<String>,
    #[serde(default = "default_fallback_document")]
    pub fallback_document: String,
    /// Network origin the shell falls back to. Empty means offline only.
    #[serde(default)]
    pub origin: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            max_content_bytes: 0,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            resume_last_track: true,
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache_name: default_cache_name(),
            static_assets: default_static_assets(),
            fallback_document: default_fallback_document(),
            origin: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

fn default_database_file() -> String {
    "library.db".to_string()
}

pub fn default_cache_name() -> String {
    "music-cache-v2".to_string()
}

fn default_fallback_document() -> String {
    "/index.html".to_string()
}

/// Returns the static shell manifest pre-cached on install.
pub fn default_static_assets() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/style.css",
        "/js/index.js",
        "/icons/echoicon.png",
    ]
    .iter()
    .map(|asset| asset.to_string())
    .collect()
}

/// Clamps out-of-range values and normalizes lists loaded from disk.
pub fn sanitize_config(config: Config) -> Config {
    let default_volume = if config.playback.default_volume.is_finite() {
        config.playback.default_volume.clamp(0.0, 1.0)
    } else {
        default_volume()
    };

    let mut static_assets: Vec<String> = Vec::with_capacity(config.offline.static_assets.len());
    for asset in config.offline.static_assets {
        let asset = asset.trim().to_string();
        if !asset.is_empty() && !static_assets.contains(&asset) {
            static_assets.push(asset);
        }
    }

    let cache_name = if config.offline.cache_name.trim().is_empty() {
        default_cache_name()
    } else {
        config.offline.cache_name.trim().to_string()
    };

    let database_file = if config.library.database_file.trim().is_empty() {
        default_database_file()
    } else {
        config.library.database_file
    };

    Config {
        library: LibraryConfig {
            database_file,
            ..config.library
        },
        playback: PlaybackConfig {
            default_volume,
            ..config.playback
        },
        offline: OfflineConfig {
            cache_name,
            static_assets,
            origin: config.offline.origin.trim_end_matches('/').to_string(),
            ..config.offline
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{default_static_assets, sanitize_config, Config, OfflineConfig, PlaybackConfig};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.library.database_file, "library.db");
        assert_eq!(config.library.max_content_bytes, 0);
        assert!((config.playback.default_volume - 1.0).abs() < f32::EPSILON);
        assert!(config.playback.resume_last_track);
        assert_eq!(config.offline.cache_name, "music-cache-v2");
        assert_eq!(config.offline.fallback_document, "/index.html");
        assert_eq!(config.offline.static_assets, default_static_assets());
        assert!(config.offline.origin.is_empty());
    }

    #[test]
    fn test_partial_config_deserialization_fills_defaults() {
        let partial_config_toml = r#"
[library]
max_content_bytes = 1048576

[offline]
cache_name = "music-cache-v3"
"#;

        let parsed: Config = toml::from_str(partial_config_toml).expect("config should parse");
        assert_eq!(parsed.library.database_file, "library.db");
        assert_eq!(parsed.library.max_content_bytes, 1_048_576);
        assert!(parsed.playback.resume_last_track);
        assert_eq!(parsed.offline.cache_name, "music-cache-v3");
        assert_eq!(parsed.offline.static_assets, default_static_assets());
    }

    #[test]
    fn test_empty_config_deserializes_to_default() {
        let parsed: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_sanitize_config_clamps_volume_and_dedupes_assets() {
        let input = Config {
            playback: PlaybackConfig {
                default_volume: 3.5,
                ..PlaybackConfig::default()
            },
            offline: OfflineConfig {
                cache_name: "  ".to_string(),
                static_assets: vec![
                    "/".to_string(),
                    "/icons/echoicon.png".to_string(),
                    " /icons/echoicon.png ".to_string(),
                    String::new(),
                ],
                origin: "http://localhost:8080/".to_string(),
                ..OfflineConfig::default()
            },
            ..Config::default()
        };

        let sanitized = sanitize_config(input);
        assert!((sanitized.playback.default_volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(sanitized.offline.cache_name, "music-cache-v2");
        assert_eq!(
            sanitized.offline.static_assets,
            vec!["/".to_string(), "/icons/echoicon.png".to_string()]
        );
        assert_eq!(sanitized.offline.origin, "http://localhost:8080");
    }

    #[test]
    fn test_sanitize_config_replaces_non_finite_volume() {
        let input = Config {
            playback: PlaybackConfig {
                default_volume: f32::NAN,
                ..PlaybackConfig::default()
            },
            ..Config::default()
        };

        let sanitized = sanitize_config(input);
        assert!((sanitized.playback.default_volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_serialization_round_trips_through_toml() {
        let config_text =
            toml::to_string(&Config::default()).expect("default config should serialize");

        assert!(config_text.contains("[library]"));
        assert!(config_text.contains("cache_name"));
        let parsed: Config = toml::from_str(&config_text).expect("serialized config should parse");
        assert_eq!(parsed, Config::default());
    }
}
