//! TOML Configuration File Support
//!
//! Loads the rotation configuration from
//! `$XDG_CONFIG_HOME/billboard/billboard.toml` (or an explicit path) and
//! normalizes it into immutable [`Settings`].
//!
//! # Configuration Priority
//!
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! launch_url = "https://example.com/splash.html"
//! launch_timeout = 10        # seconds
//! prepare_pages = 1          # extra surfaces kept for preloading, 0 disables
//! preparation_time = 5       # seconds before air time to start preloading
//! watch_displays = true
//!
//! [browser_options]
//! args = ["--disable-infobars"]
//!
//! [[displays]]
//! pages = ["https://example.com/a", "https://example.com/b"]
//! rotation_speed = [10, 20]  # seconds per page, or a single number
//! transition_animation = "fade"
//!
//! [[displays]]
//! pages = ["https://example.com/c"]
//! transition_animation = { name = "slideLeft", duration = 800 }
//!
//! [[screens]]
//! left = 0
//! top = 0
//! width = 1920
//! height = 1080
//! ```
//!
//! Physical display `i` uses `displays[i]`, or `displays[0]` when fewer
//! display entries than physical displays are configured.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::display::DisplayGeometry;
use crate::transition::{TransitionAnimation, DEFAULT_TRANSITION, DEFAULT_TRANSITION_MS};

/// Launch screen duration when unset (seconds)
pub const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 10;

/// Extra preload surfaces per display when unset
pub const DEFAULT_PREPARE_PAGES: usize = 1;

/// Preload lead time when unset (seconds)
pub const DEFAULT_PREPARATION_TIME_SECS: u64 = 5;

/// Page air time when unset (seconds)
pub const DEFAULT_AIR_TIME_SECS: u64 = 5;

/// Interval between display topology checks when unset (seconds)
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 10;

/// Launch page when unset
pub const DEFAULT_LAUNCH_URL: &str = "about:blank";

/// Free-form options handed to the render backend at launch
pub type BrowserOptions = serde_json::Map<String, Value>;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading or resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// No `displays` list present
    #[error("Configuration needs a 'displays' list")]
    MissingDisplays,

    /// `displays` list is empty
    #[error("Configuration needs at least one display")]
    NoDisplays,

    /// A display entry has no `pages` list
    #[error("Display configuration {display} needs a 'pages' list")]
    MissingPages {
        /// Index of the display entry
        display: usize,
    },

    /// A display entry has an empty `pages` list
    #[error("Display configuration {display} needs at least one page to display")]
    NoPages {
        /// Index of the display entry
        display: usize,
    },

    /// Transition name is not one of the known variants
    #[error("Unknown transition animation '{name}'")]
    UnknownTransition {
        /// The rejected name
        name: String,
    },
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Air time in seconds, for all pages or per page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RotationSpeed {
    /// Same air time for every page
    Uniform(u64),
    /// Air time by page index; missing or zero entries use the default
    PerPage(Vec<u64>),
}

impl RotationSpeed {
    fn seconds_for(&self, page: usize) -> Option<u64> {
        let seconds = match self {
            Self::Uniform(seconds) => *seconds,
            Self::PerPage(list) => list.get(page).copied().unwrap_or(0),
        };
        (seconds > 0).then_some(seconds)
    }
}

/// Transition as written in the file: `"fade"` or `{ name, duration }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionToml {
    /// Shorthand name with the default duration
    Name(String),
    /// Explicit name and/or duration (ms)
    Detailed {
        /// Transition name
        #[serde(default)]
        name: Option<String>,
        /// Duration in milliseconds
        #[serde(default)]
        duration: Option<u64>,
    },
}

/// One `[[displays]]` entry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayToml {
    /// Page URLs in rotation order
    pub pages: Option<Vec<String>>,

    /// Air time in seconds
    pub rotation_speed: Option<RotationSpeed>,

    /// Transition between pages
    pub transition_animation: Option<TransitionToml>,

    /// Leave this display alone
    pub ignore: bool,

    /// Per-display launch options, merged over the top-level ones
    pub browser_options: Option<BrowserOptions>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BillboardToml {
    /// Launch screen duration in seconds
    pub launch_timeout: Option<u64>,

    /// Extra surfaces per display used for preloading (0 disables preloading)
    pub prepare_pages: Option<usize>,

    /// Seconds before air time at which the next page is preloaded
    pub preparation_time: Option<u64>,

    /// Restart when the number of attached displays changes
    pub watch_displays: Option<bool>,

    /// Seconds between display topology checks
    pub watch_interval: Option<u64>,

    /// Page shown while the displays start up
    pub launch_url: Option<String>,

    /// Default launch options for every render session
    pub browser_options: Option<BrowserOptions>,

    /// Per-display rotation configuration
    pub displays: Option<Vec<DisplayToml>>,

    /// Static screen geometry, used when no live display enumeration is available
    pub screens: Option<Vec<DisplayGeometry>>,
}

impl BillboardToml {
    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the text is not valid for this schema.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// CLI overrides applied on top of the file
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Override `launch_url`
    pub launch_url: Option<String>,
    /// Override `prepare_pages`
    pub prepare_pages: Option<usize>,
    /// Override `watch_displays`
    pub watch_displays: Option<bool>,
}

impl ConfigOverrides {
    /// Apply the overrides to a parsed file
    pub fn apply(&self, config: &mut BillboardToml) {
        if let Some(ref url) = self.launch_url {
            config.launch_url = Some(url.clone());
        }
        if let Some(pages) = self.prepare_pages {
            config.prepare_pages = Some(pages);
        }
        if let Some(watch) = self.watch_displays {
            config.watch_displays = Some(watch);
        }
    }
}

// =============================================================================
// Resolved Settings
// =============================================================================

/// A page and how long it stays on air
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    /// Content URL
    pub url: String,
    /// Time on air before the next transition starts
    pub air_time: Duration,
}

/// Resolved rotation configuration for one display
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayConfig {
    /// Pages in rotation order (never empty)
    pub pages: Vec<Page>,
    /// Transition between pages
    pub transition: TransitionAnimation,
    /// Leave this display alone
    pub ignore: bool,
    /// Launch options (defaults merged with the display override)
    pub browser_options: BrowserOptions,
}

/// Resolved, immutable settings for one orchestrator run
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// How long the launch page stays on air
    pub launch_timeout: Duration,
    /// Extra surfaces per display used for preloading
    pub prepare_pages: usize,
    /// Lead time before air time at which the next page is preloaded
    pub preparation_time: Duration,
    /// Restart when the number of attached displays changes
    pub watch_displays: bool,
    /// Interval between display topology checks
    pub watch_interval: Duration,
    /// Page shown while the displays start up
    pub launch_url: String,
    /// Default launch options
    pub browser_options: BrowserOptions,
    /// Per-display configuration (never empty)
    pub displays: Vec<DisplayConfig>,
}

impl Settings {
    /// Normalize a parsed configuration
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the display list is missing or empty, a
    /// display has no pages, or a transition name is unknown.
    pub fn resolve(raw: &BillboardToml) -> Result<Self, ConfigError> {
        let entries = raw.displays.as_ref().ok_or(ConfigError::MissingDisplays)?;
        if entries.is_empty() {
            return Err(ConfigError::NoDisplays);
        }

        let browser_options = raw.browser_options.clone().unwrap_or_default();
        let displays = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| resolve_display(index, entry, &browser_options))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            launch_timeout: Duration::from_secs(
                raw.launch_timeout
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_LAUNCH_TIMEOUT_SECS),
            ),
            prepare_pages: raw.prepare_pages.unwrap_or(DEFAULT_PREPARE_PAGES),
            preparation_time: Duration::from_secs(
                raw.preparation_time.unwrap_or(DEFAULT_PREPARATION_TIME_SECS),
            ),
            watch_displays: raw.watch_displays.unwrap_or(true),
            watch_interval: Duration::from_secs(
                raw.watch_interval
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_WATCH_INTERVAL_SECS),
            ),
            launch_url: raw
                .launch_url
                .clone()
                .unwrap_or_else(|| DEFAULT_LAUNCH_URL.to_string()),
            browser_options,
            displays,
        })
    }

    /// Configuration for physical display `index`, falling back to the first entry
    #[must_use]
    pub fn display_config(&self, index: usize) -> Option<&DisplayConfig> {
        self.displays.get(index).or_else(|| self.displays.first())
    }

    /// Whether the next page is prepared on a spare surface ahead of time
    #[must_use]
    pub fn preload_enabled(&self) -> bool {
        self.prepare_pages > 0
    }

    /// Size of each display's surface pool
    #[must_use]
    pub fn surfaces_per_display(&self) -> usize {
        self.prepare_pages + 1
    }

    /// The synthetic page shown during startup
    #[must_use]
    pub fn launch_page(&self) -> Page {
        Page {
            url: self.launch_url.clone(),
            air_time: self.launch_timeout,
        }
    }
}

fn resolve_display(
    index: usize,
    entry: &DisplayToml,
    defaults: &BrowserOptions,
) -> Result<DisplayConfig, ConfigError> {
    let urls = entry
        .pages
        .as_ref()
        .ok_or(ConfigError::MissingPages { display: index })?;
    if urls.is_empty() {
        return Err(ConfigError::NoPages { display: index });
    }

    let pages = urls
        .iter()
        .enumerate()
        .map(|(page, url)| Page {
            url: url.clone(),
            air_time: Duration::from_secs(
                entry
                    .rotation_speed
                    .as_ref()
                    .and_then(|speed| speed.seconds_for(page))
                    .unwrap_or(DEFAULT_AIR_TIME_SECS),
            ),
        })
        .collect();

    let (name, duration) = match &entry.transition_animation {
        None => (None, None),
        Some(TransitionToml::Name(name)) => (Some(name.as_str()), None),
        Some(TransitionToml::Detailed { name, duration }) => (name.as_deref(), *duration),
    };
    let transition = TransitionAnimation::resolve(
        name.unwrap_or(DEFAULT_TRANSITION.name()),
        duration.filter(|ms| *ms > 0).unwrap_or(DEFAULT_TRANSITION_MS),
    )?;

    let browser_options = match &entry.browser_options {
        Some(overlay) => merge_options(defaults, overlay),
        None => defaults.clone(),
    };

    Ok(DisplayConfig {
        pages,
        transition,
        ignore: entry.ignore,
        browser_options,
    })
}

/// Deep-merge `overlay` over `base`: tables merge recursively, arrays concatenate,
/// everything else is replaced
#[must_use]
pub fn merge_options(base: &BrowserOptions, overlay: &BrowserOptions) -> BrowserOptions {
    let mut merged = base.clone();
    for (key, value) in overlay {
        match (merged.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                *existing = merge_options(existing, incoming);
            }
            (Some(Value::Array(existing)), Value::Array(incoming)) => {
                existing.extend(incoming.iter().cloned());
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

// =============================================================================
// Loading
// =============================================================================

/// Default configuration file path (`$XDG_CONFIG_HOME/billboard/billboard.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("billboard").join("billboard.toml"))
}

/// Load configuration from an explicit path
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn load_config_from_path(path: &Path) -> Result<BillboardToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let config = BillboardToml::from_toml_str(&content)?;
    tracing::info!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

/// Load configuration from `path`, or from the default location
///
/// A missing file at the default location yields an empty configuration;
/// a missing explicit path is an error.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file exists but cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<BillboardToml, ConfigError> {
    if let Some(path) = path {
        return load_config_from_path(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        Some(path) => {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            Ok(BillboardToml::default())
        }
        None => Ok(BillboardToml::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::TransitionKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn resolve(content: &str) -> Result<Settings, ConfigError> {
        Settings::resolve(&BillboardToml::from_toml_str(content).unwrap())
    }

    #[test]
    fn test_defaults_applied() {
        let settings = resolve(
            r#"
            [[displays]]
            pages = ["https://example.com/a"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.launch_timeout, Duration::from_secs(10));
        assert_eq!(settings.prepare_pages, 1);
        assert_eq!(settings.preparation_time, Duration::from_secs(5));
        assert!(settings.watch_displays);
        assert_eq!(settings.watch_interval, Duration::from_secs(10));
        assert_eq!(settings.launch_url, "about:blank");
        assert_eq!(settings.surfaces_per_display(), 2);

        let display = &settings.displays[0];
        assert_eq!(display.pages[0].air_time, Duration::from_secs(5));
        assert_eq!(display.transition.kind, TransitionKind::Fade);
        assert_eq!(display.transition.duration_ms, 400);
        assert!(!display.ignore);
    }

    #[test]
    fn test_rotation_speed_per_page() {
        let settings = resolve(
            r#"
            [[displays]]
            pages = ["a", "b", "c", "d"]
            rotation_speed = [10, 0, 30]
            "#,
        )
        .unwrap();

        let air: Vec<_> = settings.displays[0]
            .pages
            .iter()
            .map(|p| p.air_time.as_secs())
            .collect();
        assert_eq!(air, vec![10, 5, 30, 5]);
    }

    #[test]
    fn test_rotation_speed_uniform() {
        let settings = resolve(
            r#"
            [[displays]]
            pages = ["a", "b"]
            rotation_speed = 12
            "#,
        )
        .unwrap();
        assert!(settings.displays[0]
            .pages
            .iter()
            .all(|p| p.air_time == Duration::from_secs(12)));
    }

    #[test]
    fn test_transition_shorthand_and_table() {
        let settings = resolve(
            r#"
            [[displays]]
            pages = ["a"]
            transition_animation = "slideUp"

            [[displays]]
            pages = ["b"]
            transition_animation = { name = "none", duration = 900 }

            [[displays]]
            pages = ["c"]
            transition_animation = { duration = 1000 }
            "#,
        )
        .unwrap();

        assert_eq!(settings.displays[0].transition.kind, TransitionKind::SlideUp);
        assert_eq!(settings.displays[0].transition.half_duration_ms, 200);
        assert_eq!(settings.displays[1].transition.kind, TransitionKind::None);
        assert_eq!(settings.displays[1].transition.half_duration_ms, 0);
        assert_eq!(settings.displays[2].transition.kind, TransitionKind::Fade);
        assert_eq!(settings.displays[2].transition.half_duration_ms, 500);
    }

    #[test]
    fn test_zero_transition_duration_uses_default() {
        let settings = resolve(
            r#"
            [[displays]]
            pages = ["a"]
            transition_animation = { name = "slideLeft", duration = 0 }
            "#,
        )
        .unwrap();

        let transition = &settings.displays[0].transition;
        assert_eq!(transition.kind, TransitionKind::SlideLeft);
        assert_eq!(transition.duration_ms, 400);
        assert_eq!(transition.half_duration_ms, 200);
    }

    #[test]
    fn test_missing_and_empty_displays_rejected() {
        assert!(matches!(resolve(""), Err(ConfigError::MissingDisplays)));
        assert!(matches!(resolve("displays = []"), Err(ConfigError::NoDisplays)));
    }

    #[test]
    fn test_missing_and_empty_pages_rejected() {
        let missing = resolve(
            r#"
            [[displays]]
            pages = ["a"]

            [[displays]]
            ignore = true
            "#,
        );
        assert!(matches!(missing, Err(ConfigError::MissingPages { display: 1 })));

        let empty = resolve(
            r#"
            [[displays]]
            pages = []
            "#,
        );
        assert!(matches!(empty, Err(ConfigError::NoPages { display: 0 })));
    }

    #[test]
    fn test_unknown_transition_rejected() {
        let result = resolve(
            r#"
            [[displays]]
            pages = ["a"]
            transition_animation = "wipe"
            "#,
        );
        match result {
            Err(ConfigError::UnknownTransition { name }) => assert_eq!(name, "wipe"),
            other => panic!("Expected UnknownTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_display_config_falls_back_to_first() {
        let settings = resolve(
            r#"
            [[displays]]
            pages = ["first"]

            [[displays]]
            pages = ["second"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.display_config(1).unwrap().pages[0].url, "second");
        assert_eq!(settings.display_config(5).unwrap().pages[0].url, "first");
    }

    #[test]
    fn test_browser_options_deep_merge() {
        let settings = resolve(
            r#"
            [browser_options]
            headless = false
            args = ["--a"]
            viewport = { width = 800, height = 600 }

            [[displays]]
            pages = ["a"]
            browser_options = { args = ["--b"], viewport = { width = 1024 } }
            "#,
        )
        .unwrap();

        let merged = Value::Object(settings.displays[0].browser_options.clone());
        assert_eq!(
            merged,
            json!({
                "headless": false,
                "args": ["--a", "--b"],
                "viewport": { "width": 1024, "height": 600 }
            })
        );
    }

    #[test]
    fn test_overrides_take_priority() {
        let mut raw = BillboardToml::from_toml_str(
            r#"
            launch_url = "https://example.com/file"
            prepare_pages = 3

            [[displays]]
            pages = ["a"]
            "#,
        )
        .unwrap();

        ConfigOverrides {
            launch_url: Some("https://example.com/cli".to_string()),
            prepare_pages: Some(0),
            watch_displays: Some(false),
        }
        .apply(&mut raw);

        let settings = Settings::resolve(&raw).unwrap();
        assert_eq!(settings.launch_url, "https://example.com/cli");
        assert_eq!(settings.prepare_pages, 0);
        assert!(!settings.preload_enabled());
        assert!(!settings.watch_displays);
    }

    #[test]
    fn test_load_config_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            launch_timeout = 3

            [[displays]]
            pages = ["a"]

            [[screens]]
            left = 0
            top = 0
            width = 1280
            height = 720
            "#
        )
        .unwrap();

        let raw = load_config_from_path(file.path()).unwrap();
        assert_eq!(raw.screens.as_ref().map(Vec::len), Some(1));
        let settings = Settings::resolve(&raw).unwrap();
        assert_eq!(settings.launch_timeout, Duration::from_secs(3));
        assert_eq!(settings.launch_page().air_time, Duration::from_secs(3));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = load_config(Some(Path::new("/nonexistent/billboard.toml")));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
