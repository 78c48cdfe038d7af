//! Configuration and palette for vtbuf.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.vtbuf/config.toml`
//! - Resolution of cell colors through the configured 16-color palette
//!
//! # Configuration File
//!
//! ```toml
//! # Shell to run (defaults to $SHELL, then /bin/bash)
//! shell = "/bin/zsh"
//! term_var = "xterm-256color"
//! scrollback = 10000
//! max_block_size = 16384
//! read_chunk_size = 1024
//! auto_term_mode = true
//! show_welcome = true
//!
//! [colors]
//! # Up to 16 entries overriding the ANSI colors, in order
//! palette = ["black", "#cc0000", "2"]
//! default_fg = "#d0d0d0"
//! inactive_fg = "bright-black"
//! ```
//!
//! Colors are `#rrggbb`, a 256-color index, or an ANSI color name such as
//! `red` or `bright-blue`.

use std::fs;
use std::path::{Path, PathBuf};

use crossterm::style::Color as TermColor;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::term::Color;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config path")]
    NoHome,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command; unset means `$SHELL`
    pub shell: Option<String>,
    /// Value of `TERM` in the child
    pub term_var: String,
    /// Lines kept above the visible screen
    pub scrollback: usize,
    /// Queued bytes that force a redraw
    pub max_block_size: usize,
    pub read_chunk_size: usize,
    pub tab_width: usize,
    /// Enter term mode when a terminal is shown
    pub auto_term_mode: bool,
    pub show_welcome: bool,
    pub debug_log: bool,
    pub colors: ColorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            term_var: "xterm-256color".to_string(),
            scrollback: 10000,
            max_block_size: 16384,
            read_chunk_size: 1024,
            tab_width: 8,
            auto_term_mode: true,
            show_welcome: true,
            debug_log: false,
            colors: ColorConfig::default(),
        }
    }
}

/// `[colors]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub palette: Vec<String>,
    pub default_fg: Option<String>,
    pub default_bg: Option<String>,
    pub inactive_fg: Option<String>,
    pub inactive_bg: Option<String>,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let dir = config_dir().ok_or(ConfigError::NoHome)?;
        fs::create_dir_all(&dir)?;
        self.save_to(&dir.join("config.toml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn palette(&self) -> Palette {
        Palette::from_config(&self.colors)
    }
}

/// `~/.vtbuf`
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(|home| PathBuf::from(home).join(".vtbuf"))
}

const ANSI_NAMES: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];

const DEFAULT_PALETTE: [TermColor; 16] = [
    TermColor::Black,
    TermColor::DarkRed,
    TermColor::DarkGreen,
    TermColor::DarkYellow,
    TermColor::DarkBlue,
    TermColor::DarkMagenta,
    TermColor::DarkCyan,
    TermColor::Grey,
    TermColor::DarkGrey,
    TermColor::Red,
    TermColor::Green,
    TermColor::Yellow,
    TermColor::Blue,
    TermColor::Magenta,
    TermColor::Cyan,
    TermColor::White,
];

/// Parse `#rrggbb`, a 256-color index, or an ANSI color name
pub fn parse_color(s: &str) -> Option<TermColor> {
    let s = s.trim().to_ascii_lowercase();

    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        return Some(TermColor::Rgb {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        });
    }

    if let Ok(index) = s.parse::<u8>() {
        return Some(match DEFAULT_PALETTE.get(index as usize) {
            Some(&named) => named,
            None => TermColor::AnsiValue(index),
        });
    }

    let (base, light) = match s.strip_prefix("bright-") {
        Some(rest) => (rest, true),
        None => (s.as_str(), false),
    };
    if !light && matches!(base, "gray" | "grey") {
        return Some(TermColor::Grey);
    }
    let idx = ANSI_NAMES.iter().position(|&name| name == base)?;
    Some(DEFAULT_PALETTE[idx + if light { 8 } else { 0 }])
}

/// Cell colors resolved to host colors
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: [TermColor; 16],
    default_fg: TermColor,
    default_bg: TermColor,
    inactive_fg: TermColor,
    inactive_bg: TermColor,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: DEFAULT_PALETTE,
            default_fg: TermColor::Reset,
            default_bg: TermColor::Reset,
            inactive_fg: TermColor::Reset,
            inactive_bg: TermColor::Reset,
        }
    }
}

impl Palette {
    pub fn from_config(config: &ColorConfig) -> Self {
        let mut palette = Self::default();

        for (idx, entry) in config.palette.iter().enumerate().take(16) {
            match parse_color(entry) {
                Some(color) => palette.colors[idx] = color,
                None => warn!("Invalid palette color {}: {:?}", idx, entry),
            }
        }

        let pick = |value: &Option<String>, fallback: TermColor| match value.as_deref() {
            None => fallback,
            Some(s) => parse_color(s).unwrap_or_else(|| {
                warn!("Invalid color {:?}", s);
                fallback
            }),
        };
        palette.default_fg = pick(&config.default_fg, TermColor::Reset);
        palette.default_bg = pick(&config.default_bg, TermColor::Reset);
        palette.inactive_fg = pick(&config.inactive_fg, palette.default_fg);
        palette.inactive_bg = pick(&config.inactive_bg, palette.default_bg);
        palette
    }

    fn resolve(&self, color: Color, default: TermColor) -> TermColor {
        match color {
            Color::Default => default,
            Color::Ansi { .. } => color
                .palette_index()
                .and_then(|idx| self.colors.get(idx).copied())
                .unwrap_or(default),
            Color::Indexed(n) if n < 16 => self.colors[n as usize],
            Color::Indexed(n) => TermColor::AnsiValue(n),
            Color::Rgb(r, g, b) => TermColor::Rgb { r, g, b },
        }
    }

    pub fn foreground(&self, color: Color, active: bool) -> TermColor {
        let default = if active { self.default_fg } else { self.inactive_fg };
        self.resolve(color, default)
    }

    pub fn background(&self, color: Color, active: bool) -> TermColor {
        let default = if active { self.default_bg } else { self.inactive_bg };
        self.resolve(color, default)
    }
}
