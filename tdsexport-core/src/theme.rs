//! Light and dark palettes and desktop appearance detection.
//!
//! The workbook header styling follows the active palette. Detection asks the
//! desktop for its appearance setting:
//!
//! - macOS: `defaults read -g AppleInterfaceStyle` prints `Dark` in dark mode
//!   and fails when the key is absent (light mode)
//! - Windows: `AppsUseLightTheme` under the Personalize key is `0x0` in dark
//!   mode
//!
//! Any failure falls back to [`Theme::Light`].

use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::debug;

/// Requested theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    Auto,
    Light,
    Dark,
}

impl std::str::FromStr for ThemePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("unknown theme '{other}', expected auto, light or dark")),
        }
    }
}

/// Resolved theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

/// Colors as `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: u32,
    pub foreground: u32,
    pub entry: u32,
    pub accent: u32,
}

impl Theme {
    pub fn palette(self) -> Palette {
        match self {
            Theme::Dark => Palette {
                background: 0x1E_1E_1E,
                foreground: 0xE6_E6_E6,
                entry: 0x2B_2B_2B,
                accent: 0x4A_90_E2,
            },
            Theme::Light => Palette {
                background: 0xF4_F4_F4,
                foreground: 0x1E_1E_1E,
                entry: 0xFF_FF_FF,
                accent: 0x00_7A_FF,
            },
        }
    }
}

impl ThemePreference {
    /// Resolves `Auto` by asking the desktop; explicit choices pass through.
    pub fn resolve(self) -> Theme {
        match self {
            ThemePreference::Light => Theme::Light,
            ThemePreference::Dark => Theme::Dark,
            ThemePreference::Auto => detect_system_theme(),
        }
    }
}

/// Queries the desktop appearance, falling back to light.
pub fn detect_system_theme() -> Theme {
    let theme = if cfg!(target_os = "macos") {
        Command::new("defaults")
            .args(["read", "-g", "AppleInterfaceStyle"])
            .output()
            .ok()
            .filter(|out| out.status.success())
            .map_or(Theme::Light, |out| {
                parse_macos_style(&String::from_utf8_lossy(&out.stdout))
            })
    } else if cfg!(windows) {
        Command::new("reg")
            .args([
                "query",
                r"HKCU\Software\Microsoft\Windows\CurrentVersion\Themes\Personalize",
                "/v",
                "AppsUseLightTheme",
            ])
            .output()
            .ok()
            .filter(|out| out.status.success())
            .map_or(Theme::Light, |out| {
                parse_windows_personalize(&String::from_utf8_lossy(&out.stdout))
            })
    } else {
        Theme::Light
    };

    debug!("Detected {:?} desktop theme", theme);
    theme
}

/// Parses `defaults read -g AppleInterfaceStyle` output.
pub fn parse_macos_style(output: &str) -> Theme {
    if output.trim().eq_ignore_ascii_case("dark") {
        Theme::Dark
    } else {
        Theme::Light
    }
}

/// Parses `reg query ... /v AppsUseLightTheme` output.
pub fn parse_windows_personalize(output: &str) -> Theme {
    output
        .lines()
        .find(|line| line.contains("AppsUseLightTheme"))
        .and_then(|line| line.split_whitespace().last())
        .map_or(Theme::Light, |value| {
            if value.eq_ignore_ascii_case("0x0") {
                Theme::Dark
            } else {
                Theme::Light
            }
        })
}
