// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

/// Overrides the config file's `validation` when set to `1`/`0`.
pub const VALIDATION_ENV: &str = "EMBER_VALIDATION";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub app_name: String,
    /// Unset means "on in debug builds".
    pub validation: Option<bool>,
    pub window: WindowCfg,
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub pulse: bool,
}

impl Default for AppCfg {
    fn default() -> Self {
        AppCfg {
            app_name: "ember".to_owned(),
            validation: None,
            window: WindowCfg::default(),
            render: RenderCfg::default(),
        }
    }
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "ember".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            pulse: true,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

pub fn parse(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Reads `path`. A missing file gives the defaults; so does a malformed one,
/// with a warning.
pub fn load(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(text) => match parse(&text) {
            Ok(cfg) => {
                debug!("loaded {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring malformed {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("could not read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// CLI beats environment beats file beats build profile.
pub fn resolve_validation(cli: Option<bool>, env: Option<&str>, file: Option<bool>) -> bool {
    let env = env.and_then(|v| {
        let flag = parse_flag(v);
        if flag.is_none() {
            warn!("ignoring {VALIDATION_ENV}={v:?}");
        }
        flag
    });
    cli.or(env).or(file).unwrap_or(cfg!(debug_assertions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(parse("").unwrap(), AppCfg::default());
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let cfg = parse(
            r#"
            app_name = "demo"

            [window]
            width = 800

            [render]
            clear_color = [1.0, 0.0, 0.0, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.app_name, "demo");
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.window.title, "ember");
        assert_eq!(cfg.render.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert!(cfg.render.pulse);
        assert_eq!(cfg.validation, None);
    }

    #[test]
    fn malformed_text_is_an_error() {
        assert!(parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load(Path::new("definitely/not/here/ember.toml"));
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn validation_precedence() {
        assert!(resolve_validation(Some(true), Some("0"), Some(false)));
        assert!(!resolve_validation(Some(false), Some("1"), Some(true)));
        assert!(resolve_validation(None, Some("1"), Some(false)));
        assert!(!resolve_validation(None, Some("off"), Some(true)));
        assert!(resolve_validation(None, None, Some(true)));
        assert!(!resolve_validation(None, Some("maybe"), Some(false)));
        assert_eq!(resolve_validation(None, None, None), cfg!(debug_assertions));
    }
}
