//! Theme expander: resolves theme names to files and merges the
//! `parent-name` chain into a single theme.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::theme::Theme;

const DEFAULT_THEME_NAME: &str = "default";
const MAX_THEME_DEPTH: usize = 10;

const DEVICE_TREE_COMPATIBLE: &str = "/sys/firmware/devicetree/base/compatible";

/// Device-tree compatibles of this machine, most specific first.
/// Empty on hosts without a device tree.
pub fn device_compatibles() -> Vec<String> {
    let Ok(raw) = std::fs::read(DEVICE_TREE_COMPATIBLE) else {
        return Vec::new();
    };
    raw.split(|b| *b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

/// Compiled-in fallback so a bare install always has a theme.
const EMBEDDED_DEFAULT_THEME: &str = include_str!("../../themes/default.json");

/// Resolves and expands themes from the XDG theme directories.
pub struct ThemeExpander {
    theme_file: Option<PathBuf>,
    compatibles: Vec<String>,
    user_theme_dir: Option<PathBuf>,
    data_theme_dirs: Vec<PathBuf>,
}

impl ThemeExpander {
    /// Expander using the environment's XDG directories.
    ///
    /// `theme_file` takes precedence over name resolution for the root
    /// theme; `compatibles` select device-specific overlays for the
    /// default theme.
    pub fn new(compatibles: Vec<String>, theme_file: Option<PathBuf>) -> Self {
        let user_theme_dir = dirs::config_dir().map(|dir| dir.join("feedbackd/themes"));
        let data_dirs = std::env::var("XDG_DATA_DIRS")
            .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_string());
        let data_theme_dirs = std::env::split_paths(&data_dirs)
            .map(|dir| dir.join("feedbackd/themes"))
            .collect();

        Self {
            theme_file,
            compatibles,
            user_theme_dir,
            data_theme_dirs,
        }
    }

    /// Expander with explicit search directories.
    pub fn with_dirs(
        compatibles: Vec<String>,
        theme_file: Option<PathBuf>,
        user_theme_dir: Option<PathBuf>,
        data_theme_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            theme_file,
            compatibles,
            user_theme_dir,
            data_theme_dirs,
        }
    }

    pub fn theme_file(&self) -> Option<&Path> {
        self.theme_file.as_deref()
    }

    pub fn compatibles(&self) -> &[String] {
        &self.compatibles
    }

    fn find_in_data_dirs(&self, theme_name: &str) -> Option<PathBuf> {
        let file_name = format!("{theme_name}.json");
        for dir in &self.data_theme_dirs {
            let path = dir.join(&file_name);
            debug!("Looking for theme file at {}", path.display());
            if path.exists() {
                info!("Loading theme file at '{}'", path.display());
                return Some(path);
            }
        }
        None
    }

    fn find_user_theme(&self, theme_name: &str) -> Option<PathBuf> {
        let path = self
            .user_theme_dir
            .as_ref()?
            .join(format!("{theme_name}.json"));
        if path.exists() {
            info!("Found theme file at: {}", path.display());
            return Some(path);
        }
        debug!("No user theme found for '{theme_name}'");
        None
    }

    /// Device-specific overlays apply to the default theme only: the
    /// first compatible with a theme file wins.
    fn find_device_theme(&self, theme_name: &str) -> Option<PathBuf> {
        if theme_name != DEFAULT_THEME_NAME {
            return None;
        }
        for compatible in &self.compatibles {
            if let Some(path) = self.find_in_data_dirs(compatible) {
                info!(
                    "Loading themefile for compatible '{compatible}' at: {}",
                    path.display()
                );
                return Some(path);
            }
        }
        debug!("No device theme found");
        None
    }

    /// Resolution order: user config, device overlay (default only),
    /// XDG data dirs.
    fn find_theme_path(&self, theme_name: &str) -> Option<PathBuf> {
        self.find_user_theme(theme_name)
            .or_else(|| self.find_device_theme(theme_name))
            .or_else(|| self.find_in_data_dirs(theme_name))
    }

    /// Load a theme by name, falling back to the default theme (and
    /// finally to the compiled-in copy) when it can't be resolved.
    /// Name checks are left to `load_theme` so an empty name anywhere
    /// in the chain is an expand error, not a parse error.
    fn load_by_name(&self, theme_name: &str) -> Result<Theme> {
        if let Some(path) = self.find_theme_path(theme_name) {
            return Theme::parse_file(&path);
        }

        if theme_name != DEFAULT_THEME_NAME {
            warn!("Theme '{theme_name}' not found, falling back to default theme");
            if let Some(path) = self.find_theme_path(DEFAULT_THEME_NAME) {
                return Theme::parse_file(&path);
            }
        }

        info!("Using compiled-in default theme");
        Theme::from_json(EMBEDDED_DEFAULT_THEME)
    }

    /// Parse the root theme and its `parent-name` chain, merging parent
    /// to child so children override.
    pub fn load_theme(&self) -> Result<Theme> {
        let mut theme = match &self.theme_file {
            Some(path) => Theme::from_file(path)?,
            None => self.load_by_name(DEFAULT_THEME_NAME)?,
        };

        let mut chain = Vec::new();
        loop {
            if chain.len() > MAX_THEME_DEPTH {
                return Err(Error::ThemeExpand("Theme depth exceeded".to_string()));
            }
            if theme.name().is_empty() {
                return Err(Error::ThemeExpand("Theme name can't be empty".to_string()));
            }
            if theme.parent_name().is_some() && theme.name() == DEFAULT_THEME_NAME {
                return Err(Error::ThemeExpand(
                    "Default theme can't specify a parent".to_string(),
                ));
            }

            let parent_name = theme.parent_name().map(str::to_string);
            chain.push(theme);

            let Some(parent_name) = parent_name else { break };
            theme = self.load_by_name(&parent_name)?;
        }

        let mut merged = Theme::new("merged-theme");
        for theme in chain.iter().rev() {
            merged.update(theme);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackConfig;
    use crate::theme::ProfileLevel;

    struct Fixture {
        _user: tempfile::TempDir,
        _data: tempfile::TempDir,
        user_dir: PathBuf,
        data_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let user = tempfile::tempdir().unwrap();
            let data = tempfile::tempdir().unwrap();
            let user_dir = user.path().join("feedbackd/themes");
            let data_dir = data.path().join("feedbackd/themes");
            std::fs::create_dir_all(&user_dir).unwrap();
            std::fs::create_dir_all(&data_dir).unwrap();
            Self {
                _user: user,
                _data: data,
                user_dir,
                data_dir,
            }
        }

        fn write_user(&self, name: &str, json: &str) {
            std::fs::write(self.user_dir.join(format!("{name}.json")), json).unwrap();
        }

        fn write_data(&self, name: &str, json: &str) {
            std::fs::write(self.data_dir.join(format!("{name}.json")), json).unwrap();
        }

        fn expander(&self, compatibles: &[&str]) -> ThemeExpander {
            ThemeExpander::with_dirs(
                compatibles.iter().map(|s| s.to_string()).collect(),
                None,
                Some(self.user_dir.clone()),
                vec![self.data_dir.clone()],
            )
        }
    }

    fn theme_json(name: &str, parent: Option<&str>, event: &str, duration: u32) -> String {
        let parent = parent
            .map(|p| format!("\"parent-name\": \"{p}\","))
            .unwrap_or_default();
        format!(
            r#"{{"name": "{name}", {parent}
                "profiles": [{{"name": "full", "feedbacks": [
                    {{"type": "Dummy", "event-name": "{event}", "duration": {duration}}}]}}]}}"#
        )
    }

    fn dummy_duration(theme: &Theme, event: &str) -> u32 {
        match &*theme.feedback(ProfileLevel::Full, event).unwrap() {
            FeedbackConfig::Dummy(cfg) => cfg.duration,
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_user_theme_beats_data_theme() {
        let fx = Fixture::new();
        fx.write_user("default", &theme_json("default", None, "e", 1));
        fx.write_data("default", &theme_json("default", None, "e", 2));

        let theme = fx.expander(&[]).load_theme().unwrap();
        assert_eq!(dummy_duration(&theme, "e"), 1);
    }

    #[test]
    fn test_compatible_overlay_for_default() {
        let fx = Fixture::new();
        fx.write_data("pine64,pinephone", &theme_json("pinephone", None, "e", 7));
        fx.write_data("default", &theme_json("default", None, "e", 2));

        // First matching compatible wins over the generic default
        let theme = fx
            .expander(&["pine64,pinephone-1.2", "pine64,pinephone"])
            .load_theme()
            .unwrap();
        assert_eq!(dummy_duration(&theme, "e"), 7);
    }

    #[test]
    fn test_parent_chain_merges_child_over_parent() {
        let fx = Fixture::new();
        fx.write_data("default", &theme_json("default", None, "e1", 0x10));
        fx.write_user(
            "child",
            r#"{"name": "child", "parent-name": "default",
                "profiles": [{"name": "full", "feedbacks": [
                    {"type": "Dummy", "event-name": "e1", "duration": 48},
                    {"type": "Dummy", "event-name": "e2", "duration": 32}]}]}"#,
        );

        let expander = ThemeExpander::with_dirs(
            vec![],
            Some(fx.user_dir.join("child.json")),
            Some(fx.user_dir.clone()),
            vec![fx.data_dir.clone()],
        );
        let theme = expander.load_theme().unwrap();

        assert_eq!(theme.name(), "child");
        assert_eq!(dummy_duration(&theme, "e1"), 48);
        assert_eq!(dummy_duration(&theme, "e2"), 32);
    }

    #[test]
    fn test_missing_parent_falls_back_to_default() {
        let fx = Fixture::new();
        fx.write_data("default", &theme_json("default", None, "base", 5));
        fx.write_user("kid", &theme_json("kid", Some("no-such-theme"), "own", 9));

        let expander = ThemeExpander::with_dirs(
            vec![],
            Some(fx.user_dir.join("kid.json")),
            Some(fx.user_dir.clone()),
            vec![fx.data_dir.clone()],
        );
        let theme = expander.load_theme().unwrap();
        assert_eq!(dummy_duration(&theme, "base"), 5);
        assert_eq!(dummy_duration(&theme, "own"), 9);
    }

    #[test]
    fn test_theme_depth_exceeded() {
        let fx = Fixture::new();
        // a is its own ancestor
        fx.write_user("a", &theme_json("a", Some("b"), "e", 1));
        fx.write_user("b", &theme_json("b", Some("a"), "e", 2));

        let expander = ThemeExpander::with_dirs(
            vec![],
            Some(fx.user_dir.join("a.json")),
            Some(fx.user_dir.clone()),
            vec![fx.data_dir.clone()],
        );
        let err = expander.load_theme().unwrap_err();
        assert!(matches!(err, Error::ThemeExpand(_)), "{err}");
    }

    #[test]
    fn test_empty_name_mid_chain_is_expand_error() {
        let fx = Fixture::new();
        fx.write_user("kid", &theme_json("kid", Some("noname"), "e", 1));
        fx.write_user("noname", &theme_json("", None, "e", 2));

        let expander = ThemeExpander::with_dirs(
            vec![],
            Some(fx.user_dir.join("kid.json")),
            Some(fx.user_dir.clone()),
            vec![fx.data_dir.clone()],
        );
        let err = expander.load_theme().unwrap_err();
        assert!(matches!(err, Error::ThemeExpand(_)), "{err}");
    }

    #[test]
    fn test_empty_name_in_root_file_is_parse_error() {
        let fx = Fixture::new();
        fx.write_user("broken", &theme_json("", None, "e", 1));

        let expander = ThemeExpander::with_dirs(
            vec![],
            Some(fx.user_dir.join("broken.json")),
            Some(fx.user_dir.clone()),
            vec![fx.data_dir.clone()],
        );
        let err = expander.load_theme().unwrap_err();
        assert!(matches!(err, Error::ThemeParse(_)), "{err}");
    }

    #[test]
    fn test_default_with_parent_rejected() {
        let fx = Fixture::new();
        fx.write_data("default", &theme_json("default", Some("other"), "e", 1));

        let err = fx.expander(&[]).load_theme().unwrap_err();
        assert!(matches!(err, Error::ThemeExpand(_)), "{err}");
    }

    #[test]
    fn test_embedded_default_as_last_resort() {
        let fx = Fixture::new();
        let theme = fx.expander(&[]).load_theme().unwrap();
        // The compiled-in theme resolves and carries the usual events
        assert!(theme
            .feedback(ProfileLevel::Full, "phone-incoming-call")
            .is_some());
    }

    #[test]
    fn test_missing_theme_file_is_fatal() {
        let fx = Fixture::new();
        let expander = ThemeExpander::with_dirs(
            vec![],
            Some(PathBuf::from("/nonexistent/theme.json")),
            Some(fx.user_dir.clone()),
            vec![fx.data_dir.clone()],
        );
        assert!(expander.load_theme().is_err());
    }
}
