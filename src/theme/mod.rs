//! Feedback theme model.
//!
//! A theme maps event names to feedbacks per profile level and may
//! reference a parent theme by name. On disk a theme is JSON with
//! profiles as an array; in memory events are keyed for lookup.

pub mod expander;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::feedback::FeedbackConfig;

/// User-facing noisiness levels, ordered `Silent < Quiet < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProfileLevel {
    Silent,
    Quiet,
    Full,
}

impl ProfileLevel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "silent" => Some(ProfileLevel::Silent),
            "quiet" => Some(ProfileLevel::Quiet),
            "full" => Some(ProfileLevel::Full),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileLevel::Silent => "silent",
            ProfileLevel::Quiet => "quiet",
            ProfileLevel::Full => "full",
        }
    }

    /// Levels from this one down to `Silent`, inclusive.
    pub fn down_to_silent(self) -> impl Iterator<Item = ProfileLevel> {
        [ProfileLevel::Full, ProfileLevel::Quiet, ProfileLevel::Silent]
            .into_iter()
            .filter(move |l| *l <= self)
    }
}

/// One profile level's event → feedback mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProfileRepr", into = "ProfileRepr")]
pub struct Profile {
    name: String,
    feedbacks: HashMap<String, Arc<FeedbackConfig>>,
}

/// On-disk shape of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileRepr {
    name: String,
    feedbacks: Vec<FeedbackConfig>,
}

impl From<ProfileRepr> for Profile {
    fn from(repr: ProfileRepr) -> Self {
        let mut profile = Profile::new(&repr.name);
        for feedback in repr.feedbacks {
            profile.add_feedback(Arc::new(feedback));
        }
        profile
    }
}

impl From<Profile> for ProfileRepr {
    fn from(profile: Profile) -> Self {
        let mut feedbacks: Vec<_> = profile
            .feedbacks
            .into_values()
            .map(|fb| (*fb).clone())
            .collect();
        feedbacks.sort_by(|a, b| a.event_name().cmp(b.event_name()));
        ProfileRepr {
            name: profile.name,
            feedbacks,
        }
    }
}

impl Profile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            feedbacks: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a feedback under its event name, replacing any previous
    /// one (last writer wins).
    pub fn add_feedback(&mut self, feedback: Arc<FeedbackConfig>) {
        self.feedbacks
            .insert(feedback.event_name().to_string(), feedback);
    }

    pub fn feedback(&self, event_name: &str) -> Option<&Arc<FeedbackConfig>> {
        self.feedbacks.get(event_name)
    }

    pub fn feedbacks(&self) -> impl Iterator<Item = &Arc<FeedbackConfig>> {
        self.feedbacks.values()
    }

    pub fn len(&self) -> usize {
        self.feedbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feedbacks.is_empty()
    }
}

/// A full feedback theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ThemeRepr", into = "ThemeRepr")]
pub struct Theme {
    name: String,
    parent_name: Option<String>,
    profiles: HashMap<String, Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThemeRepr {
    name: String,
    #[serde(rename = "parent-name", default, skip_serializing_if = "Option::is_none")]
    parent_name: Option<String>,
    #[serde(default)]
    profiles: Vec<Profile>,
}

impl From<ThemeRepr> for Theme {
    fn from(repr: ThemeRepr) -> Self {
        let mut theme = Theme {
            name: repr.name,
            parent_name: repr.parent_name,
            profiles: HashMap::new(),
        };
        for profile in repr.profiles {
            theme.add_profile(profile);
        }
        theme
    }
}

impl From<Theme> for ThemeRepr {
    fn from(theme: Theme) -> Self {
        let mut profiles: Vec<_> = theme.profiles.into_values().collect();
        // Stable order: known levels low to high, then the rest by name
        profiles.sort_by_key(|p| match ProfileLevel::from_name(p.name()) {
            Some(level) => (level as usize, String::new()),
            None => (usize::MAX, p.name().to_string()),
        });
        ThemeRepr {
            name: theme.name,
            parent_name: theme.parent_name,
            profiles,
        }
    }
}

impl Theme {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent_name: None,
            profiles: HashMap::new(),
        }
    }

    /// Parse a theme from JSON, rejecting themes without a name and
    /// feedbacks with out-of-range fields.
    pub fn from_json(data: &str) -> Result<Self> {
        let theme = Self::parse(data)?;
        if theme.name.is_empty() {
            return Err(Error::ThemeParse("Theme name can't be empty".to_string()));
        }
        Ok(theme)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&Self::read(path)?)
    }

    /// Parse without requiring a name. The expander checks names
    /// across the whole parent chain and reports missing ones as
    /// expand errors.
    pub(crate) fn parse(data: &str) -> Result<Self> {
        let theme: Theme = serde_json::from_str(data)?;
        theme.validate()?;
        Ok(theme)
    }

    pub(crate) fn parse_file(path: &Path) -> Result<Self> {
        Self::parse(&Self::read(path)?)
    }

    fn read(path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .map_err(|e| Error::ThemeParse(format!("Failed to read {}: {e}", path.display())))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::ThemeParse(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        for profile in self.profiles.values() {
            for feedback in profile.feedbacks() {
                feedback.validate()?;
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }

    pub fn set_parent_name(&mut self, parent: Option<&str>) {
        self.parent_name = parent.map(str::to_string);
    }

    pub fn add_profile(&mut self, profile: Profile) {
        self.profiles.insert(profile.name().to_string(), profile);
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// Overlay `other` onto this theme: same-named profiles merge
    /// event-wise with the overlay winning, new profiles are adopted
    /// whole, and the overlay's name replaces ours.
    pub fn update(&mut self, other: &Theme) {
        for (profile_name, overlay) in &other.profiles {
            match self.profiles.get_mut(profile_name) {
                Some(base) => {
                    for feedback in overlay.feedbacks() {
                        base.add_feedback(Arc::clone(feedback));
                    }
                }
                None => {
                    self.profiles.insert(profile_name.clone(), overlay.clone());
                }
            }
        }
        self.name = other.name.clone();
    }

    /// Resolve the feedback for an event at the given level: the first
    /// profile from `level` down to `Silent` that maps the event wins.
    /// Quieter profiles inherit by omission.
    pub fn feedback(&self, level: ProfileLevel, event_name: &str) -> Option<Arc<FeedbackConfig>> {
        for level in level.down_to_silent() {
            if let Some(feedback) = self
                .profiles
                .get(level.as_str())
                .and_then(|p| p.feedback(event_name))
            {
                return Some(Arc::clone(feedback));
            }
        }
        debug!("No feedback for event {event_name}");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::DummyFeedback;

    const THEME_JSON: &str = r#"{
        "name": "test",
        "profiles": [
            {
                "name": "full",
                "feedbacks": [
                    {"type": "Sound", "event-name": "message-new-email", "effect": "message"},
                    {"type": "VibraRumble", "event-name": "phone-incoming-call",
                     "duration": 4000, "count": 4, "pause": 500}
                ]
            },
            {
                "name": "quiet",
                "feedbacks": [
                    {"type": "VibraPeriodic", "event-name": "phone-incoming-call",
                     "duration": 5000}
                ]
            },
            {
                "name": "silent",
                "feedbacks": [
                    {"type": "Led", "event-name": "phone-missed-call",
                     "frequency": 1000, "color": "blue"}
                ]
            }
        ]
    }"#;

    fn dummy(event: &str, duration: u32) -> Arc<FeedbackConfig> {
        Arc::new(FeedbackConfig::Dummy(DummyFeedback {
            event_name: event.to_string(),
            duration,
        }))
    }

    #[test]
    fn test_level_ordering() {
        assert!(ProfileLevel::Silent < ProfileLevel::Quiet);
        assert!(ProfileLevel::Quiet < ProfileLevel::Full);
        assert_eq!(ProfileLevel::from_name("quiet"), Some(ProfileLevel::Quiet));
        assert_eq!(ProfileLevel::from_name("loud"), None);
        assert_eq!(ProfileLevel::Full.as_str(), "full");

        let descent: Vec<_> = ProfileLevel::Quiet.down_to_silent().collect();
        assert_eq!(descent, [ProfileLevel::Quiet, ProfileLevel::Silent]);
    }

    #[test]
    fn test_parse_theme() {
        let theme = Theme::from_json(THEME_JSON).unwrap();
        assert_eq!(theme.name(), "test");
        assert!(theme.parent_name().is_none());

        let full = theme.profile("full").unwrap();
        assert_eq!(full.len(), 2);
        let fb = full.feedback("phone-incoming-call").unwrap();
        match &**fb {
            FeedbackConfig::VibraRumble(cfg) => {
                assert_eq!(cfg.duration, 4000);
                assert_eq!(cfg.count, 4);
                assert_eq!(cfg.pause, 500);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(Theme::from_json(r#"{"name": "", "profiles": []}"#).is_err());
        assert!(Theme::from_json(r#"{"profiles": []}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_zero_frequency_led() {
        let json = r#"{"name": "bad", "profiles": [
            {"name": "full", "feedbacks": [
                {"type": "Led", "event-name": "e", "frequency": 0}]}]}"#;
        assert!(Theme::from_json(json).is_err());
    }

    #[test]
    fn test_lookup_cascades_to_quieter_levels() {
        let theme = Theme::from_json(THEME_JSON).unwrap();

        // Defined at the requested level
        let fb = theme.feedback(ProfileLevel::Full, "message-new-email").unwrap();
        assert!(matches!(&*fb, FeedbackConfig::Sound(_)));

        // full defines it, but at quiet the quiet entry wins
        let fb = theme.feedback(ProfileLevel::Quiet, "phone-incoming-call").unwrap();
        assert!(matches!(&*fb, FeedbackConfig::VibraPeriodic(_)));

        // Only defined in silent: visible from every level
        let fb = theme.feedback(ProfileLevel::Full, "phone-missed-call").unwrap();
        assert!(matches!(&*fb, FeedbackConfig::Led(_)));

        // Defined above the requested level only
        assert!(theme.feedback(ProfileLevel::Silent, "message-new-email").is_none());
        assert!(theme.feedback(ProfileLevel::Full, "no-such-event").is_none());
    }

    #[test]
    fn test_lookup_returns_first_match_only() {
        // full defines the event, so the quiet entry must be shadowed
        let theme = Theme::from_json(THEME_JSON).unwrap();
        let fb = theme.feedback(ProfileLevel::Full, "phone-incoming-call").unwrap();
        assert!(matches!(&*fb, FeedbackConfig::VibraRumble(_)));
    }

    #[test]
    fn test_update_merges_profiles() {
        let mut base = Theme::new("parent");
        let mut full = Profile::new("full");
        full.add_feedback(dummy("e1", 0x10));
        base.add_profile(full);

        let mut overlay = Theme::new("child");
        let mut full = Profile::new("full");
        full.add_feedback(dummy("e1", 0x30));
        full.add_feedback(dummy("e2", 0x20));
        overlay.add_profile(full);
        let mut quiet = Profile::new("quiet");
        quiet.add_feedback(dummy("e3", 0x40));
        overlay.add_profile(quiet);

        base.update(&overlay);

        assert_eq!(base.name(), "child");
        let duration = |level, event| match &*base.feedback(level, event).unwrap() {
            FeedbackConfig::Dummy(cfg) => cfg.duration,
            other => panic!("wrong variant: {other:?}"),
        };
        assert_eq!(duration(ProfileLevel::Full, "e1"), 0x30);
        assert_eq!(duration(ProfileLevel::Full, "e2"), 0x20);
        assert_eq!(duration(ProfileLevel::Quiet, "e3"), 0x40);
    }

    #[test]
    fn test_update_keeps_base_only_events() {
        let mut base = Theme::new("parent");
        let mut full = Profile::new("full");
        full.add_feedback(dummy("keep-me", 7));
        base.add_profile(full);

        let mut overlay = Theme::new("child");
        let mut full = Profile::new("full");
        full.add_feedback(dummy("other", 9));
        overlay.add_profile(full);

        base.update(&overlay);
        assert!(base.feedback(ProfileLevel::Full, "keep-me").is_some());
        assert!(base.feedback(ProfileLevel::Full, "other").is_some());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let theme = Theme::from_json(THEME_JSON).unwrap();
        let json = theme.to_json().unwrap();
        let back = Theme::from_json(&json).unwrap();
        assert_eq!(theme, back);
    }

    #[test]
    fn test_parent_name_roundtrip() {
        let theme =
            Theme::from_json(r#"{"name": "kid", "parent-name": "default", "profiles": []}"#)
                .unwrap();
        assert_eq!(theme.parent_name(), Some("default"));

        let json = theme.to_json().unwrap();
        assert!(json.contains("parent-name"));
        assert_eq!(Theme::from_json(&json).unwrap().parent_name(), Some("default"));
    }
}
