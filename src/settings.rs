//! Layered, domain-scoped settings.
//!
//! A [`LayeredSettingSet`] resolves dotted keys such as
//! `containment.timeout.pull` against an ordered list of [`SettingLayer`]s,
//! highest precedence first. The process environment is one such layer: it
//! looks the key up as `CONTAINMENT_TIMEOUT_PULL`.
//!
//! ```
//! use containment::settings::{LayeredSettingSet, MapLayer};
//!
//! let settings = LayeredSettingSet::new("containment")
//!     .with_layer(MapLayer::from_pairs([("containment.timeout.pull", "5m")]));
//! let pull = settings.timeouts().get("pull", std::time::Duration::from_secs(1)).unwrap();
//! assert_eq!(pull.as_secs(), 300);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::durations::parse_duration;
use crate::error::ConfigError;

/// Default settings domain of this crate.
pub const DEFAULT_DOMAIN: &str = "containment";

const TIMEOUT_INFIX: &str = "timeout";

const TRUTHY_VALUES: &[&str] = &["true", "yes", "y", "1"];

/// Source of setting values keyed by fully qualified dotted keys.
pub trait SettingLayer: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl<F> SettingLayer for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Environment variable name for a dotted key: dots become underscores
/// and letters are uppercased.
pub fn environment_variable_name(key: &str) -> String {
    key.replace('.', "_").to_ascii_uppercase()
}

/// Layer reading the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentLayer;

impl SettingLayer for EnvironmentLayer {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(environment_variable_name(key)).ok()
    }
}

/// Layer backed by an in-memory map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapLayer {
    values: BTreeMap<String, String>,
}

impl MapLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SettingLayer for MapLayer {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Interprets a setting value as a boolean.
///
/// `true`, `yes`, `y` and `1` are true, ignoring case and surrounding
/// whitespace; anything else is false.
pub fn parse_truthy(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    TRUTHY_VALUES.contains(&normalized.as_str())
}

/// Settings of one domain composed from layers.
pub struct LayeredSettingSet {
    domain: String,
    layers: Vec<Box<dyn SettingLayer>>,
}

impl LayeredSettingSet {
    /// Creates a set with no layers. Every lookup is undefined until a layer
    /// is added.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            layers: Vec::new(),
        }
    }

    /// Creates a set backed by the process environment.
    pub fn environment(domain: impl Into<String>) -> Self {
        Self::new(domain).with_layer(EnvironmentLayer)
    }

    /// Adds a layer below the existing ones.
    pub fn with_layer(mut self, layer: impl SettingLayer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Qualifies `sections` with the domain. Blank sections are skipped and
    /// leading or trailing dots are trimmed from each.
    pub fn to_key(&self, sections: &[&str]) -> String {
        std::iter::once(self.domain.as_str())
            .chain(sections.iter().copied())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim_matches('.'))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Value of the first alias defined in the highest-precedence layer that
    /// defines any of them.
    pub fn get_any(&self, aliases: &[&str]) -> Option<String> {
        let keys: Vec<String> = aliases.iter().map(|a| self.to_key(&[a])).collect();
        self.layers
            .iter()
            .find_map(|layer| keys.iter().find_map(|key| layer.get(key)))
    }

    pub fn get(&self, identifier: &str) -> Option<String> {
        self.get_any(&[identifier])
    }

    /// Parses the value defined under any of `aliases`, or returns `default`
    /// if none is defined or the value is empty.
    pub fn get_typed<T, E, P>(&self, aliases: &[&str], parser: P, default: T) -> Result<T, E>
    where
        P: FnOnce(&str) -> Result<T, E>,
    {
        match self.get_any(aliases) {
            Some(value) if !value.is_empty() => parser(&value),
            _ => Ok(default),
        }
    }

    pub fn get_bool(&self, identifier: &str, default: bool) -> bool {
        match self.get(identifier) {
            Some(value) if !value.is_empty() => parse_truthy(&value),
            _ => default,
        }
    }

    pub fn get_u32(&self, identifier: &str, default: u32) -> Result<u32, ConfigError> {
        self.get_typed(
            &[identifier],
            |value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidSetting {
                        key: self.to_key(&[identifier]),
                        value: value.to_string(),
                    })
            },
            default,
        )
    }

    /// Timeout settings of this domain.
    pub fn timeouts(&self) -> Timeouts<'_> {
        Timeouts { settings: self }
    }
}

impl fmt::Debug for LayeredSettingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredSettingSet")
            .field("domain", &self.domain)
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Named timeout with a default value.
pub trait TimeoutSetting {
    /// Identifiers following `<domain>.timeout.` under which the value may be
    /// defined, in lookup order.
    fn aliases(&self) -> Vec<&str>;

    fn default_value(&self) -> Duration;
}

/// Short, medium and long timeouts shared by callers that have no more
/// specific setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardTimeout {
    /// 500 milliseconds.
    Short,
    /// 5 seconds.
    Medium,
    /// 30 seconds.
    Long,
}

impl TimeoutSetting for StandardTimeout {
    fn aliases(&self) -> Vec<&str> {
        match self {
            StandardTimeout::Short => vec!["short"],
            StandardTimeout::Medium => vec!["medium"],
            StandardTimeout::Long => vec!["long"],
        }
    }

    fn default_value(&self) -> Duration {
        match self {
            StandardTimeout::Short => Duration::from_millis(500),
            StandardTimeout::Medium => Duration::from_secs(5),
            StandardTimeout::Long => Duration::from_secs(30),
        }
    }
}

/// Durations keyed by `<domain>.timeout.<identifier>`.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts<'a> {
    settings: &'a LayeredSettingSet,
}

impl<'a> Timeouts<'a> {
    pub fn get_any(&self, aliases: &[&str], default: Duration) -> Result<Duration, ConfigError> {
        let qualified: Vec<String> = aliases
            .iter()
            .map(|a| format!("{TIMEOUT_INFIX}.{a}"))
            .collect();
        let qualified: Vec<&str> = qualified.iter().map(String::as_str).collect();
        self.settings.get_typed(&qualified, parse_duration, default)
    }

    pub fn get(&self, identifier: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get_any(&[identifier], default)
    }

    pub fn setting(&self, setting: &impl TimeoutSetting) -> Result<Duration, ConfigError> {
        self.get_any(&setting.aliases(), setting.default_value())
    }

    pub fn short(&self) -> Result<Duration, ConfigError> {
        self.setting(&StandardTimeout::Short)
    }

    pub fn medium(&self) -> Result<Duration, ConfigError> {
        self.setting(&StandardTimeout::Medium)
    }

    pub fn long(&self) -> Result<Duration, ConfigError> {
        self.setting(&StandardTimeout::Long)
    }

    /// Value of `<domain>.timeout` itself.
    pub fn anonymous(&self, default: Duration) -> Result<Duration, ConfigError> {
        self.get("", default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> LayeredSettingSet {
        LayeredSettingSet::new("foo").with_layer(MapLayer::from_pairs(pairs.iter().copied()))
    }

    #[test]
    fn test_to_key() {
        let set = LayeredSettingSet::new("foo");
        assert_eq!(set.to_key(&["bar"]), "foo.bar");
        assert_eq!(set.to_key(&["bar", "baz"]), "foo.bar.baz");
        assert_eq!(set.to_key(&["timeout."]), "foo.timeout");
        assert_eq!(set.to_key(&["", " ", ".bar."]), "foo.bar");
    }

    #[test]
    fn test_environment_variable_name() {
        assert_eq!(environment_variable_name("foo.bar.baz"), "FOO_BAR_BAZ");
        assert_eq!(
            environment_variable_name("containment.timeout.pull"),
            "CONTAINMENT_TIMEOUT_PULL"
        );
    }

    #[test]
    fn test_environment_layer_reads_process_env() {
        std::env::set_var("CONTAINMENT_SETTINGS_TEST_VALUE", "hello");
        let set = LayeredSettingSet::environment("containment");
        assert_eq!(
            set.get("settings.test.value").as_deref(),
            Some("hello")
        );
        assert_eq!(set.get("settings.test.undefined"), None);
        std::env::remove_var("CONTAINMENT_SETTINGS_TEST_VALUE");
    }

    #[test]
    fn test_higher_layer_wins() {
        let set = LayeredSettingSet::new("foo")
            .with_layer(MapLayer::new().with("foo.a", "top"))
            .with_layer(MapLayer::new().with("foo.a", "bottom").with("foo.b", "only"));
        assert_eq!(set.get("a").as_deref(), Some("top"));
        assert_eq!(set.get("b").as_deref(), Some("only"));
        assert_eq!(set.get("c"), None);
    }

    #[test]
    fn test_aliases_checked_within_a_layer_before_falling_through() {
        let set = LayeredSettingSet::new("foo")
            .with_layer(MapLayer::new().with("foo.second", "top"))
            .with_layer(MapLayer::new().with("foo.first", "bottom"));
        assert_eq!(set.get_any(&["first", "second"]).as_deref(), Some("top"));
    }

    #[test]
    fn test_closure_layer() {
        let set = LayeredSettingSet::new("foo")
            .with_layer(|key: &str| (key == "foo.x").then(|| "1".to_string()));
        assert!(set.get_bool("x", false));
        assert!(!set.get_bool("y", false));
        assert!(set.get_bool("y", true));
    }

    #[test]
    fn test_truthiness() {
        for value in ["true", "TRUE", " yes ", "Y", "1"] {
            assert!(parse_truthy(value), "{value:?}");
        }
        for value in ["", "false", "no", "0", "2", "on"] {
            assert!(!parse_truthy(value), "{value:?}");
        }
    }

    #[test]
    fn test_get_u32() {
        let set = settings(&[("foo.polls", "12"), ("foo.bad", "twelve"), ("foo.empty", "")]);
        assert_eq!(set.get_u32("polls", 3).unwrap(), 12);
        assert_eq!(set.get_u32("missing", 3).unwrap(), 3);
        assert_eq!(set.get_u32("empty", 3).unwrap(), 3);
        assert!(matches!(
            set.get_u32("bad", 3),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_timeouts() {
        let set = settings(&[
            ("foo.timeout.pull", "5m"),
            ("foo.timeout.medium", "PT10S"),
            ("foo.timeout", "250"),
            ("foo.timeout.broken", "soon"),
        ]);
        let timeouts = set.timeouts();
        assert_eq!(
            timeouts.get("pull", Duration::ZERO).unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(timeouts.short().unwrap(), Duration::from_millis(500));
        assert_eq!(timeouts.medium().unwrap(), Duration::from_secs(10));
        assert_eq!(timeouts.long().unwrap(), Duration::from_secs(30));
        assert_eq!(
            timeouts.anonymous(Duration::ZERO).unwrap(),
            Duration::from_millis(250)
        );
        assert!(timeouts.get("broken", Duration::ZERO).is_err());
    }

    #[test]
    fn test_debug_counts_layers() {
        let set = LayeredSettingSet::environment("foo");
        assert_eq!(
            format!("{set:?}"),
            "LayeredSettingSet { domain: \"foo\", layers: 1 }"
        );
    }
}
