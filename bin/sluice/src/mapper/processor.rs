use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use sluice_event::{sanitize, Event};

use crate::GenericError;

pub const MATCH_TYPE_WILDCARD: &str = "wildcard";
pub const MATCH_TYPE_REGEX: &str = "regex";

static ALLOWED_WILDCARD_MATCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_*.]+$").expect("Invalid regex in ALLOWED_WILDCARD_MATCH_PATTERN"));

/// Policy hook around the mapping pipeline.
///
/// `processable` is a cheap pre-filter invoked on the raw (unsanitized) name segment before any decoding work is spent
/// on a line; returning `false` skips the line entirely and silently. `process` runs on every built event and may
/// rename it, retag it, pass it through unchanged, or drop it by returning `None`.
///
/// Implementations are invoked concurrently from every listener, so any internal state must be safe to share.
pub trait MappingProcessor: Send + Sync {
    /// Returns whether a line with the given raw metric name should be processed at all.
    fn processable(&self, raw_name: &str) -> bool;

    /// Transforms a built event, or drops it by returning `None`.
    fn process(&self, event: Event) -> Option<Event>;
}

/// A single configured mapping rule.
#[derive(Clone, Debug, Deserialize)]
pub struct MappingRuleConfig {
    /// The pattern matched against sanitized metric names.
    ///
    /// In `wildcard` mode, `*` matches a single dot-free name segment. In `regex` mode the pattern is used as-is,
    /// anchored at both ends.
    #[serde(rename = "match")]
    pub metric_match: String,

    /// The pattern style, `wildcard` or `regex`.
    ///
    /// Defaults to `wildcard`.
    #[serde(default = "default_match_type")]
    pub match_type: String,

    /// The replacement metric name.
    ///
    /// Capture group references (`$1`, ...) refer to groups of the match pattern; in wildcard mode each `*` is one
    /// group, in order.
    #[serde(default)]
    pub name: Option<String>,

    /// Additional tags stamped on matching events.
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Whether matching events are dropped instead of transformed.
    #[serde(default)]
    pub drop: bool,
}

fn default_match_type() -> String {
    MATCH_TYPE_WILDCARD.to_string()
}

struct MappingRule {
    regex: Regex,
    rename: Option<String>,
    tags: Vec<(String, String)>,
    drop: bool,
}

/// The default, rule-driven [`MappingProcessor`].
///
/// Stateless after construction: the prefix allowlist and compiled rules are read-only, so one instance is shared by
/// every listener.
pub struct RuleMappingProcessor {
    prefixes: Vec<String>,
    rules: Vec<MappingRule>,
}

impl RuleMappingProcessor {
    /// Compiles a processor from configuration.
    ///
    /// An empty prefix list makes every name processable. Rules apply first-match-wins, in configuration order.
    ///
    /// # Errors
    ///
    /// If a rule has an invalid match type, an uncompilable pattern, or no effect (neither `name`, `tags`, nor
    /// `drop`), an error describing the offending rule is returned.
    pub fn from_config(prefixes: &[String], rules: &[MappingRuleConfig]) -> Result<Self, GenericError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            if rule.match_type != MATCH_TYPE_WILDCARD && rule.match_type != MATCH_TYPE_REGEX {
                return Err(anyhow::anyhow!(
                    "mapping num {}: invalid match type `{}`, must be `{}` or `{}`",
                    i,
                    rule.match_type,
                    MATCH_TYPE_WILDCARD,
                    MATCH_TYPE_REGEX
                ));
            }
            if rule.drop && rule.name.is_some() {
                return Err(anyhow::anyhow!("mapping num {}: `drop` and `name` are mutually exclusive", i));
            }
            if !rule.drop && rule.name.is_none() && rule.tags.is_empty() {
                return Err(anyhow::anyhow!(
                    "mapping num {}: at least one of `name`, `tags`, or `drop` is required",
                    i
                ));
            }
            if let Some(name) = &rule.name {
                if name.is_empty() {
                    return Err(anyhow::anyhow!("mapping num {}: `name` must not be empty", i));
                }
            }

            let regex = build_regex(&rule.metric_match, &rule.match_type)?;
            compiled.push(MappingRule {
                regex,
                rename: rule.name.clone(),
                tags: rule.tags.iter().map(|(k, v)| (sanitize(k), sanitize(v))).collect(),
                drop: rule.drop,
            });
        }

        Ok(Self {
            prefixes: prefixes.to_vec(),
            rules: compiled,
        })
    }
}

impl MappingProcessor for RuleMappingProcessor {
    fn processable(&self, raw_name: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|prefix| raw_name.starts_with(prefix.as_str()))
    }

    fn process(&self, event: Event) -> Option<Event> {
        for rule in &self.rules {
            let rename = match rule.regex.captures(event.name()) {
                Some(captures) => {
                    if rule.drop {
                        return None;
                    }

                    rule.rename.as_ref().map(|rename| {
                        let mut expanded = String::new();
                        captures.expand(rename, &mut expanded);
                        sanitize(&expanded)
                    })
                }
                None => continue,
            };

            let mut event = event;
            if let Some(new_name) = rename {
                event = event.renamed(new_name);
            }
            for (key, value) in &rule.tags {
                event = event.with_tag(key.clone(), value.clone());
            }
            return Some(event);
        }

        Some(event)
    }
}

fn build_regex(metric_match: &str, match_type: &str) -> Result<Regex, GenericError> {
    let mut pattern = metric_match.to_owned();
    if match_type == MATCH_TYPE_WILDCARD {
        // Check it against the allowed wildcard pattern.
        if !ALLOWED_WILDCARD_MATCH_PATTERN.is_match(&pattern) {
            return Err(anyhow::anyhow!(
                "invalid wildcard match pattern `{}`, it does not match allowed match regex `{}`",
                pattern,
                ALLOWED_WILDCARD_MATCH_PATTERN.as_str()
            ));
        }
        // Disallow "**".
        if pattern.contains("**") {
            return Err(anyhow::anyhow!(
                "invalid wildcard match pattern `{}`, it should not contain consecutive `*`",
                pattern
            ));
        }
        // Escape dots and turn each `*` into a single-segment capture group.
        pattern = pattern.replace('.', "\\.");
        pattern = pattern.replace('*', "([^.]*)");
    }

    let final_pattern = format!("^{}$", pattern);
    match Regex::new(&final_pattern) {
        Ok(re) => Ok(re),
        Err(e) => Err(anyhow::anyhow!("invalid match `{}`, cannot compile regex: {}", metric_match, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use sluice_event::Event;

    use super::{MappingProcessor as _, MappingRuleConfig, RuleMappingProcessor};

    fn rule(metric_match: &str, match_type: &str, name: Option<&str>) -> MappingRuleConfig {
        MappingRuleConfig {
            metric_match: metric_match.to_string(),
            match_type: match_type.to_string(),
            name: name.map(str::to_string),
            tags: HashMap::new(),
            drop: false,
        }
    }

    fn counter(name: &str) -> Event {
        Event::builder(name).value(1.0).build("c").unwrap()
    }

    #[test]
    fn empty_prefix_list_accepts_everything() {
        let processor = RuleMappingProcessor::from_config(&[], &[]).unwrap();

        assert!(processor.processable("anything.at.all"));
        assert!(processor.processable(""));
    }

    #[test]
    fn prefix_allowlist_filters_names() {
        let prefixes = vec!["app.".to_string(), "db.".to_string()];
        let processor = RuleMappingProcessor::from_config(&prefixes, &[]).unwrap();

        assert!(processor.processable("app.requests"));
        assert!(processor.processable("db.queries"));
        assert!(!processor.processable("sys.load"));
    }

    #[test]
    fn no_rules_passes_events_through() {
        let processor = RuleMappingProcessor::from_config(&[], &[]).unwrap();
        let event = counter("app.requests");

        let processed = processor.process(event.clone()).unwrap();
        assert_eq!(processed, event);
    }

    #[test]
    fn wildcard_rename_with_capture() {
        let rules = vec![rule("test.job.*", "wildcard", Some("job.$1"))];
        let processor = RuleMappingProcessor::from_config(&[], &rules).unwrap();

        let processed = processor.process(counter("test.job.cleanup")).unwrap();
        assert_eq!(processed.name(), "job.cleanup");

        // `*` never crosses a dot boundary.
        let unmatched = processor.process(counter("test.job.cleanup.extra")).unwrap();
        assert_eq!(unmatched.name(), "test.job.cleanup.extra");
    }

    #[test]
    fn regex_rename_with_capture() {
        let rules = vec![rule(r"db\.([a-z]+)\.query", "regex", Some("database.$1"))];
        let processor = RuleMappingProcessor::from_config(&[], &rules).unwrap();

        let processed = processor.process(counter("db.users.query")).unwrap();
        assert_eq!(processed.name(), "database.users");
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            rule("app.*", "wildcard", Some("first.$1")),
            rule("app.requests", "wildcard", Some("second")),
        ];
        let processor = RuleMappingProcessor::from_config(&[], &rules).unwrap();

        let processed = processor.process(counter("app.requests")).unwrap();
        assert_eq!(processed.name(), "first.requests");
    }

    #[test]
    fn rule_tags_are_stamped() {
        let mut config = rule("app.*", "wildcard", Some("app.$1"));
        config.tags.insert("team".to_string(), "core".to_string());
        let processor = RuleMappingProcessor::from_config(&[], &[config]).unwrap();

        let processed = processor.process(counter("app.requests")).unwrap();
        assert_eq!(processed.tags().get("team").map(String::as_str), Some("core"));
    }

    #[test]
    fn drop_rule_drops_matching_events() {
        let mut config = rule("noise.*", "wildcard", None);
        config.drop = true;
        let processor = RuleMappingProcessor::from_config(&[], &[config]).unwrap();

        assert_eq!(processor.process(counter("noise.debug")), None);
        assert!(processor.process(counter("signal.requests")).is_some());
    }

    #[test]
    fn rename_results_are_sanitized() {
        let rules = vec![rule("app.*", "wildcard", Some("renamed metric.$1"))];
        let processor = RuleMappingProcessor::from_config(&[], &rules).unwrap();

        let processed = processor.process(counter("app.requests")).unwrap();
        assert_eq!(processed.name(), "renamed_metric.requests");
    }

    #[test]
    fn consecutive_wildcards_are_rejected() {
        let rules = vec![rule("app.**", "wildcard", Some("app"))];
        assert!(RuleMappingProcessor::from_config(&[], &rules).is_err());
    }

    #[test]
    fn wildcard_charset_is_restricted() {
        let rules = vec![rule("app metrics.*", "wildcard", Some("app"))];
        assert!(RuleMappingProcessor::from_config(&[], &rules).is_err());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let rules = vec![rule("app.(", "regex", Some("app"))];
        assert!(RuleMappingProcessor::from_config(&[], &rules).is_err());
    }

    #[test]
    fn invalid_match_type_is_rejected() {
        let rules = vec![rule("app.*", "glob", Some("app"))];
        assert!(RuleMappingProcessor::from_config(&[], &rules).is_err());
    }

    #[test]
    fn effectless_rule_is_rejected() {
        let rules = vec![rule("app.*", "wildcard", None)];
        assert!(RuleMappingProcessor::from_config(&[], &rules).is_err());
    }

    #[test]
    fn drop_with_name_is_rejected() {
        let mut config = rule("app.*", "wildcard", Some("app"));
        config.drop = true;
        assert!(RuleMappingProcessor::from_config(&[], &[config]).is_err());
    }
}
