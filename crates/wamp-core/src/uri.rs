//! URI and dict-key validation
//!
//! WAMP URIs are dot-separated segments:
//! ```text
//! com.example.topic
//! wamp.error.no_such_realm
//! ```
//!
//! The accepted segment alphabet depends on the active [`UriMatchingRule`].
//! Every rule has a variant that also accepts empty segments (`a..b`,
//! trailing dots, the empty string).

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Selectable URI rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UriMatchingRule {
    /// Lowercase alphanumerics and underscore, no empty segments
    #[default]
    Simple,
    SimpleAllowEmpty,
    /// Anything but whitespace, `.` and `#` inside a segment
    Loose,
    LooseAllowEmpty,
    /// Like `Simple`, but every segment starts with a lowercase letter
    Strict,
    StrictAllowEmpty,
}

impl UriMatchingRule {
    pub fn pattern(self) -> &'static str {
        match self {
            UriMatchingRule::Simple => r"^([0-9a-z_]+\.)*[0-9a-z_]+$",
            UriMatchingRule::SimpleAllowEmpty => r"^([0-9a-z_]*\.)*[0-9a-z_]*$",
            UriMatchingRule::Loose => r"^([^\s.#]+\.)*[^\s.#]+$",
            UriMatchingRule::LooseAllowEmpty => r"^([^\s.#]*\.)*[^\s.#]*$",
            UriMatchingRule::Strict => r"^([a-z][0-9a-z_]*\.)*[a-z][0-9a-z_]*$",
            UriMatchingRule::StrictAllowEmpty => r"^(([a-z][0-9a-z_]*)?\.)*([a-z][0-9a-z_]*)?$",
        }
    }

    pub fn allows_empty(self) -> bool {
        matches!(
            self,
            UriMatchingRule::SimpleAllowEmpty
                | UriMatchingRule::LooseAllowEmpty
                | UriMatchingRule::StrictAllowEmpty
        )
    }
}

/// A compiled URI rule
#[derive(Debug, Clone)]
pub struct UriMatcher {
    rule: UriMatchingRule,
    regex: Regex,
}

impl UriMatcher {
    pub fn new(rule: UriMatchingRule) -> Result<Self> {
        let regex = Regex::new(rule.pattern())
            .map_err(|e| Error::InvalidArgument(format!("uri rule {:?}: {}", rule, e)))?;
        Ok(Self { rule, regex })
    }

    pub fn rule(&self) -> UriMatchingRule {
        self.rule
    }

    pub fn is_match(&self, uri: &str) -> bool {
        self.regex.is_match(uri)
    }

    /// Check a URI, returning `InvalidUri` on mismatch
    pub fn validate(&self, uri: &str) -> Result<()> {
        if self.is_match(uri) {
            Ok(())
        } else {
            Err(Error::InvalidUri(uri.to_string()))
        }
    }
}

/// Default dict-key rules: identifier-like keys of at least three characters,
/// or underscore-prefixed keys of at least four
pub const DEFAULT_DICT_KEY_RULES: &[&str] = &[r"^[a-z][0-9a-z_]{2,}$", r"^_[0-9a-z_]{3,}$"];

/// Compiled dict-key rules; a key is valid if any rule matches it
#[derive(Debug, Clone)]
pub struct DictKeyRules {
    rules: Vec<Regex>,
}

impl DictKeyRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    Error::InvalidArgument(format!("dict key rule {:?}: {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.rules.iter().any(|rule| rule.is_match(key))
    }

    pub fn validate(&self, key: &str) -> Result<()> {
        if self.is_match(key) {
            Ok(())
        } else {
            Err(Error::InvalidDictKey(key.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(rule: UriMatchingRule) -> UriMatcher {
        UriMatcher::new(rule).unwrap()
    }

    #[test]
    fn test_simple_rule() {
        let m = matcher(UriMatchingRule::Simple);

        assert!(m.is_match("com.example.topic"));
        assert!(m.is_match("wamp.error.no_such_realm"));
        assert!(m.is_match("com.example.1"));
        assert!(m.is_match("single"));

        assert!(!m.is_match(""));
        assert!(!m.is_match("com..topic"));
        assert!(!m.is_match("com.example."));
        assert!(!m.is_match(".com"));
        assert!(!m.is_match("com.Example"));
        assert!(!m.is_match("com.exa mple"));
        assert!(!m.is_match("com.example#x"));
    }

    #[test]
    fn test_allow_empty_variants() {
        let simple = matcher(UriMatchingRule::SimpleAllowEmpty);
        assert!(simple.is_match("com..topic"));
        assert!(simple.is_match(""));
        assert!(!simple.is_match("com.Topic"));

        let loose = matcher(UriMatchingRule::LooseAllowEmpty);
        assert!(loose.is_match("Com..Topic"));
        assert!(!loose.is_match("com. .topic"));

        let strict = matcher(UriMatchingRule::StrictAllowEmpty);
        assert!(strict.is_match("com..topic"));
        assert!(!strict.is_match("com..1topic"));
    }

    #[test]
    fn test_loose_rule() {
        let m = matcher(UriMatchingRule::Loose);
        assert!(m.is_match("com.Example.Topic-1"));
        assert!(!m.is_match("com.example topic"));
        assert!(!m.is_match("com.ex#ample"));
        assert!(!m.is_match("com..example"));
    }

    #[test]
    fn test_strict_rule() {
        let m = matcher(UriMatchingRule::Strict);
        assert!(m.is_match("com.example.topic_1"));
        assert!(!m.is_match("com.example.1topic"));
        assert!(!m.is_match("com._private"));
    }

    #[test]
    fn test_every_rule_compiles() {
        for rule in [
            UriMatchingRule::Simple,
            UriMatchingRule::SimpleAllowEmpty,
            UriMatchingRule::Loose,
            UriMatchingRule::LooseAllowEmpty,
            UriMatchingRule::Strict,
            UriMatchingRule::StrictAllowEmpty,
        ] {
            let m = UriMatcher::new(rule).unwrap();
            assert_eq!(m.rule(), rule);
            assert_eq!(m.is_match(""), rule.allows_empty());
        }
    }

    #[test]
    fn test_default_dict_key_rules() {
        let rules = DictKeyRules::new(DEFAULT_DICT_KEY_RULES).unwrap();

        assert!(rules.is_match("acknowledge"));
        assert!(rules.is_match("exclude_me"));
        assert!(rules.is_match("_secret"));

        assert!(!rules.is_match("ab"));
        assert!(!rules.is_match("_ab"));
        assert!(!rules.is_match("Roles"));
        assert!(!rules.is_match("$where"));
        assert!(!rules.is_match("__proto__ x"));
        assert_eq!(
            rules.validate("x"),
            Err(Error::InvalidDictKey("x".to_string()))
        );
    }

    #[test]
    fn test_bad_dict_key_rule() {
        let err = DictKeyRules::new(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
