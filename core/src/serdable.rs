use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// `glob::Pattern` that (de)serializes as its source string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GlobPattern(::glob::Pattern);

impl GlobPattern {
    pub fn parse(pattern: &str) -> Result<Self, ::glob::PatternError> {
        ::glob::Pattern::new(pattern).map(Self)
    }
}

impl Deref for GlobPattern {
    type Target = ::glob::Pattern;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for GlobPattern {
    type Error = ::glob::PatternError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<GlobPattern> for String {
    fn from(p: GlobPattern) -> Self {
        p.0.as_str().to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_through_toml_value() {
        #[derive(Debug, Deserialize, Serialize)]
        struct Entry {
            pattern: GlobPattern,
        }
        let e: Entry = toml::from_str(r#"pattern = "*.[hc]pp""#).unwrap();
        assert!(e.pattern.matches("main.cpp"));
        assert!(!e.pattern.matches("main.py"));
        assert_eq!(toml::to_string(&e).unwrap().trim(), r#"pattern = "*.[hc]pp""#);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        #[derive(Debug, Deserialize)]
        struct Entry {
            #[allow(dead_code)]
            pattern: GlobPattern,
        }
        assert!(toml::from_str::<Entry>(r#"pattern = "[a""#).is_err());
    }
}
