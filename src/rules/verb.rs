use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::err::ParseError;

// Verbs are compared, ordered and hashed by their string form, so a set of
// verbs iterates lexicographically no matter how it was built.
#[derive(Clone, Debug)]
pub enum Verb {
    Any,
    Get,
    List,
    Watch,
    Create,
    Update,
    Patch,
    Delete,
    DeleteCollection,
    Proxy,
    Impersonate,
    Bind,
    Escalate,
    Custom(String),
}

impl Verb {
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Any => "*",
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::DeleteCollection => "deletecollection",
            Verb::Proxy => "proxy",
            Verb::Impersonate => "impersonate",
            Verb::Bind => "bind",
            Verb::Escalate => "escalate",
            Verb::Custom(v) => v,
        }
    }
}

impl Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Verbs are opaque to RBAC: any single token names one, whatever its characters.
fn str_is_token(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(char::is_whitespace)
}

impl FromStr for Verb {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() > 64 {
            return Err(ParseError::InvalidVerb(
                s.to_string(),
                "must be at most 64 characters".to_string(),
            ));
        }
        if s == "*" {
            return Ok(Verb::Any);
        }
        if !str_is_token(s) {
            return Err(ParseError::InvalidVerb(
                s.to_string(),
                "must be a non-empty token without whitespace".to_string(),
            ));
        }
        Ok(match s {
            "get" => Verb::Get,
            "list" => Verb::List,
            "watch" => Verb::Watch,
            "create" => Verb::Create,
            "update" => Verb::Update,
            "patch" => Verb::Patch,
            "delete" => Verb::Delete,
            "deletecollection" => Verb::DeleteCollection,
            "proxy" => Verb::Proxy,
            "impersonate" => Verb::Impersonate,
            "bind" => Verb::Bind,
            "escalate" => Verb::Escalate,
            _ => Verb::Custom(s.to_string()),
        })
    }
}

impl PartialEq for Verb {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Verb {}

impl PartialOrd for Verb {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Verb {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for Verb {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl Serialize for Verb {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Verb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A rule list that is either exactly `["*"]` (everything the catalog knows at that level)
/// or a list of exact values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StarWildcardSelector<'a> {
    Any,
    Exact(&'a [String]),
}

impl<'a> From<&'a [String]> for StarWildcardSelector<'a> {
    fn from(values: &'a [String]) -> Self {
        match values {
            [only] if only == "*" => StarWildcardSelector::Any,
            _ => StarWildcardSelector::Exact(values),
        }
    }
}
