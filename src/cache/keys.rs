//! Composite cache keys.
//!
//! A key is `<scope>|<options>`: the scope names the entity (or collection)
//! the key is filed under and the options part is the JSON encoding of a
//! canonical options value. Scopes end at the separator, so enumerating
//! `1|` never matches keys filed under `12|`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::domain::entities::EntityId;

const SEPARATOR: char = '|';
const GLOBAL_SCOPE: &str = "global";
const UNIT_OPTIONS: &str = "{}";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to encode cache options: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cache options from `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache key `{0}` has no scope separator")]
    Malformed(String),
    #[error("cache key `{0}` has an unrecognized scope")]
    UnknownScope(String),
}

/// Owner a key is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// A single entity, rendered as its id.
    Id(EntityId),
    /// Unscoped collection queries.
    Global,
    /// Something owned by a project, rendered as `p<id>`.
    Project(EntityId),
    /// Something owned by a chapter, rendered as `c<id>`.
    Chapter(EntityId),
}

impl Scope {
    /// The string every key under this scope starts with.
    pub fn prefix(&self) -> String {
        format!("{self}{SEPARATOR}")
    }
}

impl FromStr for Scope {
    type Err = KeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let unknown = || KeyError::UnknownScope(value.to_string());
        if value == GLOBAL_SCOPE {
            return Ok(Scope::Global);
        }
        if let Some(id) = value.strip_prefix('p') {
            return id.parse().map(Scope::Project).map_err(|_| unknown());
        }
        if let Some(id) = value.strip_prefix('c') {
            return id.parse().map(Scope::Chapter).map_err(|_| unknown());
        }
        value.parse().map(Scope::Id).map_err(|_| unknown())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Id(id) => write!(f, "{id}"),
            Scope::Global => f.write_str(GLOBAL_SCOPE),
            Scope::Project(id) => write!(f, "p{id}"),
            Scope::Chapter(id) => write!(f, "c{id}"),
        }
    }
}

/// A fully-formed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scope the key is filed under.
    pub fn scope(&self) -> Result<Scope, KeyError> {
        let (scope, _) = self
            .0
            .split_once(SEPARATOR)
            .ok_or_else(|| KeyError::Malformed(self.0.clone()))?;
        scope.parse()
    }

    /// The options part of the key.
    pub fn options(&self) -> Result<&str, KeyError> {
        self.0
            .split_once(SEPARATOR)
            .map(|(_, options)| options)
            .ok_or_else(|| KeyError::Malformed(self.0.clone()))
    }

    /// Decode the options part back into its canonical value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, KeyError> {
        serde_json::from_str(self.options()?).map_err(|source| KeyError::Decode {
            key: self.0.clone(),
            source,
        })
    }
}

impl From<String> for CompositeKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for CompositeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Join a scope and an options key.
pub fn prefix_key(scope: Scope, options_key: &str) -> CompositeKey {
    CompositeKey(format!("{scope}{SEPARATOR}{options_key}"))
}

/// Key for lookups that take no options (a cover, a page list).
pub fn unit_key(scope: Scope) -> CompositeKey {
    prefix_key(scope, UNIT_OPTIONS)
}

/// Deterministic serialization of a canonical options value.
///
/// Field order follows the struct declaration, so two equal canonical values
/// always serialize to the same string.
pub fn options_key<T: Serialize>(options: &T) -> Result<String, KeyError> {
    serde_json::to_string(options).map_err(KeyError::Encode)
}

/// Build the key for `options` filed under `scope`.
pub fn key_for<T: Serialize>(scope: Scope, options: &T) -> Result<CompositeKey, KeyError> {
    Ok(prefix_key(scope, &options_key(options)?))
}
