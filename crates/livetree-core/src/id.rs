//! Replica-scoped identities.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("id must have the form \"<actor>:<clock>\"")]
    Malformed,
}

/// Identity minted by one replica, `"<actor>:<clock>"` on the wire.
///
/// The same shape names both nodes and operations; the two counters advance
/// independently within a replica. Identities are globally unique provided
/// actors are unique across the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    pub actor: u64,
    pub clock: u64,
}

impl Id {
    pub const fn new(actor: u64, clock: u64) -> Self {
        Self { actor, clock }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.clock)
    }
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (actor, clock) = s.split_once(':').ok_or(ParseIdError::Malformed)?;
        Ok(Self {
            actor: actor.parse().map_err(|_| ParseIdError::Malformed)?,
            clock: clock.parse().map_err(|_| ParseIdError::Malformed)?,
        })
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
