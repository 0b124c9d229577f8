//! Protocol domains

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A logical grouping of client commands and events.
///
/// The set is closed: the bridge only ever registers handlers for these
/// four domains, and anything else is reported as an unknown domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    /// Execution control, breakpoints and call frames
    Debugger,
    /// Object inspection and expression evaluation
    Runtime,
    /// Program output
    Console,
    /// Page/frame metadata
    Page,
}

impl Domain {
    /// All domains, in registration order (Debugger first)
    pub const ALL: [Domain; 4] = [Self::Debugger, Self::Runtime, Self::Console, Self::Page];

    /// Wire name of the domain
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debugger => "Debugger",
            Self::Runtime => "Runtime",
            Self::Console => "Console",
            Self::Page => "Page",
        }
    }

    /// Build a fully-qualified method name, e.g. `Debugger.paused`
    pub fn method(&self, name: &str) -> String {
        format!("{}.{}", self.as_str(), name)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a domain segment does not name a known domain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown domain '{0}'")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == s)
            .ok_or_else(|| UnknownDomain(s.to_string()))
    }
}
