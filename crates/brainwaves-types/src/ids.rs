//! Type-safe identifier wrapper around [`Uuid`].
//!
//! A [`RunId`] uses UUID v7 (time-ordered) so that log lines from successive
//! runs sort in the order the runs were started.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a single pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
        assert_eq!(a.into_inner().get_version_num(), 7);
    }

    #[test]
    fn display_matches_uuid() {
        let id = RunId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }
}
