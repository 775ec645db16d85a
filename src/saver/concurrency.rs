//! Optimistic concurrency: version stamping and conflict reporting.

use crate::error::Error;
use crate::model::{EntityArena, Handle};
use crate::schema::TypeName;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// How the next version of a row is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionPolicy {
    /// 1 on insert, previous + 1 on update.
    #[default]
    Counter,
    /// Current UTC time in microseconds, bumped past the previous value if
    /// the clock has not moved.
    Clock,
}

impl VersionPolicy {
    /// Version to write for a row whose current version is `previous`.
    #[must_use]
    pub fn next(self, previous: Option<i64>) -> i64 {
        let floor = previous.map_or(1, |v| v.saturating_add(1));
        match self {
            Self::Counter => floor,
            Self::Clock => floor.max(Utc::now().timestamp_micros()),
        }
    }
}

/// Stamp new versions on `handles` and return the versions they replace,
/// in the same order.
pub(crate) fn stamp(arena: &mut EntityArena, handles: &[Handle], policy: VersionPolicy) -> Vec<Option<i64>> {
    handles
        .iter()
        .map(|&h| {
            let entity = &mut arena[h];
            let previous = entity.version;
            entity.version = Some(policy.next(previous));
            previous
        })
        .collect()
}

/// Error for rows an UPDATE did not reach.
pub(crate) fn missing_rows(type_name: &TypeName, versioned: bool, ids: Vec<i64>) -> Error {
    if versioned {
        Error::ConcurrencyConflict {
            type_name: type_name.clone(),
            ids,
        }
    } else {
        Error::EntityNotFound {
            type_name: type_name.clone(),
            ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;

    #[test]
    fn test_counter_policy() {
        assert_eq!(VersionPolicy::Counter.next(None), 1);
        assert_eq!(VersionPolicy::Counter.next(Some(41)), 42);
    }

    #[test]
    fn test_clock_policy_strictly_increases() {
        let now = Utc::now().timestamp_micros();
        assert!(VersionPolicy::Clock.next(None) >= now);
        let far_future = now + 1_000_000_000;
        assert_eq!(VersionPolicy::Clock.next(Some(far_future)), far_future + 1);
    }

    #[test]
    fn test_stamp_returns_previous_versions() {
        let mut arena = EntityArena::new();
        let a = arena.add(Entity::existing("A", 1, Some(3)));
        let b = arena.add(Entity::new("A"));

        let previous = stamp(&mut arena, &[a, b], VersionPolicy::Counter);
        assert_eq!(previous, vec![Some(3), None]);
        assert_eq!(arena[a].version(), Some(4));
        assert_eq!(arena[b].version(), Some(1));
    }

    #[test]
    fn test_missing_rows_classification() {
        let t = TypeName::from("Order");
        assert!(matches!(missing_rows(&t, true, vec![1]), Error::ConcurrencyConflict { .. }));
        assert!(matches!(missing_rows(&t, false, vec![1]), Error::EntityNotFound { .. }));
    }
}
