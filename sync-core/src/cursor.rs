//! Account cursor admission and gap planning.
//!
//! The account cursor is the highest server version fully applied to the
//! replica. It never skips: every version in `1..=cursor` has been applied
//! exactly once. An inbound confirmed event is therefore either stale,
//! the next one, or the far end of a gap that must be fetched first.
//!
//! Gap fetching itself is I/O and lives in sync-client. This module plans the
//! pages and checks that the fetched events cover the gap completely.

use std::collections::BTreeMap;
use thiserror::Error;

use chatsync_types::{Event, Version};

/// An inclusive range of versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// First version in the range.
    pub start: Version,
    /// Last version in the range.
    pub end: Version,
}

impl VersionRange {
    /// Number of versions in the range.
    pub fn len(&self) -> u64 {
        (self.end.value() + 1).saturating_sub(self.start.value())
    }

    /// Whether the range holds no versions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `version` lies inside the range.
    pub fn contains(&self, version: Version) -> bool {
        version >= self.start && version <= self.end
    }
}

/// What to do with an inbound confirmed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already applied (redelivery); discard.
    Stale,
    /// Exactly `cursor + 1`; apply directly.
    Next,
    /// Versions in the range are missing and must be fetched and applied
    /// first. The range ends one below the inbound version.
    Gap(VersionRange),
}

/// Errors raised while checking a fetched gap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GapError {
    /// A version inside the gap was not returned by the remote log.
    #[error("gap {from}..={to} incomplete: missing version {missing} ({count} absent)")]
    Incomplete {
        /// First version of the gap.
        from: Version,
        /// Last version of the gap.
        to: Version,
        /// Lowest missing version.
        missing: Version,
        /// Number of missing versions.
        count: u64,
    },
    /// A version cannot be applied on top of the current cursor.
    #[error("cannot advance cursor {cursor} to {version}")]
    NotContiguous {
        /// Current cursor.
        cursor: Version,
        /// Version that was offered.
        version: Version,
    },
}

/// Classify `incoming` against the current cursor.
pub fn admit(cursor: Version, incoming: Version) -> Admission {
    if incoming <= cursor {
        Admission::Stale
    } else if incoming == cursor.next() {
        Admission::Next
    } else {
        Admission::Gap(VersionRange {
            start: cursor.next(),
            end: incoming.prev(),
        })
    }
}

/// One page request against the account log: versions strictly after
/// `after`, at most `limit` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Exclusive lower bound.
    pub after: Version,
    /// Maximum number of events.
    pub limit: u32,
}

/// Split `range` into pages of at most `page_size` versions.
///
/// Pages are independent so they can be fetched concurrently.
pub fn plan_pages(range: VersionRange, page_size: u32) -> Vec<PageRequest> {
    let page_size = page_size.max(1);
    let mut pages = Vec::new();
    let mut after = range.start.prev();
    while after < range.end {
        let remaining = range.end.value() - after.value();
        let limit = remaining.min(u64::from(page_size)) as u32;
        pages.push(PageRequest { after, limit });
        after = Version::new(after.value() + u64::from(limit));
    }
    pages
}

/// Check that `fetched` covers every version of `range` and return the events
/// in ascending version order.
///
/// Events outside the range and duplicate versions are dropped; the first
/// copy of a version wins.
pub fn assemble(
    range: VersionRange,
    fetched: impl IntoIterator<Item = Event>,
) -> Result<Vec<Event>, GapError> {
    let mut by_version = BTreeMap::new();
    for event in fetched {
        if let Some(version) = event.version {
            if range.contains(version) {
                by_version.entry(version).or_insert(event);
            }
        }
    }

    if by_version.len() as u64 != range.len() {
        let mut missing = range.start;
        for version in by_version.keys() {
            if *version != missing {
                break;
            }
            missing = missing.next();
        }
        return Err(GapError::Incomplete {
            from: range.start,
            to: range.end,
            missing,
            count: range.len() - by_version.len() as u64,
        });
    }

    Ok(by_version.into_values().collect())
}

/// The per-account cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountCursor {
    value: Version,
}

impl AccountCursor {
    /// Resume from a persisted value.
    pub fn at(value: Version) -> Self {
        Self { value }
    }

    /// Highest applied version.
    pub fn value(&self) -> Version {
        self.value
    }

    /// Classify an inbound version.
    pub fn admit(&self, incoming: Version) -> Admission {
        admit(self.value, incoming)
    }

    /// Advance by exactly one.
    ///
    /// `version` must be `cursor + 1`; anything else leaves the cursor
    /// unchanged and returns [`GapError::NotContiguous`].
    pub fn advance(&mut self, version: Version) -> Result<(), GapError> {
        if version != self.value.next() {
            return Err(GapError::NotContiguous {
                cursor: self.value,
                version,
            });
        }
        self.value = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_types::{ConversationId, EventBody, UserId};

    fn v(n: u64) -> Version {
        Version::new(n)
    }

    fn range(a: u64, b: u64) -> VersionRange {
        VersionRange {
            start: v(a),
            end: v(b),
        }
    }

    fn confirmed(n: u64) -> Event {
        let a = UserId::random();
        let conversation = ConversationId::new(a, UserId::random()).unwrap();
        Event::pending(
            conversation,
            a,
            EventBody::Text {
                content: format!("#{n}"),
            },
            n as i64,
        )
        .confirmed(v(n))
    }

    #[test]
    fn admit_classifies_versions() {
        assert_eq!(admit(v(5), v(3)), Admission::Stale);
        assert_eq!(admit(v(5), v(5)), Admission::Stale);
        assert_eq!(admit(v(5), v(6)), Admission::Next);
        assert_eq!(admit(v(5), v(9)), Admission::Gap(range(6, 8)));
    }

    #[test]
    fn first_event_on_fresh_cursor_is_next() {
        assert_eq!(admit(Version::zero(), v(1)), Admission::Next);
    }

    #[test]
    fn range_length() {
        assert_eq!(range(6, 8).len(), 3);
        assert_eq!(range(6, 6).len(), 1);
        assert!(range(7, 6).is_empty());
    }

    #[test]
    fn pages_cover_gap_without_overlap() {
        let pages = plan_pages(range(6, 50), 20);
        assert_eq!(
            pages,
            vec![
                PageRequest {
                    after: v(5),
                    limit: 20
                },
                PageRequest {
                    after: v(25),
                    limit: 20
                },
                PageRequest {
                    after: v(45),
                    limit: 5
                },
            ]
        );
    }

    #[test]
    fn small_gap_is_one_page() {
        let pages = plan_pages(range(6, 8), 20);
        assert_eq!(
            pages,
            vec![PageRequest {
                after: v(5),
                limit: 3
            }]
        );
    }

    #[test]
    fn zero_page_size_still_makes_progress() {
        assert_eq!(plan_pages(range(1, 3), 0).len(), 3);
    }

    #[test]
    fn assemble_sorts_and_filters() {
        let fetched = vec![confirmed(8), confirmed(6), confirmed(9), confirmed(7), confirmed(7)];
        let events = assemble(range(6, 8), fetched).unwrap();
        let versions: Vec<u64> = events
            .iter()
            .map(|e| e.version.unwrap().value())
            .collect();
        assert_eq!(versions, vec![6, 7, 8]);
    }

    #[test]
    fn assemble_reports_first_missing_version() {
        let err = assemble(range(6, 9), vec![confirmed(6), confirmed(8), confirmed(9)]).unwrap_err();
        assert_eq!(
            err,
            GapError::Incomplete {
                from: v(6),
                to: v(9),
                missing: v(7),
                count: 1
            }
        );
    }

    #[test]
    fn assemble_ignores_pending_events() {
        let mut pending = confirmed(6);
        pending.version = None;
        assert!(assemble(range(6, 6), vec![pending]).is_err());
    }

    #[test]
    fn cursor_advances_one_at_a_time() {
        let mut cursor = AccountCursor::at(v(5));
        cursor.advance(v(6)).unwrap();
        assert_eq!(cursor.value(), v(6));

        let err = cursor.advance(v(8)).unwrap_err();
        assert!(matches!(err, GapError::NotContiguous { .. }));
        assert_eq!(cursor.value(), v(6));

        assert!(cursor.advance(v(6)).is_err());
    }

    #[test]
    fn gap_then_apply_reaches_inbound_version() {
        let mut cursor = AccountCursor::at(v(5));
        let inbound = v(9);
        let Admission::Gap(gap) = cursor.admit(inbound) else {
            panic!("expected a gap");
        };
        let events = assemble(gap, (6..=8).map(confirmed)).unwrap();
        for event in &events {
            cursor.advance(event.version.unwrap()).unwrap();
        }
        cursor.advance(inbound).unwrap();
        assert_eq!(cursor.value(), v(9));
    }
}
