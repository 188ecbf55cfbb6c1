//! Windowed grouped-count queries over audit records

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;

use super::record::AuditRecord;

/// Column an audit query can group by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    /// `ip_address`
    Ip,
    /// `user_id`
    UserId,
    /// `user_email`
    UserEmail,
    /// `action`
    Action,
}

impl Dimension {
    /// Column name in the persisted row
    pub fn column(&self) -> &'static str {
        match self {
            Self::Ip => "ip_address",
            Self::UserId => "user_id",
            Self::UserEmail => "user_email",
            Self::Action => "action",
        }
    }

    fn value_of(&self, record: &AuditRecord) -> Option<String> {
        match self {
            Self::Ip => Some(record.ip_address.clone()),
            Self::UserId => record.user_id.map(|id| id.to_string()),
            Self::UserEmail => record.user_email.clone(),
            Self::Action => Some(record.action.clone()),
        }
    }
}

/// What is counted per group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of matching records (`attempts`)
    Count,
    /// Number of distinct client IPs (`unique_ips`)
    DistinctIps,
}

impl Aggregate {
    /// Label used for the aggregate in evidence rows
    pub fn label(&self) -> &'static str {
        match self {
            Self::Count => "attempts",
            Self::DistinctIps => "unique_ips",
        }
    }
}

/// A grouped count over a time window with a `count >= min` filter.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupQuery {
    /// Only records with this action
    pub action: Option<String>,
    /// Skip records with no acting account
    pub require_actor: bool,
    /// Grouping columns, one or two
    pub group_by: Vec<Dimension>,
    /// Aggregate per group
    pub aggregate: Aggregate,
    /// Minimum aggregate for a group to be returned
    pub min: u64,
    /// Look-back window
    pub window: Duration,
}

impl GroupQuery {
    /// Count records grouped by the given dimensions over the last hour
    pub fn group_by(dimensions: &[Dimension]) -> Self {
        Self {
            action: None,
            require_actor: false,
            group_by: dimensions.to_vec(),
            aggregate: Aggregate::Count,
            min: 1,
            window: Duration::from_secs(3600),
        }
    }

    /// Restrict to one action
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Skip records without an acting account
    pub fn require_actor(mut self) -> Self {
        self.require_actor = true;
        self
    }

    /// Change the aggregate
    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// Minimum aggregate value (`having count >= min`)
    pub fn min(mut self, min: u64) -> Self {
        self.min = min;
        self
    }

    /// Look-back window
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        if self.require_actor && record.user_id.is_none() {
            return false;
        }
        match &self.action {
            Some(action) => &record.action == action,
            None => true,
        }
    }

    /// Evaluate against records already restricted to the window
    pub fn evaluate(&self, records: &[AuditRecord]) -> Vec<GroupRow> {
        let mut groups: BTreeMap<Vec<Option<String>>, (u64, BTreeSet<String>)> = BTreeMap::new();

        for record in records.iter().filter(|r| self.matches(r)) {
            let key = self.group_by.iter().map(|d| d.value_of(record)).collect();
            let entry = groups.entry(key).or_default();
            entry.0 += 1;
            entry.1.insert(record.ip_address.clone());
        }

        groups
            .into_iter()
            .map(|(key, (count, ips))| GroupRow {
                key: self.group_by.iter().copied().zip(key).collect(),
                value: match self.aggregate {
                    Aggregate::Count => count,
                    Aggregate::DistinctIps => ips.len() as u64,
                },
                aggregate: self.aggregate,
            })
            .filter(|row| row.value >= self.min)
            .collect()
    }
}

/// One group that passed a [`GroupQuery`]
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// Grouping column values, in query order
    pub key: Vec<(Dimension, Option<String>)>,
    /// Aggregate value
    pub value: u64,
    /// Aggregate that produced `value`
    pub aggregate: Aggregate,
}

impl GroupRow {
    /// Value of a grouping column
    pub fn get(&self, dimension: Dimension) -> Option<&str> {
        self.key
            .iter()
            .find(|(d, _)| *d == dimension)
            .and_then(|(_, v)| v.as_deref())
    }
}

impl Serialize for GroupRow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.key.len() + 1))?;
        for (dimension, value) in &self.key {
            map.serialize_entry(dimension.column(), value)?;
        }
        map.serialize_entry(self.aggregate.label(), &self.value)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{Actor, AuditEvent, RequestContext};
    use chrono::Utc;

    fn record(action: &str, ip: &str, actor: Option<Actor>) -> AuditRecord {
        let mut event = AuditEvent::new(action);
        if let Some(actor) = actor {
            event = event.actor(&actor);
        }
        event.into_record(&RequestContext::new(ip, ""), Utc::now())
    }

    #[test]
    fn test_count_by_ip_with_threshold() {
        let mut records: Vec<_> = (0..5).map(|_| record("auth.login_failed", "1.2.3.4", None)).collect();
        records.extend((0..2).map(|_| record("auth.login_failed", "5.6.7.8", None)));
        records.push(record("auth.login_success", "1.2.3.4", None));

        let rows = GroupQuery::group_by(&[Dimension::Ip])
            .action("auth.login_failed")
            .min(5)
            .evaluate(&records);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(Dimension::Ip), Some("1.2.3.4"));
        assert_eq!(rows[0].value, 5);
    }

    #[test]
    fn test_distinct_ips_per_user() {
        let alice = Actor::user(1, "alice@example.com");
        let records = vec![
            record("view", "1.1.1.1", Some(alice.clone())),
            record("view", "2.2.2.2", Some(alice.clone())),
            record("view", "2.2.2.2", Some(alice.clone())),
            record("view", "3.3.3.3", Some(alice)),
            record("view", "4.4.4.4", None),
        ];

        let rows = GroupQuery::group_by(&[Dimension::UserId, Dimension::UserEmail])
            .require_actor()
            .aggregate(Aggregate::DistinctIps)
            .min(3)
            .evaluate(&records);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 3);
        assert_eq!(rows[0].get(Dimension::UserEmail), Some("alice@example.com"));
    }

    #[test]
    fn test_null_dimension_forms_its_own_group() {
        let records: Vec<_> = (0..3).map(|_| record("access_denied", "9.9.9.9", None)).collect();
        let rows = GroupQuery::group_by(&[Dimension::UserId, Dimension::Ip])
            .action("access_denied")
            .min(3)
            .evaluate(&records);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(Dimension::UserId), None);
    }

    #[test]
    fn test_row_serializes_with_column_names() {
        let records: Vec<_> = (0..2).map(|_| record("x", "1.2.3.4", None)).collect();
        let rows = GroupQuery::group_by(&[Dimension::Ip]).evaluate(&records);
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json, serde_json::json!({"ip_address": "1.2.3.4", "attempts": 2}));
    }
}
