use crate::schema::{CostBreakdownSnapshot, SnapshotItem};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Snapshot items keyed by version number.
pub type SnapshotHistory = BTreeMap<u32, Vec<SnapshotItem>>;

pub fn history_from_snapshots(snapshots: &[CostBreakdownSnapshot]) -> SnapshotHistory {
    snapshots
        .iter()
        .map(|s| (s.version_number, s.items.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionChangeSummary {
    pub total_change: f64,
    pub change_percent: f64,
    pub items_changed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Unchanged,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    pub id: String,
    pub previous: Option<f64>,
    pub current: Option<f64>,
    pub delta: f64,
    pub kind: ChangeKind,
}

/// Compares version `version_number` against the version before it.
///
/// Items are matched by id and valued at their forecast (or budget when no
/// forecast exists). Items only present in the newer version count in full.
pub fn calculate_version_changes(
    version_number: u32,
    history: &SnapshotHistory,
) -> VersionChangeSummary {
    let Some((previous, current)) = adjacent_versions(version_number, history) else {
        return VersionChangeSummary::default();
    };

    let previous_by_id = index_by_id(previous);
    let mut summary = VersionChangeSummary::default();

    for item in current {
        let delta = match previous_by_id.get(item.id.as_str()) {
            Some(prev) => item.effective_cost() - prev.effective_cost(),
            None => item.effective_cost(),
        };
        let is_new = !previous_by_id.contains_key(item.id.as_str());

        if delta != 0.0 || is_new {
            summary.total_change += delta;
            summary.items_changed += 1;
        }
    }

    let previous_total: f64 = previous.iter().map(SnapshotItem::effective_cost).sum();
    summary.change_percent = if previous_total > 0.0 {
        summary.total_change / previous_total * 100.0
    } else {
        0.0
    };

    summary
}

/// Per-item deltas between version `version_number` and its predecessor,
/// including items that were dropped. Current items come first, in order.
pub fn item_changes(version_number: u32, history: &SnapshotHistory) -> Vec<ItemChange> {
    let Some((previous, current)) = adjacent_versions(version_number, history) else {
        return Vec::new();
    };

    let previous_by_id = index_by_id(previous);
    let current_ids: HashSet<&str> = current.iter().map(|i| i.id.as_str()).collect();

    let mut changes: Vec<ItemChange> = current
        .iter()
        .map(|item| {
            let now = item.effective_cost();
            match previous_by_id.get(item.id.as_str()) {
                Some(prev) => {
                    let before = prev.effective_cost();
                    let delta = now - before;
                    ItemChange {
                        id: item.id.clone(),
                        previous: Some(before),
                        current: Some(now),
                        delta,
                        kind: if delta != 0.0 {
                            ChangeKind::Modified
                        } else {
                            ChangeKind::Unchanged
                        },
                    }
                }
                None => ItemChange {
                    id: item.id.clone(),
                    previous: None,
                    current: Some(now),
                    delta: now,
                    kind: ChangeKind::Added,
                },
            }
        })
        .collect();

    changes.extend(
        previous
            .iter()
            .filter(|item| !current_ids.contains(item.id.as_str()))
            .map(|item| ItemChange {
                id: item.id.clone(),
                previous: Some(item.effective_cost()),
                current: None,
                delta: -item.effective_cost(),
                kind: ChangeKind::Removed,
            }),
    );

    changes
}

fn adjacent_versions(
    version_number: u32,
    history: &SnapshotHistory,
) -> Option<(&[SnapshotItem], &[SnapshotItem])> {
    if version_number == 0 {
        return None;
    }
    let current = history.get(&version_number)?;
    let previous = history.get(&(version_number - 1))?;
    Some((previous.as_slice(), current.as_slice()))
}

fn index_by_id(items: &[SnapshotItem]) -> HashMap<&str, &SnapshotItem> {
    let mut by_id = HashMap::with_capacity(items.len());
    for item in items {
        by_id.entry(item.id.as_str()).or_insert(item);
    }
    by_id
}

/// Age bucket of a snapshot, for labelling version lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStatus {
    New,
    Recent,
    Current,
    Historical,
}

impl VersionStatus {
    /// `< 1 day` New, `< 7 days` Recent, `< 30 days` Current, otherwise
    /// Historical. Each threshold belongs to the older tier.
    pub fn classify(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = now - created_at;
        if age < Duration::days(1) {
            VersionStatus::New
        } else if age < Duration::days(7) {
            VersionStatus::Recent
        } else if age < Duration::days(30) {
            VersionStatus::Current
        } else {
            VersionStatus::Historical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::New => "New",
            VersionStatus::Recent => "Recent",
            VersionStatus::Current => "Current",
            VersionStatus::Historical => "Historical",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
