use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::record::MessageId;

/// Kind of anchor the backend can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    /// First message on a given day
    Day,
    /// First message in the conversation
    First,
}

impl AnchorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorKind::Day => "day",
            AnchorKind::First => "first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub anchor_id: MessageId,
    pub create_time: i64,
}

/// Per-day message counts for one month, keyed by `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyCounts {
    pub counts: BTreeMap<String, u64>,
    pub max: u64,
    pub total: u64,
}

impl DailyCounts {
    pub fn count_for(&self, date: &str) -> u64 {
        self.counts.get(date).copied().unwrap_or(0)
    }

    /// Heat level in `0..=4` relative to the busiest day of the month.
    pub fn heat_level(&self, date: &str) -> u8 {
        let count = self.count_for(date);
        if count == 0 || self.max == 0 {
            return 0;
        }
        let ratio = count as f64 / self.max as f64;
        ((ratio * 4.0).ceil() as u8).clamp(1, 4)
    }
}
