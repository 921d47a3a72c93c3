use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl ExportStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Done | ExportStatus::Error | ExportStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportProgress {
    pub current: u64,
    pub total: u64,
    pub current_conversation: Option<String>,
    pub phase: Option<String>,
}

impl ExportProgress {
    /// Completion ratio in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64).min(1.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub export_id: String,
    pub status: ExportStatus,
    #[serde(default)]
    pub progress: ExportProgress,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Html,
    Json,
    Txt,
    Csv,
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(CoreError::validation(format!(
                "date range starts after it ends ({start} > {end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse `YYYY-MM-DD` bounds as typed into a custom range picker.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| CoreError::validation(format!("invalid date: {s:?}")))
        };
        Self::new(parse(start)?, parse(end)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportParams {
    pub account: String,
    pub conversation_ids: Vec<String>,
    pub format: ExportFormat,
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub include_media: bool,
}

impl ExportParams {
    pub fn new(account: impl Into<String>, conversation_ids: Vec<String>) -> Self {
        Self {
            account: account.into(),
            conversation_ids,
            format: ExportFormat::default(),
            date_range: None,
            include_media: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            return Err(CoreError::validation("no account selected"));
        }
        if self.conversation_ids.is_empty() {
            return Err(CoreError::validation("no conversations selected for export"));
        }
        if let Some(range) = &self.date_range {
            if range.start > range.end {
                return Err(CoreError::validation("date range starts after it ends"));
            }
        }
        Ok(())
    }
}
