use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_TITLE_LEN: usize = 500;
pub const MIN_PRIORITY: i32 = 0;
pub const MAX_PRIORITY: i32 = 4;

/// Marker in generated ids of ephemeral issues, e.g. `bd-wisp-a1b2`.
pub const WISP_ID_MARKER: &str = "-wisp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Blocked,
    Deferred,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Blocked => "blocked",
            Status::Deferred => "deferred",
            Status::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "blocked" => Ok(Status::Blocked),
            "deferred" => Ok(Status::Deferred),
            "closed" => Ok(Status::Closed),
            other => Err(Error::Validation(format!("invalid status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Feature,
    #[default]
    Task,
    Epic,
    Chore,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Bug => "bug",
            IssueType::Feature => "feature",
            IssueType::Task => "task",
            IssueType::Epic => "epic",
            IssueType::Chore => "chore",
        }
    }
}

impl FromStr for IssueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bug" => Ok(IssueType::Bug),
            "feature" => Ok(IssueType::Feature),
            "task" => Ok(IssueType::Task),
            "epic" => Ok(IssueType::Epic),
            "chore" => Ok(IssueType::Chore),
            other => Err(Error::Validation(format!("invalid issue type '{}'", other))),
        }
    }
}

/// An issue record. The same shape is stored in the durable and wisp tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub design: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub notes: String,
    pub status: Status,
    pub priority: i32,
    pub issue_type: IssueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub compaction_level: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<i64>,
    #[serde(default)]
    pub ephemeral: bool,
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Task,
            assignee: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            compaction_level: 0,
            compacted_at: None,
            compacted_at_commit: None,
            original_size: None,
            ephemeral: false,
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn closed_at(mut self, at: DateTime<Utc>) -> Self {
        self.status = Status::Closed;
        self.closed_at = Some(at);
        self
    }

    /// Field checks applied to every insert, promotions included.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("id is required".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title is required".to_string()));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(Error::Validation(format!(
                "title must be {} characters or less (got {})",
                MAX_TITLE_LEN,
                self.title.chars().count()
            )));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(Error::Validation(format!(
                "priority must be between {} and {} (got {})",
                MIN_PRIORITY, MAX_PRIORITY, self.priority
            )));
        }
        match (self.status, self.closed_at) {
            (Status::Closed, None) => Err(Error::Validation(
                "closed issues must have closed_at set".to_string(),
            )),
            (status, Some(_)) if status != Status::Closed => Err(Error::Validation(format!(
                "non-closed issues cannot have closed_at (status {})",
                status
            ))),
            _ => Ok(()),
        }?;
        if !(0..=2).contains(&self.compaction_level) {
            return Err(Error::Validation(format!(
                "compaction_level must be 0, 1 or 2 (got {})",
                self.compaction_level
            )));
        }
        Ok(())
    }

    /// Bytes of free-text content, the part compaction shrinks.
    pub fn content_size(&self) -> i64 {
        (self.description.len()
            + self.design.len()
            + self.acceptance_criteria.len()
            + self.notes.len()) as i64
    }
}

/// Whether an id follows the generated wisp naming convention.
///
/// Only a routing hint: the wisp table decides what is ephemeral.
pub fn looks_like_wisp(id: &str) -> bool {
    id.contains(WISP_ID_MARKER)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,
    pub depends_on_id: String,
    pub dep_type: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub issue_id: String,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub issue_id: String,
    pub event_type: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
