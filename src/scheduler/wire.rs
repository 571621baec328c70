use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Every successful scheduler response is wrapped as `{"result": ...}`.
#[derive(Deserialize, Debug)]
pub struct Envelope<T> {
    pub result: T,
}

// sqlite backends hand out integers, mongo backends hand out object id strings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum JobId {
    Int(i64),
    Text(String),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Int(i) => write!(f, "{}", i),
            JobId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Waiting,
    Running,
    Failed,
    Complete,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Complete => "complete",
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

/// A timestamp as the scheduler sent it. Kept raw so an unparseable value is
/// still shown rather than dropped.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Timestamp(pub String);

impl Timestamp {
    pub fn parsed(&self) -> Option<DateTime<Utc>> {
        let raw = self.0.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t.with_timezone(&Utc));
        }
        if let Ok(t) = DateTime::parse_from_rfc2822(raw) {
            return Some(t.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn local_display(&self) -> String {
        match self.parsed() {
            Some(t) => t.with_timezone(&Local).format("%b %e, %Y %l:%M %p").to_string(),
            None => self.0.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerTask {
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub soft_timeout: u64,
    #[serde(default)]
    pub hard_timeout: u64,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub success: Option<bool>,
}

impl SchedulerTask {
    pub fn status(&self) -> RunStatus {
        match (&self.started_at, &self.completed_at) {
            (None, _) => RunStatus::Waiting,
            (Some(_), None) => RunStatus::Running,
            (Some(_), Some(_)) if self.success == Some(true) => RunStatus::Complete,
            (Some(_), Some(_)) => RunStatus::Failed,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerJob {
    pub name: String,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub tasks: Vec<SchedulerTask>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub next_run: Option<Timestamp>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Row of `GET /api/jobs`. Only the fields the console shows are kept.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub name: String,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub next_run: Option<Timestamp>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteTarget {
    pub hostname: String,
    pub key: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub target: Option<RemoteTarget>,
}

/// One editable task field, as sent to `edit_task`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum TaskField {
    Name(String),
    Command(String),
    SoftTimeout(u64),
    HardTimeout(u64),
    Hostname(Option<String>),
}

impl TaskField {
    pub fn form_pair(&self) -> (&'static str, String) {
        match self {
            TaskField::Name(v) => ("name", v.clone()),
            TaskField::Command(v) => ("command", v.clone()),
            TaskField::SoftTimeout(v) => ("soft_timeout", v.to_string()),
            TaskField::HardTimeout(v) => ("hard_timeout", v.to_string()),
            TaskField::Hostname(v) => ("hostname", v.clone().unwrap_or_default()),
        }
    }

    /// True when writing this field would leave `task` as it is.
    pub fn is_current(&self, task: &SchedulerTask) -> bool {
        match self {
            TaskField::Name(v) => task.name == *v,
            TaskField::Command(v) => task.command == *v,
            TaskField::SoftTimeout(v) => task.soft_timeout == *v,
            TaskField::HardTimeout(v) => task.hard_timeout == *v,
            TaskField::Hostname(v) => task.hostname == *v,
        }
    }

    pub fn apply(&self, task: &mut SchedulerTask) {
        match self {
            TaskField::Name(v) => task.name = v.clone(),
            TaskField::Command(v) => task.command = v.clone(),
            TaskField::SoftTimeout(v) => task.soft_timeout = *v,
            TaskField::HardTimeout(v) => task.hard_timeout = *v,
            TaskField::Hostname(v) => task.hostname = v.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogEnd {
    Head,
    Tail,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobCommand {
    Start,
    Retry,
    Terminate,
    Kill,
}

impl JobCommand {
    pub fn path(&self) -> &'static str {
        match *self {
            Self::Start => "start_job",
            Self::Retry => "retry_job",
            Self::Terminate => "terminate_all_tasks",
            Self::Kill => "kill_all_tasks",
        }
    }

    /// Whether the scheduler accepts this command for a job in `status`.
    pub fn allowed_in(&self, status: RunStatus) -> bool {
        match (self, status) {
            (Self::Terminate | Self::Kill, RunStatus::Waiting | RunStatus::Failed) => false,
            (Self::Start | Self::Retry, RunStatus::Running) => false,
            _ => true,
        }
    }
}
