use super::base::{
    ensure_matches, SnapshotView, VALIDATION_REGEX_NOT_BLANK, VALIDATION_REGEX_SECONDS,
};
use super::error::ConsoleError;
use super::graph::GraphEditor;
use crate::{
    format::Formatter,
    job_model::JobModel,
    pending::{EditKey, PendingEdits},
    scheduler::{
        wire::{SchedulerTask, TaskField},
        SchedulerApi,
    },
};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    #[default]
    Results,
    Commands,
    Timeouts,
    RemoteTarget,
}

impl ViewMode {
    pub fn columns(&self) -> &'static [Column] {
        match *self {
            Self::Results => &[
                Column::Name,
                Column::Status,
                Column::StartedAt,
                Column::CompletedAt,
            ],
            Self::Commands => &[Column::Name, Column::Command],
            Self::Timeouts => &[Column::Name, Column::SoftTimeout, Column::HardTimeout],
            Self::RemoteTarget => &[Column::Name, Column::Hostname],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Name,
    Status,
    StartedAt,
    CompletedAt,
    Command,
    SoftTimeout,
    HardTimeout,
    Hostname,
}

impl Column {
    pub fn attr(&self) -> &'static str {
        match *self {
            Self::Name => "name",
            Self::Status => "status",
            Self::StartedAt => "started_at",
            Self::CompletedAt => "completed_at",
            Self::Command => "command",
            Self::SoftTimeout => "soft_timeout",
            Self::HardTimeout => "hard_timeout",
            Self::Hostname => "hostname",
        }
    }

    pub fn label(&self) -> &'static str {
        match *self {
            Self::Name => "Task",
            Self::Status => "Status",
            Self::StartedAt => "Started",
            Self::CompletedAt => "Completed",
            Self::Command => "Command",
            Self::SoftTimeout => "Soft Timeout",
            Self::HardTimeout => "Hard Timeout",
            Self::Hostname => "Remote Target",
        }
    }

    fn formatter(&self) -> Formatter {
        match *self {
            Self::Status => Formatter::Title,
            Self::StartedAt | Self::CompletedAt => Formatter::Datetime,
            _ => Formatter::Text,
        }
    }

    fn class_formatter(&self) -> Option<Formatter> {
        match *self {
            Self::Status => Some(Formatter::StatusClass),
            _ => None,
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(
            *self,
            Self::Name | Self::Command | Self::SoftTimeout | Self::HardTimeout | Self::Hostname
        )
    }

    /// The unformatted value, also what an edit input starts with.
    fn raw(&self, task: &SchedulerTask) -> String {
        match *self {
            Self::Name => task.name.clone(),
            Self::Status => task.status().as_str().to_string(),
            Self::StartedAt => task.started_at.as_ref().map(|t| t.0.clone()).unwrap_or_default(),
            Self::CompletedAt => task
                .completed_at
                .as_ref()
                .map(|t| t.0.clone())
                .unwrap_or_default(),
            Self::Command => task.command.clone(),
            Self::SoftTimeout => task.soft_timeout.to_string(),
            Self::HardTimeout => task.hard_timeout.to_string(),
            Self::Hostname => task.hostname.clone().unwrap_or_default(),
        }
    }

    fn cell(&self, task: &SchedulerTask) -> Cell {
        let raw = self.raw(task);
        Cell {
            attr: self.attr(),
            text: self.formatter().apply(&raw),
            class: self.class_formatter().map(|f| f.apply(&raw)),
        }
    }

    fn parse(&self, input: &str) -> Result<TaskField, ConsoleError> {
        match *self {
            Self::Name => {
                ensure_matches(VALIDATION_REGEX_NOT_BLANK, input, "task name")?;
                Ok(TaskField::Name(input.trim().to_string()))
            }
            Self::Command => {
                ensure_matches(VALIDATION_REGEX_NOT_BLANK, input, "command")?;
                Ok(TaskField::Command(input.trim().to_string()))
            }
            Self::SoftTimeout => Ok(TaskField::SoftTimeout(parse_seconds(input, "soft timeout")?)),
            Self::HardTimeout => Ok(TaskField::HardTimeout(parse_seconds(input, "hard timeout")?)),
            Self::Hostname => {
                let host = input.trim();
                Ok(TaskField::Hostname(
                    (!host.is_empty()).then(|| host.to_string()),
                ))
            }
            _ => Err(ConsoleError::Validation(format!(
                "column '{}' is read-only",
                self.attr()
            ))),
        }
    }
}

fn parse_seconds(input: &str, what: &str) -> Result<u64, ConsoleError> {
    let input = input.trim();
    ensure_matches(VALIDATION_REGEX_SECONDS, input, what)?;
    input
        .parse()
        .map_err(|e| ConsoleError::Validation(format!("Invalid {} '{}': {}", what, input, e)))
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Cell {
    pub attr: &'static str,
    pub text: String,
    pub class: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub cells: Vec<Cell>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EditSession {
    pub task: String,
    pub column: Column,
    pub original: String,
    pub input: String,
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ColumnView {
    pub attr: &'static str,
    pub label: &'static str,
    pub editable: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct TableView {
    pub mode: ViewMode,
    pub columns: Vec<ColumnView>,
    pub rows: Vec<Row>,
    pub edit: Option<EditSession>,
}

#[derive(Debug, Default)]
struct TableState {
    mode: ViewMode,
    built: bool,
    rows: Vec<Row>,
    edit: Option<EditSession>,
}

impl TableState {
    fn row_mut(&mut self, key: &str) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.key == key)
    }

    fn build_row(&self, task: &SchedulerTask) -> Row {
        Row {
            key: task.name.clone(),
            cells: self.mode.columns().iter().map(|c| c.cell(task)).collect(),
        }
    }

    /// Rewrites the cells of `key` that differ from `task`, leaving the one
    /// under edit alone.
    fn patch_row(&mut self, key: &str, task: &SchedulerTask) -> usize {
        let columns = self.mode.columns();
        let editing: Option<&'static str> = self
            .edit
            .as_ref()
            .filter(|e| e.task == key)
            .map(|e| e.column.attr());
        let Some(row) = self.row_mut(key) else {
            return 0;
        };

        let mut changes = 0;
        for (cell, column) in row.cells.iter_mut().zip(columns) {
            if editing == Some(column.attr()) {
                continue;
            }
            let fresh = column.cell(task);
            if *cell != fresh {
                *cell = fresh;
                changes += 1;
            }
        }
        changes
    }
}

/// Table view of the job's tasks with inline editing of single fields.
pub struct TaskTableSync {
    api: Arc<dyn SchedulerApi>,
    model: Arc<JobModel>,
    graph: Arc<GraphEditor>,
    pending: Arc<PendingEdits>,
    state: Mutex<TableState>,
}

impl TaskTableSync {
    pub fn new(
        api: Arc<dyn SchedulerApi>,
        model: Arc<JobModel>,
        graph: Arc<GraphEditor>,
        pending: Arc<PendingEdits>,
    ) -> Self {
        TaskTableSync {
            api,
            model,
            graph,
            pending,
            state: Mutex::new(TableState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn view(&self) -> TableView {
        let st = self.lock();
        TableView {
            mode: st.mode,
            columns: st
                .mode
                .columns()
                .iter()
                .map(|c| ColumnView {
                    attr: c.attr(),
                    label: c.label(),
                    editable: c.is_editable(),
                })
                .collect(),
            rows: st.rows.clone(),
            edit: st.edit.clone(),
        }
    }

    #[cfg(test)]
    pub fn row(&self, key: &str) -> Option<Row> {
        self.lock().rows.iter().find(|r| r.key == key).cloned()
    }

    /// Switches columns. The table is rebuilt from the current snapshot and
    /// any open edit is dropped.
    pub fn set_mode(&self, mode: ViewMode) {
        let mut st = self.lock();
        st.mode = mode;
        st.edit = None;
        st.rows.clear();
        st.built = false;
        if let Some(job) = self.model.snapshot() {
            let rows: Vec<Row> = job.tasks.iter().map(|t| st.build_row(t)).collect();
            st.rows = rows;
            st.built = true;
        }
        debug!(?mode, rows = st.rows.len(), "rebuilt task table");
    }

    /// Opens an input on a cell, pre-filled with the current value.
    pub fn begin_edit(&self, task_name: &str, column: Column) -> Result<EditSession, ConsoleError> {
        let mut st = self.lock();
        if !st.mode.columns().contains(&column) || !column.is_editable() {
            return Err(ConsoleError::Validation(format!(
                "column '{}' cannot be edited in this view",
                column.attr()
            )));
        }
        if !st.rows.iter().any(|r| r.key == task_name) {
            return Err(ConsoleError::Validation(format!("no task named '{}'", task_name)));
        }
        let task = self
            .model
            .task(task_name)
            .ok_or_else(|| ConsoleError::Validation(format!("no task named '{}'", task_name)))?;

        let original = column.raw(&task);
        let session = EditSession {
            task: task_name.to_string(),
            column,
            input: original.clone(),
            original,
            error: None,
        };
        st.edit = Some(session.clone());
        Ok(session)
    }

    pub fn set_input(&self, input: &str) -> Result<(), ConsoleError> {
        match self.lock().edit.as_mut() {
            Some(session) => {
                session.input = input.to_string();
                session.error = None;
                Ok(())
            }
            None => Err(ConsoleError::Validation("no cell is being edited".to_string())),
        }
    }

    pub fn cancel_edit(&self) {
        self.lock().edit = None;
    }

    fn fail_inline(&self, err: ConsoleError) -> ConsoleError {
        if let Some(session) = self.lock().edit.as_mut() {
            session.error = Some(err.to_string());
        }
        err
    }

    /// Persists the open edit. Returns false when the value did not change
    /// and nothing was sent.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn commit_edit(&self) -> Result<bool, ConsoleError> {
        let session = self
            .lock()
            .edit
            .clone()
            .ok_or_else(|| ConsoleError::Validation("no cell is being edited".to_string()))?;

        let field = session
            .column
            .parse(&session.input)
            .map_err(|e| self.fail_inline(e))?;
        let current = self.model.task(&session.task).ok_or_else(|| {
            self.fail_inline(ConsoleError::Validation(format!(
                "no task named '{}'",
                session.task
            )))
        })?;
        if field.is_current(&current) {
            self.cancel_edit();
            return Ok(false);
        }

        let mut keys = vec![EditKey::Task(session.task.clone())];
        if let TaskField::Name(new_name) = &field {
            if self.model.task(new_name).is_some() {
                return Err(self.fail_inline(ConsoleError::Validation(format!(
                    "a task named '{}' already exists",
                    new_name
                ))));
            }
            keys.push(EditKey::Task(new_name.clone()));
        }
        let _guard = self
            .pending
            .claim(keys)
            .map_err(|held| ConsoleError::Busy(held.label()))?;

        let job_name = self.model.job_name();
        self.api
            .edit_task(&job_name, &session.task, &field)
            .await
            .inspect_err(|e| error!(?e, task = %session.task, "saving task field failed"))?;

        self.model.patch_task(&session.task, &field);

        let key = match &field {
            TaskField::Name(new_name) => new_name.clone(),
            _ => session.task.clone(),
        };
        {
            let mut st = self.lock();
            st.edit = None;
            if key != session.task {
                if let Some(row) = st.row_mut(&session.task) {
                    row.key = key.clone();
                }
            }
            if let Some(task) = self.model.task(&key) {
                st.patch_row(&key, &task);
            }
        }
        if key != session.task {
            self.graph.rename_node(&session.task, &key);
        }

        info!(task = %key, field = session.column.attr(), "task field saved");
        Ok(true)
    }
}

impl SnapshotView for TaskTableSync {
    #[tracing::instrument(level = "debug", name = "table_reconcile", skip(self, model))]
    fn reconcile(&self, model: &JobModel) -> Result<usize, ConsoleError> {
        self.validate(model)?;
        let Some(job) = model.snapshot() else {
            return Ok(0);
        };

        let mut st = self.lock();
        if !st.built {
            let rows: Vec<Row> = job.tasks.iter().map(|t| st.build_row(t)).collect();
            st.rows = rows;
            st.built = true;
            return Ok(st.rows.len());
        }

        let mut changes = 0;
        for task in &job.tasks {
            if st.rows.iter().any(|r| r.key == task.name) {
                changes += st.patch_row(&task.name, task);
            } else if !self.pending.task_pending(&task.name) {
                let row = st.build_row(task);
                st.rows.push(row);
                changes += 1;
            }
        }

        let names: HashSet<&str> = job.tasks.iter().map(|t| t.name.as_str()).collect();
        let editing = st.edit.as_ref().map(|e| e.task.clone());
        let before = st.rows.len();
        let kept: Vec<Row> = st
            .rows
            .iter()
            .filter(|r| {
                names.contains(r.key.as_str())
                    || editing.as_deref() == Some(r.key.as_str())
                    || self.pending.task_pending(&r.key)
            })
            .cloned()
            .collect();
        st.rows = kept;
        changes += before - st.rows.len();

        Ok(changes)
    }
}
