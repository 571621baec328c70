use crate::{
    config::TributaryConfig,
    controller::{
        base::{ensure_matches, SnapshotView, VALIDATION_REGEX_CRON, VALIDATION_REGEX_NOT_BLANK},
        graph::LinkCandidate,
        ConsoleError, GraphEditor, TaskTableSync,
    },
    job_model::{JobModel, RefreshOutcome},
    notice::NoticeBoard,
    pending::{EditKey, PendingEdits},
    refresher::{spawn_driver, DriverHandle},
    scheduler::{
        wire::{JobCommand, JobSummary, LogEnd, LogStream, NewTask, RemoteTarget},
        SchedulerApi,
    },
};

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info};

struct Drivers {
    poller: DriverHandle,
    animator: DriverHandle,
}

/// Job-level controller. Owns the views, the notice board and the loops that
/// keep them fresh.
pub struct Console {
    api: Arc<dyn SchedulerApi>,
    model: Arc<JobModel>,
    graph: Arc<GraphEditor>,
    table: Arc<TaskTableSync>,
    pending: Arc<PendingEdits>,
    notices: Arc<NoticeBoard>,
    drivers: Mutex<Option<Drivers>>,
}

impl Console {
    pub fn new(api: Arc<dyn SchedulerApi>, conf: &TributaryConfig) -> Self {
        let model = Arc::new(JobModel::new(
            api.clone(),
            &conf.job_name,
            conf.lost_contact_threshold,
            conf.lost_contact_cooldown(),
        ));
        let pending = PendingEdits::new();
        let graph = Arc::new(GraphEditor::new(
            api.clone(),
            model.clone(),
            pending.clone(),
            conf.layout.clone(),
        ));
        let table = Arc::new(TaskTableSync::new(
            api.clone(),
            model.clone(),
            graph.clone(),
            pending.clone(),
        ));

        Console {
            api,
            model,
            graph,
            table,
            pending,
            notices: Arc::new(NoticeBoard::new()),
            drivers: Mutex::new(None),
        }
    }

    pub fn model(&self) -> &JobModel {
        &self.model
    }

    pub fn graph(&self) -> &GraphEditor {
        &self.graph
    }

    pub fn table(&self) -> &TaskTableSync {
        &self.table
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    /// Loads the snapshot and starts polling and layout animation.
    pub async fn start(self: &Arc<Self>, poll_interval: Duration, frame_interval: Duration) {
        if let Err(e) = self.load().await {
            // the poller keeps trying
            self.notices.failure(&e);
        }

        let weak = Arc::downgrade(self);
        let poller = spawn_driver(
            "poller",
            poll_interval,
            Some(self.notices.blocking()),
            move || poll_once(weak.clone()),
        );

        let graph = Arc::downgrade(&self.graph);
        let animator = spawn_driver("animator", frame_interval, None, move || {
            let graph = graph.clone();
            async move {
                if let Some(graph) = graph.upgrade() {
                    graph.step_layout();
                }
            }
        });

        let old = self
            .drivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Drivers { poller, animator });
        if let Some(old) = old {
            old.poller.shutdown().await;
            old.animator.shutdown().await;
        }
    }

    pub async fn shutdown(&self) {
        let drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(drivers) = drivers {
            drivers.poller.shutdown().await;
            drivers.animator.shutdown().await;
        }
    }

    pub fn pause_polling(&self) {
        if let Some(d) = self.drivers.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            d.poller.pause();
        }
    }

    pub fn resume_polling(&self) {
        if let Some(d) = self.drivers.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            d.poller.resume();
        }
    }

    pub fn is_polling_paused(&self) -> bool {
        self.drivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|d| d.poller.is_paused())
            .unwrap_or(false)
    }

    pub async fn load(&self) -> Result<(), ConsoleError> {
        self.model.load().await?;
        self.sync_views()?;
        Ok(())
    }

    fn sync_views(&self) -> Result<usize, ConsoleError> {
        let changes = self.graph.reconcile(&self.model)? + self.table.reconcile(&self.model)?;
        if changes > 0 {
            debug!(changes, "views patched");
        }
        Ok(changes)
    }

    /// One refresh tick. Failures go to the notice board; losing contact
    /// raises the blocking dialog, which also stops the poller.
    pub async fn tick(&self) {
        let outcome = self.model.refresh().await;
        let synced = match outcome {
            Ok(RefreshOutcome::Stale) => Ok(0),
            Ok(_) => self.sync_views(),
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            self.notices.failure(&e);
        }
    }

    /// Leaves the lost-contact state: forgets earlier failures, reloads the
    /// snapshot and resumes polling.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn reload(&self) -> Result<(), ConsoleError> {
        self.model.reset_contact();
        self.notices.clear_modal();
        let loaded = self.load().await;
        match &loaded {
            Ok(()) => {
                self.resume_polling();
                info!("reloaded");
            }
            Err(e) => self.notices.failure(e),
        }
        loaded
    }

    fn ensure_ready(&self) -> Result<(), ConsoleError> {
        if self.model.is_ready() {
            Ok(())
        } else {
            Err(ConsoleError::NotReady)
        }
    }

    /// Publishes the outcome of a mutation. Anything that reached the
    /// scheduler is followed by a refresh.
    async fn settle<T>(&self, res: Result<T, ConsoleError>, done: &str) -> Result<T, ConsoleError> {
        match &res {
            Ok(_) => self.notices.success(done),
            Err(e) => self.notices.failure(e),
        }
        let reached_scheduler = matches!(
            res,
            Ok(_) | Err(ConsoleError::Network(_)) | Err(ConsoleError::PartialMutation { .. })
        );
        if reached_scheduler {
            self.tick().await;
        }
        res
    }

    pub async fn add_task(
        &self,
        name: &str,
        command: &str,
        target: Option<RemoteTarget>,
    ) -> Result<(), ConsoleError> {
        let res = self.add_task_inner(name, command, target).await;
        self.settle(res, &format!("Task '{}' added", name.trim())).await
    }

    async fn add_task_inner(
        &self,
        name: &str,
        command: &str,
        target: Option<RemoteTarget>,
    ) -> Result<(), ConsoleError> {
        self.ensure_ready()?;
        ensure_matches(VALIDATION_REGEX_NOT_BLANK, name, "task name")?;
        ensure_matches(VALIDATION_REGEX_NOT_BLANK, command, "command")?;
        let target = match target {
            Some(t) => {
                ensure_matches(VALIDATION_REGEX_NOT_BLANK, &t.hostname, "remote target")?;
                Some(t)
            }
            None => None,
        };

        let name = name.trim();
        if self.model.task(name).is_some() || self.graph.node_ids().iter().any(|n| n == name) {
            return Err(ConsoleError::Validation(format!(
                "a task named '{}' already exists",
                name
            )));
        }
        let _guard = self
            .pending
            .claim(vec![EditKey::Task(name.to_string())])
            .map_err(|held| ConsoleError::Busy(held.label()))?;

        let task = NewTask {
            name: name.to_string(),
            command: command.trim().to_string(),
            target,
        };
        self.api.add_task(&self.model.job_name(), &task).await?;
        self.graph.add_task_locally(name);
        Ok(())
    }

    pub async fn add_dependency(&self, from: &str, to: &str) -> Result<(), ConsoleError> {
        let res = match self.ensure_ready() {
            Ok(()) => self.graph.add_dependency(from, to).await,
            Err(e) => {
                self.graph.cancel_commit(from, to);
                Err(e)
            }
        };
        self.settle(res, &format!("'{}' now runs before '{}'", from, to))
            .await
    }

    /// Finishes a drag gesture, if it produced a link.
    pub async fn commit_gesture(&self, candidate: Option<LinkCandidate>) -> Result<(), ConsoleError> {
        match candidate {
            Some(c) => self.add_dependency(&c.from, &c.to).await,
            None => Ok(()),
        }
    }

    pub async fn delete_dependency(&self, from: &str, to: &str) -> Result<(), ConsoleError> {
        let res = match self.ensure_ready() {
            Ok(()) => self.graph.delete_link(from, to).await,
            Err(e) => Err(e),
        };
        self.settle(res, "Dependency removed").await
    }

    pub async fn delete_task(&self, name: &str) -> Result<(), ConsoleError> {
        let res = match self.ensure_ready() {
            Ok(()) => self.graph.delete_node(name).await,
            Err(e) => Err(e),
        };
        self.settle(res, &format!("Task '{}' deleted", name)).await
    }

    pub async fn delete_selected(&self) -> Result<(), ConsoleError> {
        let res = match self.ensure_ready() {
            Ok(()) => self.graph.delete_selected().await,
            Err(e) => Err(e),
        };
        self.settle(res, "Selection deleted").await
    }

    pub async fn commit_edit(&self) -> Result<bool, ConsoleError> {
        let res = match self.ensure_ready() {
            Ok(()) => self.table.commit_edit().await,
            Err(e) => Err(e),
        };
        if let Ok(false) = res {
            return res;
        }
        self.settle(res, "Task updated").await
    }

    pub async fn run_command(&self, command: JobCommand) -> Result<(), ConsoleError> {
        let res = self.run_command_inner(command).await;
        let done = match command {
            JobCommand::Start => "Job started",
            JobCommand::Retry => "Retrying job from previous state",
            JobCommand::Terminate => "Terminating all tasks",
            JobCommand::Kill => "Killing all tasks",
        };
        self.settle(res, done).await
    }

    async fn run_command_inner(&self, command: JobCommand) -> Result<(), ConsoleError> {
        let status = self.model.status().ok_or(ConsoleError::NotReady)?;
        if !command.allowed_in(status) {
            return Err(ConsoleError::Validation(format!(
                "cannot {:?} a job that is {}",
                command,
                status.as_str()
            )));
        }
        self.api
            .run_command(&self.model.job_name(), command)
            .await?;
        Ok(())
    }

    /// Sets the cron schedule. An empty string unschedules the job.
    pub async fn schedule(&self, cron: &str) -> Result<(), ConsoleError> {
        let res = self.schedule_inner(cron.trim()).await;
        let done = if cron.trim().is_empty() {
            "Job unscheduled".to_string()
        } else {
            format!("Job scheduled: {}", cron.trim())
        };
        self.settle(res, &done).await
    }

    async fn schedule_inner(&self, cron: &str) -> Result<(), ConsoleError> {
        self.ensure_ready()?;
        if !cron.is_empty() {
            ensure_matches(VALIDATION_REGEX_CRON, cron, "cron schedule")?;
        }
        self.api
            .schedule_job(&self.model.job_name(), cron)
            .await?;
        Ok(())
    }

    pub async fn rename_job(&self, new_name: &str) -> Result<(), ConsoleError> {
        let res = self.rename_job_inner(new_name.trim()).await;
        self.settle(res, &format!("Job renamed to '{}'", new_name.trim()))
            .await
    }

    async fn rename_job_inner(&self, new_name: &str) -> Result<(), ConsoleError> {
        self.ensure_ready()?;
        ensure_matches(VALIDATION_REGEX_NOT_BLANK, new_name, "job name")?;
        let current = self.model.job_name();
        if current == new_name {
            return Ok(());
        }
        self.api.edit_job(&current, new_name).await?;
        self.model.rename_job(new_name);
        Ok(())
    }

    pub async fn task_log(
        &self,
        task_name: &str,
        end: LogEnd,
        stream: LogStream,
        num_lines: u32,
    ) -> Result<Vec<String>, ConsoleError> {
        let res = self.task_log_inner(task_name, end, stream, num_lines).await;
        if let Err(e) = &res {
            self.notices.failure(e);
        }
        res
    }

    async fn task_log_inner(
        &self,
        task_name: &str,
        end: LogEnd,
        stream: LogStream,
        num_lines: u32,
    ) -> Result<Vec<String>, ConsoleError> {
        self.ensure_ready()?;
        if self.model.task(task_name).is_none() {
            return Err(ConsoleError::Validation(format!(
                "no task named '{}'",
                task_name
            )));
        }
        let lines = self
            .api
            .task_log(&self.model.job_name(), task_name, end, stream, num_lines)
            .await?;
        Ok(lines)
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, ConsoleError> {
        let res = self.api.list_jobs().await.map_err(ConsoleError::from);
        if let Err(e) = &res {
            self.notices.failure(e);
        }
        res
    }
}

async fn poll_once(console: Weak<Console>) {
    if let Some(console) = console.upgrade() {
        console.tick().await;
    }
}
