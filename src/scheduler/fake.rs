//! In-memory scheduler used by the unit tests.

use super::client::{ApiResult, SchedulerApi};
use super::error::ApiError;
use super::wire::{
    JobCommand, JobSummary, LogEnd, LogStream, NewTask, RunStatus, SchedulerJob, SchedulerTask,
    TaskField,
};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Notify};

pub(crate) fn task(name: &str) -> SchedulerTask {
    SchedulerTask {
        name: name.to_string(),
        command: format!("echo {}", name),
        soft_timeout: 0,
        hard_timeout: 0,
        hostname: None,
        started_at: None,
        completed_at: None,
        success: None,
    }
}

pub(crate) fn job(name: &str, tasks: &[&str], deps: &[(&str, &str)]) -> SchedulerJob {
    let mut dependencies: BTreeMap<String, Vec<String>> = tasks
        .iter()
        .map(|t| (t.to_string(), Vec::new()))
        .collect();
    for (from, to) in deps {
        dependencies
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
    }
    SchedulerJob {
        name: name.to_string(),
        job_id: None,
        status: RunStatus::Waiting,
        tasks: tasks.iter().map(|t| task(t)).collect(),
        dependencies,
        cron_schedule: None,
        next_run: None,
        notes: None,
    }
}

#[derive(Default)]
struct FakeState {
    job: Option<SchedulerJob>,
    failing: HashSet<&'static str>,
    held_fetches: VecDeque<oneshot::Receiver<ApiResult<SchedulerJob>>>,
    gates: HashMap<&'static str, Arc<Notify>>,
}

pub(crate) struct FakeScheduler {
    state: Mutex<FakeState>,
    calls: mpsc::UnboundedSender<String>,
}

impl FakeScheduler {
    pub fn new(job: SchedulerJob) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (calls, rx) = mpsc::unbounded_channel();
        let fake = FakeScheduler {
            state: Mutex::new(FakeState {
                job: Some(job),
                ..Default::default()
            }),
            calls,
        };
        (fake, rx)
    }

    /// Every later call to `op` fails until `recover` is called.
    pub fn fail(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.state.lock().unwrap().failing.remove(op);
    }

    /// The next `fetch_job` waits for the returned sender instead of
    /// answering from the stored job.
    pub fn hold_next_fetch(&self) -> oneshot::Sender<ApiResult<SchedulerJob>> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().held_fetches.push_back(rx);
        tx
    }

    /// The next call to mutation `op` waits until the returned gate is
    /// notified. Failures set with `fail` in the meantime still apply.
    pub fn hold_next(&self, op: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().gates.insert(op, gate.clone());
        gate
    }

    pub fn job(&self) -> SchedulerJob {
        self.state.lock().unwrap().job.clone().unwrap()
    }

    pub fn with_job(&self, f: impl FnOnce(&mut SchedulerJob)) {
        f(self.state.lock().unwrap().job.as_mut().unwrap())
    }

    fn enter(&self, op: &'static str) -> ApiResult<()> {
        let _ = self.calls.send(op.to_string());
        if self.state.lock().unwrap().failing.contains(op) {
            return Err(ApiError::Status {
                path: op.to_string(),
                status: 500,
            });
        }
        Ok(())
    }

    async fn mutate(&self, op: &'static str, f: impl FnOnce(&mut SchedulerJob)) -> ApiResult<()> {
        let gate = self.state.lock().unwrap().gates.remove(op);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.enter(op)?;
        self.with_job(f);
        Ok(())
    }
}

#[async_trait]
impl SchedulerApi for FakeScheduler {
    async fn fetch_job(&self, _job_name: &str) -> ApiResult<SchedulerJob> {
        let held = self.state.lock().unwrap().held_fetches.pop_front();
        self.enter("job")?;
        match held {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(ApiError::Timeout("job".to_string()))
            }),
            None => Ok(self.job()),
        }
    }

    async fn list_jobs(&self) -> ApiResult<Vec<JobSummary>> {
        self.enter("jobs")?;
        let job = self.job();
        Ok(vec![JobSummary {
            name: job.name,
            job_id: job.job_id,
            status: job.status,
            cron_schedule: job.cron_schedule,
            next_run: job.next_run,
        }])
    }

    async fn add_task(&self, _job_name: &str, new_task: &NewTask) -> ApiResult<()> {
        self.mutate("add_task_to_job", |job| {
            let mut t = task(&new_task.name);
            t.command = new_task.command.clone();
            t.hostname = new_task.target.as_ref().map(|x| x.hostname.clone());
            job.tasks.push(t);
            job.dependencies.insert(new_task.name.clone(), Vec::new());
        }).await
    }

    async fn delete_task(&self, _job_name: &str, task_name: &str) -> ApiResult<()> {
        self.mutate("delete_task", |job| {
            job.tasks.retain(|t| t.name != task_name);
            job.dependencies.remove(task_name);
            for deps in job.dependencies.values_mut() {
                deps.retain(|d| d != task_name);
            }
        }).await
    }

    async fn add_dependency(&self, _job_name: &str, from: &str, to: &str) -> ApiResult<()> {
        self.mutate("add_dependency", |job| {
            job.dependencies
                .entry(from.to_string())
                .or_default()
                .push(to.to_string());
        }).await
    }

    async fn delete_dependency(&self, _job_name: &str, from: &str, to: &str) -> ApiResult<()> {
        self.mutate("delete_dependency", |job| {
            if let Some(deps) = job.dependencies.get_mut(from) {
                deps.retain(|d| d != to);
            }
        }).await
    }

    async fn edit_task(
        &self,
        _job_name: &str,
        task_name: &str,
        field: &TaskField,
    ) -> ApiResult<()> {
        self.mutate("edit_task", |job| {
            if let Some(t) = job.tasks.iter_mut().find(|t| t.name == task_name) {
                field.apply(t);
            }
            if let TaskField::Name(new_name) = field {
                if let Some(deps) = job.dependencies.remove(task_name) {
                    job.dependencies.insert(new_name.clone(), deps);
                }
                for deps in job.dependencies.values_mut() {
                    for d in deps.iter_mut().filter(|d| *d == task_name) {
                        *d = new_name.clone();
                    }
                }
            }
        }).await
    }

    async fn edit_job(&self, _job_name: &str, new_name: &str) -> ApiResult<()> {
        self.mutate("edit_job", |job| job.name = new_name.to_string()).await
    }

    async fn schedule_job(&self, _job_name: &str, cron_schedule: &str) -> ApiResult<()> {
        self.mutate("schedule_job", |job| {
            job.cron_schedule = if cron_schedule.is_empty() {
                None
            } else {
                Some(cron_schedule.to_string())
            }
        }).await
    }

    async fn run_command(&self, _job_name: &str, command: JobCommand) -> ApiResult<()> {
        self.mutate(command.path(), |job| {
            job.status = match command {
                JobCommand::Start | JobCommand::Retry => RunStatus::Running,
                JobCommand::Terminate | JobCommand::Kill => RunStatus::Failed,
            }
        }).await
    }

    async fn task_log(
        &self,
        _job_name: &str,
        task_name: &str,
        end: LogEnd,
        stream: LogStream,
        num_lines: u32,
    ) -> ApiResult<Vec<String>> {
        self.enter("log")?;
        Ok((0..num_lines.min(3))
            .map(|i| format!("{} {:?} {} line {}", task_name, end, stream.as_str(), i))
            .collect())
    }
}
