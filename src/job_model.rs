use crate::controller::error::ConsoleError;
use crate::graph::{dag, GraphLink, GraphNode};
use crate::scheduler::wire::{RunStatus, SchedulerJob, SchedulerTask, TaskField};
use crate::scheduler::SchedulerApi;

use failsafe::backoff::{self, Constant};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{CircuitBreaker, Config, StateMachine};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

type ContactBreaker = StateMachine<ConsecutiveFailures<Constant>, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The snapshot changed and was stored.
    Applied,
    /// Same payload as before; nothing downstream needs to run.
    Unchanged,
    /// A newer refresh or local edit was issued while this one was in flight.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatus {
    pub id: String,
    pub status: RunStatus,
}

#[derive(Debug)]
struct ModelState {
    job_name: String,
    snapshot: Option<Arc<SchedulerJob>>,
    // generation the stored snapshot (or local patch) was issued at
    generation: u64,
    ready: bool,
}

/// Latest scheduler snapshot of one job.
pub struct JobModel {
    api: Arc<dyn SchedulerApi>,
    state: Mutex<ModelState>,
    issued: AtomicU64,
    breaker: RwLock<ContactBreaker>,
    lost_contact_threshold: u32,
    lost_contact_cooldown: Duration,
}

fn contact_breaker(threshold: u32, cooldown: Duration) -> ContactBreaker {
    Config::new()
        .failure_policy(failure_policy::consecutive_failures(
            threshold,
            backoff::constant(cooldown),
        ))
        .build()
}

impl JobModel {
    pub fn new(
        api: Arc<dyn SchedulerApi>,
        job_name: &str,
        lost_contact_threshold: u32,
        lost_contact_cooldown: Duration,
    ) -> Self {
        JobModel {
            api,
            state: Mutex::new(ModelState {
                job_name: job_name.to_string(),
                snapshot: None,
                generation: 0,
                ready: false,
            }),
            issued: AtomicU64::new(0),
            breaker: RwLock::new(contact_breaker(lost_contact_threshold, lost_contact_cooldown)),
            lost_contact_threshold,
            lost_contact_cooldown,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contact(&self) -> ContactBreaker {
        self.breaker
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn issue_generation(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    pub fn job_name(&self) -> String {
        self.state().job_name.clone()
    }

    pub fn snapshot(&self) -> Option<Arc<SchedulerJob>> {
        self.state().snapshot.clone()
    }

    pub fn status(&self) -> Option<RunStatus> {
        self.snapshot().map(|job| job.status)
    }

    pub fn task(&self, name: &str) -> Option<SchedulerTask> {
        self.snapshot()?
            .tasks
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    pub fn is_lost_contact(&self) -> bool {
        !self.contact().is_call_permitted()
    }

    /// Forgets earlier failures. Used when the user explicitly reloads.
    pub fn reset_contact(&self) {
        *self.breaker.write().unwrap_or_else(|e| e.into_inner()) =
            contact_breaker(self.lost_contact_threshold, self.lost_contact_cooldown);
    }

    #[tracing::instrument(level = "info", skip(self), fields(job_name = %self.job_name()))]
    pub async fn load(&self) -> Result<(), ConsoleError> {
        self.state().ready = false;
        info!("Loading job snapshot");

        match self.refresh().await {
            Ok(_) => {
                if self.is_ready() {
                    Ok(())
                } else {
                    // a newer load won the race and has not landed yet
                    Err(ConsoleError::NotReady)
                }
            }
            Err(e) => {
                warn!(?e, "job load failed");
                Err(e)
            }
        }
    }

    /// Re-fetches the snapshot. Responses to anything but the most recently
    /// issued generation are dropped.
    pub async fn refresh(&self) -> Result<RefreshOutcome, ConsoleError> {
        let contact = self.contact();
        if !contact.is_call_permitted() {
            return Err(ConsoleError::LostContact);
        }

        let generation = self.issue_generation();
        let job_name = self.job_name();
        debug!(generation, job_name = %job_name, "refreshing job snapshot");

        let fetched = self.api.fetch_job(&job_name).await;
        match contact.call(|| fetched) {
            Ok(job) => self.apply(generation, job),
            Err(failsafe::Error::Rejected) => Err(ConsoleError::LostContact),
            Err(failsafe::Error::Inner(e)) => {
                warn!(generation, ?e, "refresh failed");
                if !contact.is_call_permitted() {
                    Err(ConsoleError::LostContact)
                } else {
                    Err(ConsoleError::Network(e))
                }
            }
        }
    }

    fn apply(&self, generation: u64, job: SchedulerJob) -> Result<RefreshOutcome, ConsoleError> {
        let mut state = self.state();
        if generation != self.latest_issued() {
            debug!(
                generation,
                latest = self.latest_issued(),
                "discarding stale snapshot"
            );
            return Ok(RefreshOutcome::Stale);
        }
        validate_snapshot(&job)?;

        state.generation = generation;
        state.ready = true;
        if state.snapshot.as_deref() == Some(&job) {
            return Ok(RefreshOutcome::Unchanged);
        }
        state.snapshot = Some(Arc::new(job));
        Ok(RefreshOutcome::Applied)
    }

    /// Applies a field edit the scheduler has confirmed. Refreshes already in
    /// flight become stale so they cannot undo it.
    pub fn patch_task(&self, task_name: &str, field: &TaskField) -> bool {
        let generation = self.issue_generation();
        let mut state = self.state();
        let Some(current) = state.snapshot.as_deref() else {
            return false;
        };
        let mut job = current.clone();

        let Some(task) = job.tasks.iter_mut().find(|t| t.name == task_name) else {
            return false;
        };
        field.apply(task);

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

        state.snapshot = Some(Arc::new(job));
        state.generation = generation;
        true
    }

    pub fn rename_job(&self, new_name: &str) {
        let generation = self.issue_generation();
        let mut state = self.state();
        state.job_name = new_name.to_string();
        if let Some(current) = state.snapshot.as_deref() {
            let mut job = current.clone();
            job.name = new_name.to_string();
            state.snapshot = Some(Arc::new(job));
        }
        state.generation = generation;
    }

    /// Status of the task called `task_name`. Unknown names read as waiting:
    /// the graph may briefly hold a node the snapshot has not caught up with.
    pub fn derive_node(&self, task_name: &str) -> NodeStatus {
        let status = self
            .snapshot()
            .and_then(|job| {
                job.tasks
                    .iter()
                    .find(|t| t.name == task_name)
                    .map(|t| t.status())
            })
            .unwrap_or_default();
        NodeStatus {
            id: task_name.to_string(),
            status,
        }
    }

    pub fn project_nodes(&self) -> Vec<GraphNode> {
        match self.snapshot() {
            Some(job) => job
                .tasks
                .iter()
                .map(|t| GraphNode::new(&t.name, t.status()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// One link per (from, to) pair, endpoints resolved by task name.
    pub fn project_links(&self) -> Vec<GraphLink> {
        let Some(job) = self.snapshot() else {
            return Vec::new();
        };
        let names: HashSet<&str> = job.tasks.iter().map(|t| t.name.as_str()).collect();
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for (from, tos) in job.dependencies.iter() {
            for to in tos {
                if !names.contains(from.as_str()) || !names.contains(to.as_str()) {
                    warn!(%from, %to, "dependency names an unknown task, skipping");
                    continue;
                }
                if seen.insert((from.as_str(), to.as_str())) {
                    links.push(GraphLink::dependency(from, to));
                }
            }
        }
        links
    }
}

fn validate_snapshot(job: &SchedulerJob) -> Result<(), ConsoleError> {
    let mut names = HashSet::new();
    for task in &job.tasks {
        if !names.insert(task.name.as_str()) {
            return Err(ConsoleError::InvalidSnapshot(format!(
                "duplicate task name `{}`",
                task.name
            )));
        }
    }

    let edges = job
        .dependencies
        .iter()
        .flat_map(|(from, tos)| tos.iter().map(move |to| (from.as_str(), to.as_str())));
    if dag::topological_order(names.iter().copied(), edges).is_none() {
        return Err(ConsoleError::InvalidSnapshot(
            "dependency graph has a cycle".to_string(),
        ));
    }
    Ok(())
}
