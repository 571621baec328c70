use super::base::SnapshotView;
use super::error::ConsoleError;
use crate::{
    config::LayoutSettings,
    graph::{layout::ForceLayout, store::GraphStore, GraphLink, GraphNode, LinkKey},
    job_model::JobModel,
    pending::{EditKey, PendingEdits},
    scheduler::{wire::SchedulerJob, SchedulerApi},
};

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Where the current pointer interaction stands.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Interaction {
    Idle,
    NodeSelected { id: String },
    LinkSelected { key: LinkKey },
    /// Pointer went down on `from` and a new link is being dragged out.
    /// `deselect` is set when `from` was already selected, so a release
    /// that makes no link clears the selection instead.
    Dragging {
        from: String,
        x: f64,
        y: f64,
        deselect: bool,
    },
    /// The dragged link was dropped and its persistence call is in flight.
    Committing { key: LinkKey },
}

impl Interaction {
    fn touches(&self, id: &str) -> bool {
        match self {
            Interaction::Idle => false,
            Interaction::NodeSelected { id: n } | Interaction::Dragging { from: n, .. } => n == id,
            Interaction::LinkSelected { key } | Interaction::Committing { key } => key.touches(id),
        }
    }
}

/// A finished drag from one node onto another.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub from: String,
    pub to: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
    pub interaction: Interaction,
    pub revision: u64,
    pub alpha: f64,
    pub settled: bool,
}

#[derive(Debug)]
struct EditorState {
    store: GraphStore,
    layout: ForceLayout,
    interaction: Interaction,
    seeded: bool,
    // structure from snapshots issued at or before this generation is ignored
    settled_after: u64,
    placed: usize,
}

impl EditorState {
    fn forget(&mut self, id: &str) {
        if self.interaction.touches(id) {
            self.interaction = Interaction::Idle;
        }
    }

    fn end_commit(&mut self, key: &LinkKey) {
        if self.interaction == (Interaction::Committing { key: key.clone() }) {
            self.interaction = Interaction::Idle;
        }
    }

    fn place_new(&mut self, mut node: GraphNode) -> bool {
        self.layout.place(&mut node, self.placed);
        self.placed += 1;
        if self.store.push_node(node) {
            self.layout.reheat();
            true
        } else {
            false
        }
    }
}

/// Owns the node/link working set. Everything else changes the graph through
/// the operations here.
pub struct GraphEditor {
    api: Arc<dyn SchedulerApi>,
    model: Arc<JobModel>,
    pending: Arc<PendingEdits>,
    state: Mutex<EditorState>,
}

impl GraphEditor {
    pub fn new(
        api: Arc<dyn SchedulerApi>,
        model: Arc<JobModel>,
        pending: Arc<PendingEdits>,
        layout: LayoutSettings,
    ) -> Self {
        GraphEditor {
            api,
            model,
            pending,
            state: Mutex::new(EditorState {
                store: GraphStore::new(),
                layout: ForceLayout::new(layout),
                interaction: Interaction::Idle,
                seeded: false,
                settled_after: 0,
                placed: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_seeded(&self) -> bool {
        self.lock().seeded
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.lock().store.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.lock().store.revision()
    }

    pub fn view(&self) -> GraphView {
        let st = self.lock();
        GraphView {
            nodes: st.store.nodes().to_vec(),
            links: st.store.links().to_vec(),
            interaction: st.interaction.clone(),
            revision: st.store.revision(),
            alpha: st.layout.alpha(),
            settled: st.layout.is_settled(),
        }
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.lock().store.nodes().iter().map(|n| n.id.clone()).collect()
    }

    #[cfg(test)]
    pub fn links(&self) -> Vec<GraphLink> {
        self.lock().store.links().to_vec()
    }

    pub fn interaction(&self) -> Interaction {
        self.lock().interaction.clone()
    }

    /// Initializes the working set from the first ready snapshot. Later
    /// snapshots only ever patch it.
    pub fn seed(&self, model: &JobModel) -> bool {
        if !model.is_ready() {
            return false;
        }
        let mut st = self.lock();
        if st.seeded {
            return false;
        }

        let mut nodes = model.project_nodes();
        for (i, node) in nodes.iter_mut().enumerate() {
            st.layout.place(node, i);
        }
        st.placed = nodes.len();
        st.store.seed(nodes, model.project_links());
        st.seeded = true;
        st.settled_after = model.generation();
        st.layout.reheat();
        st.store.redraw();

        info!(
            nodes = st.store.nodes().len(),
            links = st.store.links().len(),
            "seeded graph"
        );
        true
    }

    /// Adds a node for a task the scheduler has already accepted.
    pub fn add_task_locally(&self, name: &str) -> bool {
        let status = self.model.derive_node(name).status;
        let mut st = self.lock();
        if !st.place_new(GraphNode::new(name, status)) {
            return false;
        }
        st.settled_after = self.model.latest_issued();
        st.store.redraw();
        true
    }

    /// Optimistically links `from -> to`, then persists it. A link whose
    /// persistence fails is taken back out.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn add_dependency(&self, from: &str, to: &str) -> Result<(), ConsoleError> {
        let key = LinkKey::new(from, to);
        if from == to {
            self.lock().end_commit(&key);
            return Err(ConsoleError::Validation(
                "a task cannot depend on itself".to_string(),
            ));
        }

        let _guard = match self.pending.claim(vec![EditKey::Dependency(key.clone())]) {
            Ok(guard) => guard,
            Err(held) => {
                self.lock().end_commit(&key);
                return Err(ConsoleError::Busy(held.label()));
            }
        };

        let previous = {
            let mut st = self.lock();
            if !st.store.contains(from) || !st.store.contains(to) {
                st.end_commit(&key);
                return Err(ConsoleError::Validation(format!(
                    "no task named `{}`",
                    if st.store.contains(from) { to } else { from }
                )));
            }
            if st.store.has_dependency(from, to) {
                st.end_commit(&key);
                return Ok(());
            }
            if st.store.would_cycle(from, to) {
                st.end_commit(&key);
                return Err(ConsoleError::Validation(format!(
                    "`{}` -> `{}` would create a cycle",
                    from, to
                )));
            }
            let previous = st.store.link_between(from, to).cloned();
            st.store.upsert_dependency(from, to);
            st.store.redraw();
            previous
        };

        let job_name = self.model.job_name();
        let persisted = self.api.add_dependency(&job_name, from, to).await;

        let mut st = self.lock();
        st.end_commit(&key);
        match persisted {
            Ok(()) => {
                st.settled_after = self.model.latest_issued();
                info!("dependency saved");
                st.store.redraw();
                Ok(())
            }
            Err(e) => {
                error!(?e, "saving dependency failed, rolling back");
                st.store.restore_link(&key, previous);
                st.store.redraw();
                Err(ConsoleError::PartialMutation {
                    entity: format!("{} -> {}", from, to),
                    rolled_back: true,
                    source: e,
                })
            }
        }
    }

    /// Removes `from -> to` at once and persists the removal. A failed
    /// removal is reported, not undone.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete_link(&self, from: &str, to: &str) -> Result<(), ConsoleError> {
        let key = LinkKey::new(from, to);
        let _guard = self
            .pending
            .claim(vec![EditKey::Dependency(key.clone())])
            .map_err(|held| ConsoleError::Busy(held.label()))?;

        {
            let mut st = self.lock();
            if st.store.remove_dependency(from, to).is_none() {
                return Err(ConsoleError::Validation(format!(
                    "`{}` does not depend on `{}`",
                    to, from
                )));
            }
            if st.store.link_between(from, to).is_none()
                && st.interaction == (Interaction::LinkSelected { key: key.clone() })
            {
                st.interaction = Interaction::Idle;
            }
            st.store.redraw();
        }

        let job_name = self.model.job_name();
        let persisted = self.api.delete_dependency(&job_name, from, to).await;

        match persisted {
            Ok(()) => {
                self.lock().settled_after = self.model.latest_issued();
                info!("dependency deleted");
                Ok(())
            }
            Err(e) => {
                error!(?e, "deleting dependency failed");
                Err(ConsoleError::PartialMutation {
                    entity: format!("{} -> {}", from, to),
                    rolled_back: false,
                    source: e,
                })
            }
        }
    }

    /// Removes a node and every link touching it, then deletes the task.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete_node(&self, id: &str) -> Result<(), ConsoleError> {
        let _guard = self
            .pending
            .claim(vec![EditKey::Task(id.to_string())])
            .map_err(|held| ConsoleError::Busy(held.label()))?;

        {
            let mut st = self.lock();
            let Some((_, incident)) = st.store.remove_node(id) else {
                return Err(ConsoleError::Validation(format!("no task named `{}`", id)));
            };
            debug!(incident = incident.len(), "removed node with its links");
            st.forget(id);
            st.store.redraw();
        }

        let job_name = self.model.job_name();
        match self.api.delete_task(&job_name, id).await {
            Ok(()) => {
                self.lock().settled_after = self.model.latest_issued();
                info!("task deleted");
                Ok(())
            }
            Err(e) => {
                error!(?e, "deleting task failed");
                Err(ConsoleError::PartialMutation {
                    entity: id.to_string(),
                    rolled_back: false,
                    source: e,
                })
            }
        }
    }

    /// Re-keys a node and its links. Only called once the scheduler has
    /// accepted the rename.
    pub fn rename_node(&self, old_id: &str, new_id: &str) -> bool {
        let mut st = self.lock();
        if !st.store.rename_node(old_id, new_id) {
            return false;
        }
        st.interaction = match std::mem::replace(&mut st.interaction, Interaction::Idle) {
            Interaction::NodeSelected { id } if id == old_id => Interaction::NodeSelected {
                id: new_id.to_string(),
            },
            other if other.touches(old_id) => Interaction::Idle,
            other => other,
        };
        st.settled_after = self.model.latest_issued();
        st.store.redraw();
        true
    }

    pub fn press_node(&self, id: &str) {
        let mut st = self.lock();
        let Some(node) = st.store.node(id) else {
            return;
        };
        let (x, y) = (node.x, node.y);
        let deselect = st.interaction
            == Interaction::NodeSelected {
                id: id.to_string(),
            };
        st.interaction = Interaction::Dragging {
            from: id.to_string(),
            x,
            y,
            deselect,
        };
        st.store.redraw();
    }

    pub fn press_link(&self, a: &str, b: &str) {
        let mut st = self.lock();
        if st.store.link_between(a, b).is_none() {
            return;
        }
        let key = LinkKey::new(a, b);
        st.interaction = if st.interaction == (Interaction::LinkSelected { key: key.clone() }) {
            Interaction::Idle
        } else {
            Interaction::LinkSelected { key }
        };
        st.store.redraw();
    }

    pub fn press_background(&self) {
        let mut st = self.lock();
        if st.interaction != Interaction::Idle {
            st.interaction = Interaction::Idle;
            st.store.redraw();
        }
    }

    pub fn pointer_move(&self, x: f64, y: f64) {
        let mut st = self.lock();
        if let Interaction::Dragging { x: cx, y: cy, .. } = &mut st.interaction {
            *cx = x;
            *cy = y;
        }
    }

    /// Pointer released over `id`. Returns the link to create, if the drag
    /// started on another node.
    pub fn release_on_node(&self, id: &str) -> Option<LinkCandidate> {
        let mut st = self.lock();
        let Interaction::Dragging { from, deselect, .. } = st.interaction.clone() else {
            return None;
        };

        if from == id || !st.store.contains(id) {
            st.interaction = selection_after_drag(from, deselect);
            st.store.redraw();
            return None;
        }

        st.interaction = Interaction::Committing {
            key: LinkKey::new(&from, id),
        };
        st.store.redraw();
        Some(LinkCandidate {
            from,
            to: id.to_string(),
        })
    }

    /// Drops the committing state of a dropped link that will not be saved.
    pub fn cancel_commit(&self, from: &str, to: &str) {
        let mut st = self.lock();
        if st.interaction == (Interaction::Committing { key: LinkKey::new(from, to) }) {
            st.interaction = Interaction::Idle;
            st.store.redraw();
        }
    }

    /// Pointer released anywhere but a node.
    pub fn release(&self) {
        let mut st = self.lock();
        if let Interaction::Dragging { from, deselect, .. } = st.interaction.clone() {
            st.interaction = selection_after_drag(from, deselect);
            st.store.redraw();
        }
    }

    pub async fn delete_selected(&self) -> Result<(), ConsoleError> {
        let selected = self.interaction();
        match selected {
            Interaction::NodeSelected { id } => self.delete_node(&id).await,
            Interaction::LinkSelected { key } => {
                let edges = self
                    .lock()
                    .store
                    .link_between(&key.low, &key.high)
                    .map(|l| l.edges())
                    .unwrap_or_default();
                for (from, to) in edges {
                    self.delete_link(&from, &to).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Advances the layout one frame. Returns false once it has settled.
    pub fn step_layout(&self) -> bool {
        let mut guard = self.lock();
        let EditorState { store, layout, .. } = &mut *guard;
        let (nodes, links) = store.layout_parts();
        layout.step(nodes, links)
    }

    pub fn drag_node(&self, id: &str, x: f64, y: f64) {
        let mut guard = self.lock();
        let EditorState { store, layout, .. } = &mut *guard;
        if let Some(node) = store.node_mut(id) {
            layout.drag(node, x, y);
        }
    }

    pub fn end_drag(&self, id: &str) {
        let mut guard = self.lock();
        let EditorState { store, layout, .. } = &mut *guard;
        if let Some(node) = store.node_mut(id) {
            layout.release(node);
        }
    }

    fn reconcile_structure(&self, st: &mut EditorState, job: &SchedulerJob, model: &JobModel) -> usize {
        let mut changes = 0;
        let tasks: HashSet<&str> = job.tasks.iter().map(|t| t.name.as_str()).collect();

        let stale_nodes: Vec<String> = st
            .store
            .nodes()
            .iter()
            .filter(|n| !tasks.contains(n.id.as_str()) && !self.pending.task_pending(&n.id))
            .map(|n| n.id.clone())
            .collect();
        for id in stale_nodes {
            if st.store.remove_node(&id).is_some() {
                st.forget(&id);
                changes += 1;
            }
        }

        for task in &job.tasks {
            if !st.store.contains(&task.name) && !self.pending.task_pending(&task.name) {
                st.place_new(GraphNode::new(&task.name, task.status()));
                changes += 1;
            }
        }

        let wanted: HashSet<(String, String)> = model
            .project_links()
            .iter()
            .flat_map(|l| l.edges())
            .collect();
        let current = st.store.dependency_edges();

        for (from, to) in current.iter() {
            if wanted.contains(&(from.clone(), to.clone()))
                || self.pending.dependency_pending(&LinkKey::new(from, to))
            {
                continue;
            }
            if st.store.remove_dependency(from, to).is_some() {
                changes += 1;
            }
        }

        let mut missing: Vec<&(String, String)> = wanted
            .iter()
            .filter(|edge| !current.contains(edge))
            .collect();
        missing.sort();
        for (from, to) in missing {
            if self.pending.dependency_pending(&LinkKey::new(from, to))
                || !st.store.contains(from)
                || !st.store.contains(to)
                || st.store.would_cycle(from, to)
            {
                continue;
            }
            st.store.upsert_dependency(from, to);
            changes += 1;
        }

        changes
    }
}

fn selection_after_drag(from: String, deselect: bool) -> Interaction {
    if deselect {
        Interaction::Idle
    } else {
        Interaction::NodeSelected { id: from }
    }
}

impl SnapshotView for GraphEditor {
    #[tracing::instrument(level = "debug", name = "graph_reconcile", skip(self, model), fields(generation = model.generation()))]
    fn reconcile(&self, model: &JobModel) -> Result<usize, ConsoleError> {
        self.validate(model)?;
        if self.seed(model) {
            return Ok(1);
        }
        let Some(job) = model.snapshot() else {
            return Ok(0);
        };
        let generation = model.generation();

        let mut guard = self.lock();
        let st = &mut *guard;
        let mut changes = 0;
        for task in &job.tasks {
            if st.store.set_status(&task.name, task.status()) {
                changes += 1;
            }
        }

        if generation > st.settled_after {
            changes += self.reconcile_structure(st, &job, model);
        } else {
            debug!(
                generation,
                settled_after = st.settled_after,
                "snapshot predates a local edit, leaving structure alone"
            );
        }

        if changes > 0 {
            st.store.redraw();
        }
        Ok(changes)
    }
}
