use super::{dag, GraphLink, GraphNode, LinkKey};
use crate::scheduler::wire::RunStatus;

use tokio::sync::watch;
use tracing::debug;

/// What `upsert_dependency` did, so the caller can undo exactly that.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkChange {
    Inserted,
    FlagSet { previous: GraphLink },
    AlreadyPresent,
}

/// The node/link working set behind the graph editor. All mutations go
/// through the named operations below; `redraw` bumps the revision watchers
/// see.
#[derive(Debug)]
pub struct GraphStore {
    nodes: Vec<GraphNode>,
    links: Vec<GraphLink>,
    revision: watch::Sender<u64>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        GraphStore {
            nodes: Vec::new(),
            links: Vec::new(),
            revision,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn redraw(&self) {
        self.revision.send_modify(|r| *r += 1);
        debug!(revision = self.revision(), "graph redraw");
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[GraphLink] {
        &self.links
    }

    /// Mutable access for the layout. Ids must not be touched through this.
    pub(crate) fn layout_parts(&mut self) -> (&mut [GraphNode], &[GraphLink]) {
        (&mut self.nodes, &self.links)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn link_between(&self, a: &str, b: &str) -> Option<&GraphLink> {
        self.links.iter().find(|l| l.connects(a, b))
    }

    pub fn dependency_edges(&self) -> Vec<(String, String)> {
        self.links.iter().flat_map(|l| l.edges()).collect()
    }

    pub fn has_dependency(&self, from: &str, to: &str) -> bool {
        self.links.iter().any(|l| l.has_direction(from, to))
    }

    pub fn would_cycle(&self, from: &str, to: &str) -> bool {
        dag::creates_cycle(&self.dependency_edges(), from, to)
    }

    pub fn seed(&mut self, nodes: Vec<GraphNode>, links: Vec<GraphLink>) {
        self.nodes = nodes;
        self.links = links;
    }

    pub fn push_node(&mut self, node: GraphNode) -> bool {
        if self.contains(&node.id) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Removes the node and every link touching it. Returns the removed
    /// node and links.
    pub fn remove_node(&mut self, id: &str) -> Option<(GraphNode, Vec<GraphLink>)> {
        let idx = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(idx);

        // filter a copy so a concurrent reader of `links` sees a whole set
        let incident: Vec<GraphLink> = self
            .links
            .clone()
            .into_iter()
            .filter(|l| l.touches(id))
            .collect();
        let remaining: Vec<GraphLink> = self
            .links
            .clone()
            .into_iter()
            .filter(|l| !l.touches(id))
            .collect();
        self.links = remaining;

        Some((node, incident))
    }

    pub fn rename_node(&mut self, old_id: &str, new_id: &str) -> bool {
        if old_id == new_id || self.contains(new_id) {
            return false;
        }
        match self.node_mut(old_id) {
            Some(node) => node.id = new_id.to_string(),
            None => return false,
        }
        for link in self.links.iter_mut() {
            link.rename_endpoint(old_id, new_id);
        }
        true
    }

    pub fn set_status(&mut self, id: &str, status: RunStatus) -> bool {
        match self.node_mut(id) {
            Some(node) if node.status != status => {
                node.status = status;
                true
            }
            _ => false,
        }
    }

    /// Adds `from -> to`. A link already joining the pair gets its flag set
    /// instead of a second link being created.
    pub fn upsert_dependency(&mut self, from: &str, to: &str) -> LinkChange {
        if let Some(link) = self.links.iter_mut().find(|l| l.connects(from, to)) {
            if link.has_direction(from, to) {
                return LinkChange::AlreadyPresent;
            }
            let previous = link.clone();
            link.set_direction(from, to);
            return LinkChange::FlagSet { previous };
        }

        // links are stored with the lower id as source
        let mut link = if from < to {
            GraphLink::dependency(from, to)
        } else {
            GraphLink {
                source: to.to_string(),
                target: from.to_string(),
                left: true,
                right: false,
            }
        };
        link.set_direction(from, to);
        self.links.push(link);
        LinkChange::Inserted
    }

    /// Puts the link over `key` back to `previous`, or drops it when there
    /// was none.
    pub fn restore_link(&mut self, key: &LinkKey, previous: Option<GraphLink>) {
        let idx = self.links.iter().position(|l| &l.key() == key);
        match (idx, previous) {
            (Some(idx), Some(link)) => self.links[idx] = link,
            (Some(idx), None) => {
                self.links.remove(idx);
            }
            (None, Some(link)) => self.links.push(link),
            (None, None) => {}
        }
    }

    /// Clears `from -> to`, dropping the link once no direction is left.
    /// Returns the link as it was before.
    pub fn remove_dependency(&mut self, from: &str, to: &str) -> Option<GraphLink> {
        let idx = self.links.iter().position(|l| l.has_direction(from, to))?;
        let before = self.links[idx].clone();
        self.links[idx].clear_direction(from, to);
        if self.links[idx].is_empty() {
            self.links.remove(idx);
        }
        Some(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(nodes: &[&str], deps: &[(&str, &str)]) -> GraphStore {
        let mut s = GraphStore::new();
        s.seed(
            nodes
                .iter()
                .map(|n| GraphNode::new(n, RunStatus::Waiting))
                .collect(),
            deps.iter()
                .map(|(a, b)| GraphLink::dependency(a, b))
                .collect(),
        );
        s
    }

    #[test]
    fn removing_a_node_sweeps_incident_links() {
        let mut s = store(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("A", "C")]);
        let (node, incident) = s.remove_node("B").unwrap();

        assert_eq!(node.id, "B");
        assert_eq!(incident.len(), 2);
        assert_eq!(s.links().len(), 1);
        assert!(s.links().iter().all(|l| !l.touches("B")));
        assert!(s.remove_node("B").is_none());
    }

    #[test]
    fn rename_rekeys_links() {
        let mut s = store(&["A", "B"], &[("A", "B")]);
        assert!(s.rename_node("A", "Z"));
        assert!(s.contains("Z"));
        assert!(!s.contains("A"));
        assert!(s.has_dependency("Z", "B"));
        assert!(s.links().iter().all(|l| !l.touches("A")));
    }

    #[test]
    fn rename_refuses_collisions() {
        let mut s = store(&["A", "B"], &[]);
        assert!(!s.rename_node("A", "B"));
        assert!(!s.rename_node("missing", "C"));
    }

    #[test]
    fn upsert_reuses_the_pair() {
        let mut s = store(&["A", "B"], &[]);
        assert_eq!(s.upsert_dependency("B", "A"), LinkChange::Inserted);
        let link = s.link_between("A", "B").unwrap();
        assert_eq!(link.source, "A");
        assert!(link.left && !link.right);
        assert_eq!(s.upsert_dependency("B", "A"), LinkChange::AlreadyPresent);

        match s.upsert_dependency("A", "B") {
            LinkChange::FlagSet { previous } => assert!(!previous.right),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.links().len(), 1);
    }

    #[test]
    fn restore_returns_to_previous_set() {
        let mut s = store(&["A", "B", "C"], &[("A", "B")]);
        let before = s.links().to_vec();

        s.upsert_dependency("B", "C");
        s.restore_link(&LinkKey::new("B", "C"), None);
        assert_eq!(s.links(), &before[..]);

        let previous = s.link_between("A", "B").cloned();
        s.upsert_dependency("B", "A");
        s.restore_link(&LinkKey::new("A", "B"), previous);
        assert_eq!(s.links(), &before[..]);
    }

    #[test]
    fn redraw_bumps_revision() {
        let s = store(&["A"], &[]);
        let rx = s.subscribe();
        s.redraw();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(s.revision(), 1);
    }
}
