use super::{GraphLink, GraphNode};
use crate::config::LayoutSettings;

use std::collections::HashMap;
use std::f64::consts::PI;

const ALPHA_START: f64 = 0.1;
const ALPHA_FLOOR: f64 = 0.005;
const ALPHA_DECAY: f64 = 0.99;
const FRICTION: f64 = 0.9;
const MIN_DISTANCE_SQ: f64 = 1.0;

/// Iterative force layout: pairwise repulsion, springs along links and a
/// weak pull toward the centre, cooled by `alpha` until it settles.
#[derive(Debug, Clone)]
pub struct ForceLayout {
    settings: LayoutSettings,
    alpha: f64,
}

impl ForceLayout {
    pub fn new(settings: LayoutSettings) -> Self {
        ForceLayout {
            settings,
            alpha: ALPHA_START,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn is_settled(&self) -> bool {
        self.alpha < ALPHA_FLOOR
    }

    pub fn reheat(&mut self) {
        self.alpha = self.alpha.max(ALPHA_START);
    }

    fn centre(&self) -> (f64, f64) {
        (self.settings.width / 2.0, self.settings.height / 2.0)
    }

    /// Initial spot for the `index`th node: a sunflower spiral around the
    /// centre, so seeding is deterministic and nodes never coincide.
    pub fn place(&self, node: &mut GraphNode, index: usize) {
        let (cx, cy) = self.centre();
        let radius = 10.0 * (0.5 + index as f64).sqrt();
        let angle = index as f64 * PI * (3.0 - 5f64.sqrt());
        node.x = cx + radius * angle.cos();
        node.y = cy + radius * angle.sin();
        node.vx = 0.0;
        node.vy = 0.0;
    }

    /// One integration step. Returns false once the layout has settled.
    pub fn step(&mut self, nodes: &mut [GraphNode], links: &[GraphLink]) -> bool {
        if self.is_settled() {
            return false;
        }

        // endpoints are resolved by id on every step
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        let springs: Vec<(usize, usize)> = links
            .iter()
            .filter_map(|l| Some((*index.get(l.source.as_str())?, *index.get(l.target.as_str())?)))
            .collect();

        let alpha = self.alpha;
        let mut force = vec![(0.0_f64, 0.0_f64); nodes.len()];

        for &(s, t) in &springs {
            let dx = nodes[t].x - nodes[s].x;
            let dy = nodes[t].y - nodes[s].y;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > 0.0 {
                let k = alpha * (dist - self.settings.link_distance) / dist * 0.5;
                force[s].0 += dx * k;
                force[s].1 += dy * k;
                force[t].0 -= dx * k;
                force[t].1 -= dy * k;
            }
        }

        let (cx, cy) = self.centre();
        let pull = alpha * self.settings.gravity;
        for (i, n) in nodes.iter().enumerate() {
            force[i].0 += (cx - n.x) * pull;
            force[i].1 += (cy - n.y) * pull;
        }

        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let dx = nodes[j].x - nodes[i].x;
                let dy = nodes[j].y - nodes[i].y;
                let dist_sq = (dx * dx + dy * dy).max(MIN_DISTANCE_SQ);
                // charge is negative, so k pushes the pair apart
                let k = alpha * self.settings.charge / dist_sq;
                force[i].0 += dx * k;
                force[i].1 += dy * k;
                force[j].0 -= dx * k;
                force[j].1 -= dy * k;
            }
        }

        for (n, (fx, fy)) in nodes.iter_mut().zip(force) {
            if n.fixed {
                n.vx = 0.0;
                n.vy = 0.0;
                continue;
            }
            n.vx = (n.vx + fx) * FRICTION;
            n.vy = (n.vy + fy) * FRICTION;
            n.x += n.vx;
            n.y += n.vy;
        }

        self.alpha *= ALPHA_DECAY;
        true
    }

    /// Pins a node under the pointer and wakes the simulation.
    pub fn drag(&mut self, node: &mut GraphNode, x: f64, y: f64) {
        node.fixed = true;
        node.x = x;
        node.y = y;
        self.reheat();
    }

    pub fn release(&mut self, node: &mut GraphNode) {
        node.fixed = false;
        self.reheat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::wire::RunStatus;

    fn nodes(ids: &[&str], layout: &ForceLayout) -> Vec<GraphNode> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let mut n = GraphNode::new(id, RunStatus::Waiting);
                layout.place(&mut n, i);
                n
            })
            .collect()
    }

    fn distance(a: &GraphNode, b: &GraphNode) -> f64 {
        ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
    }

    #[test]
    fn settles_within_a_bounded_number_of_steps() {
        let mut layout = ForceLayout::new(LayoutSettings::default());
        let mut ns = nodes(&["A", "B", "C"], &layout);
        let links = vec![GraphLink::dependency("A", "B"), GraphLink::dependency("B", "C")];

        let mut steps = 0;
        while layout.step(&mut ns, &links) {
            steps += 1;
            assert!(steps < 1000, "layout never settled");
        }
        assert!(layout.is_settled());
        assert!(ns.iter().all(|n| n.x.is_finite() && n.y.is_finite()));
        assert!(!layout.step(&mut ns, &links));
    }

    #[test]
    fn unlinked_nodes_push_apart() {
        let mut layout = ForceLayout::new(LayoutSettings::default());
        let mut ns = nodes(&["A", "B"], &layout);
        let before = distance(&ns[0], &ns[1]);
        for _ in 0..50 {
            layout.step(&mut ns, &[]);
        }
        assert!(distance(&ns[0], &ns[1]) > before);
    }

    #[test]
    fn fixed_nodes_stay_put() {
        let mut layout = ForceLayout::new(LayoutSettings::default());
        let mut ns = nodes(&["A", "B"], &layout);
        layout.drag(&mut ns[0], 100.0, 100.0);
        for _ in 0..20 {
            layout.step(&mut ns, &[GraphLink::dependency("A", "B")]);
        }
        assert_eq!((ns[0].x, ns[0].y), (100.0, 100.0));
        layout.release(&mut ns[0]);
        assert!(!ns[0].fixed);
    }

    #[test]
    fn links_to_missing_nodes_are_skipped() {
        let mut layout = ForceLayout::new(LayoutSettings::default());
        let mut ns = nodes(&["A"], &layout);
        assert!(layout.step(&mut ns, &[GraphLink::dependency("A", "ghost")]));
    }
}
