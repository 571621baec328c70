use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Kahn's algorithm over `nodes` and directed `edges`. Returns `None` when
/// the graph has a cycle. Edges naming unknown nodes are ignored.
pub fn topological_order<'a, N, E>(nodes: N, edges: E) -> Option<Vec<String>>
where
    N: IntoIterator<Item = &'a str>,
    E: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut indegree: BTreeMap<&str, usize> = nodes.into_iter().map(|n| (n, 0)).collect();
    let mut outgoing: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for (from, to) in edges {
        if !indegree.contains_key(from) || !indegree.contains_key(to) {
            continue;
        }
        if outgoing.entry(from).or_default().insert(to) {
            *indegree.entry(to).or_default() += 1;
        }
    }

    let mut ready: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(indegree.len());

    while let Some(n) = ready.pop_front() {
        order.push(n.to_string());
        if let Some(next) = outgoing.get(n) {
            for m in next {
                if let Some(d) = indegree.get_mut(m) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(*m);
                    }
                }
            }
        }
    }

    if order.len() == indegree.len() {
        Some(order)
    } else {
        None
    }
}

/// Whether adding `from -> to` to `edges` would close a cycle.
pub fn creates_cycle(edges: &[(String, String)], from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    // a cycle appears iff `from` is already reachable from `to`
    let mut seen = BTreeSet::new();
    let mut stack = vec![to];
    while let Some(n) = stack.pop() {
        if n == from {
            return true;
        }
        if !seen.insert(n) {
            continue;
        }
        stack.extend(
            edges
                .iter()
                .filter(|(f, _)| f == n)
                .map(|(_, t)| t.as_str()),
        );
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn orders_a_chain() {
        let order = topological_order(["C", "A", "B"], [("A", "B"), ("B", "C")]).unwrap();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn detects_cycles() {
        assert!(topological_order(["A", "B"], [("A", "B"), ("B", "A")]).is_none());
        assert!(topological_order(["A"], [("A", "A")]).is_none());
    }

    #[test]
    fn ignores_dangling_edges() {
        assert!(topological_order(["A"], [("A", "ghost")]).is_some());
    }

    #[test]
    fn cycle_prediction() {
        let e = edges(&[("A", "B"), ("B", "C")]);
        assert!(creates_cycle(&e, "C", "A"));
        assert!(creates_cycle(&e, "B", "A"));
        assert!(!creates_cycle(&e, "A", "C"));
        assert!(creates_cycle(&e, "A", "A"));
    }
}
