//! Bidirectional shortest-path search over the navigation graph.
//!
//! Dijkstra frontiers expanded from both endpoints, meeting in the middle.
//! Parallel edges between a node pair are relaxed individually, so the
//! cheapest of two transport options wins explicitly. Jail edges model
//! forced relocation and are never relaxed.

use crate::graph::{EdgeKind, NavGraph, NodeId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// One traversed edge of a found path, ordered start to goal.
#[derive(Debug, Clone, Copy)]
pub struct PathEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

struct Frontier {
    cost: f64,
    node: NodeId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; ties broken by node id for determinism.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Finds the cheapest path between two nodes. Returns the traversed edges
/// in order, an empty list when `start == goal`, or `None` when the
/// frontiers never meet.
pub fn shortest_path(graph: &NavGraph, start: NodeId, goal: NodeId) -> Option<Vec<PathEdge>> {
    if start == goal {
        return Some(Vec::new());
    }

    let mut dist_f: HashMap<NodeId, f64> = HashMap::new();
    let mut dist_b: HashMap<NodeId, f64> = HashMap::new();
    let mut parent_f: HashMap<NodeId, (NodeId, EdgeKind)> = HashMap::new();
    let mut parent_b: HashMap<NodeId, (NodeId, EdgeKind)> = HashMap::new();
    let mut heap_f = BinaryHeap::new();
    let mut heap_b = BinaryHeap::new();

    dist_f.insert(start, 0.0);
    dist_b.insert(goal, 0.0);
    heap_f.push(Frontier {
        cost: 0.0,
        node: start,
    });
    heap_b.push(Frontier {
        cost: 0.0,
        node: goal,
    });

    let mut best: Option<(f64, NodeId)> = None;

    while let (Some(top_f), Some(top_b)) = (heap_f.peek(), heap_b.peek()) {
        if let Some((best_cost, _)) = best {
            if top_f.cost + top_b.cost >= best_cost {
                break;
            }
        }

        // Expand the cheaper frontier.
        if top_f.cost <= top_b.cost {
            let Frontier { cost, node } = heap_f.pop().unwrap();
            if cost > dist_f[&node] {
                continue;
            }
            for edge in graph.out_edges(node) {
                if edge.kind == EdgeKind::Jail {
                    continue;
                }
                let next = cost + graph.edge_cost(node, edge);
                if dist_f.get(&edge.to).map_or(true, |&d| next < d) {
                    dist_f.insert(edge.to, next);
                    parent_f.insert(edge.to, (node, edge.kind));
                    heap_f.push(Frontier {
                        cost: next,
                        node: edge.to,
                    });
                    if let Some(&d) = dist_b.get(&edge.to) {
                        let total = next + d;
                        if best.map_or(true, |(b, _)| total < b) {
                            best = Some((total, edge.to));
                        }
                    }
                }
            }
        } else {
            let Frontier { cost, node } = heap_b.pop().unwrap();
            if cost > dist_b[&node] {
                continue;
            }
            for edge in graph.in_edges(node) {
                if edge.kind == EdgeKind::Jail {
                    continue;
                }
                // `edge.to` is the source of the original edge (source -> node).
                let source = edge.to;
                let next = cost + graph.edge_cost(source, &crate::graph::Edge { to: node, kind: edge.kind });
                if dist_b.get(&source).map_or(true, |&d| next < d) {
                    dist_b.insert(source, next);
                    parent_b.insert(source, (node, edge.kind));
                    heap_b.push(Frontier {
                        cost: next,
                        node: source,
                    });
                    if let Some(&d) = dist_f.get(&source) {
                        let total = next + d;
                        if best.map_or(true, |(b, _)| total < b) {
                            best = Some((total, source));
                        }
                    }
                }
            }
        }
    }

    let (_, meeting) = best?;

    // Forward half: meeting back to start.
    let mut edges = Vec::new();
    let mut node = meeting;
    while node != start {
        let (prev, kind) = parent_f[&node];
        edges.push(PathEdge {
            from: prev,
            to: node,
            kind,
        });
        node = prev;
    }
    edges.reverse();

    // Backward half: meeting forward to goal.
    let mut node = meeting;
    while node != goal {
        let (next, kind) = parent_b[&node];
        edges.push(PathEdge {
            from: node,
            to: next,
            kind,
        });
        node = next;
    }

    Some(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NavGraph;
    use crate::grid::Grid;
    use shared::data::{MapData, MapGeometry, SpawnPoint};
    use shared::data::GameData;
    use std::collections::HashMap as StdHashMap;

    fn open_map_data(names: &[&str]) -> GameData {
        let mut data = GameData {
            geometry: StdHashMap::new(),
            maps: StdHashMap::new(),
            monsters: StdHashMap::new(),
            skills: StdHashMap::new(),
            items: StdHashMap::new(),
            npcs: StdHashMap::new(),
            classes: StdHashMap::new(),
        };
        for name in names {
            data.geometry.insert(
                name.to_string(),
                MapGeometry {
                    min_x: -50,
                    min_y: -50,
                    max_x: 50,
                    max_y: 50,
                    x_lines: vec![],
                    y_lines: vec![],
                },
            );
            data.maps.insert(
                name.to_string(),
                MapData {
                    spawns: vec![
                        SpawnPoint {
                            x: 0.0,
                            y: 0.0,
                            facing: None,
                        },
                        SpawnPoint {
                            x: 40.0,
                            y: 40.0,
                            facing: None,
                        },
                    ],
                    doors: vec![],
                    npcs: vec![],
                    ..Default::default()
                },
            );
        }
        data
    }

    fn graph_for(data: &GameData, names: &[&str]) -> NavGraph {
        let mut graph = NavGraph::new();
        for name in names {
            let grid = Grid::build(
                data.geometry(name).unwrap(),
                &data.map(name).unwrap().spawns,
            );
            graph.add_map(name, &grid, data);
        }
        graph
    }

    #[test]
    fn test_trivial_path() {
        let data = open_map_data(&["main"]);
        let graph = graph_for(&data, &["main"]);
        let map_id = graph.map_id("main").unwrap();
        let node = graph.nodes_on_map(map_id)[0];
        let path = shortest_path(&graph, node, node).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn test_walk_path_on_one_map() {
        let data = open_map_data(&["main"]);
        let graph = graph_for(&data, &["main"]);
        let map_id = graph.map_id("main").unwrap();
        let nodes = graph.nodes_on_map(map_id);
        let a = nodes
            .iter()
            .copied()
            .find(|&id| graph.node(id).x == 0.0)
            .unwrap();
        let b = nodes
            .iter()
            .copied()
            .find(|&id| graph.node(id).x == 40.0)
            .unwrap();

        let path = shortest_path(&graph, a, b).unwrap();
        assert!(!path.is_empty());
        assert_eq!(path.first().unwrap().from, a);
        assert_eq!(path.last().unwrap().to, b);
        // Consecutive edges chain.
        for pair in path.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[test]
    fn test_disconnected_maps_have_no_path() {
        // Two maps with no doors or transporters between them.
        let data = open_map_data(&["main", "island"]);
        let graph = graph_for(&data, &["main", "island"]);
        let a = graph.nodes_on_map(graph.map_id("main").unwrap())[0];
        let b = graph.nodes_on_map(graph.map_id("island").unwrap())[0];
        assert!(shortest_path(&graph, a, b).is_none());
    }

    #[test]
    fn test_jail_edges_are_never_taken() {
        // "jail" exists, so every node gets a jail edge; a path between two
        // ordinary maps must still fail rather than route through jail.
        let data = open_map_data(&["main", "island", "jail"]);
        let graph = graph_for(&data, &["main", "island", "jail"]);
        let a = graph.nodes_on_map(graph.map_id("main").unwrap())[0];
        let b = graph.nodes_on_map(graph.map_id("island").unwrap())[0];
        assert!(shortest_path(&graph, a, b).is_none());
    }
}
