//! The navigation graph: walkable waypoints per map, stitched across maps
//! by door, transporter, town, jail, and leave edges.
//!
//! The graph is a directed multigraph stored as explicit adjacency lists of
//! typed edge records. Parallel edges between the same node pair are kept,
//! and the search compares them by cost individually. The graph is only
//! mutated during the single-threaded preparation phase; afterwards it is
//! frozen inside a `Pathfinder` and read concurrently.

use crate::grid::{Grid, UNWALKABLE, WALKABLE};
use crate::los;
use shared::data::{Door, GameData};
use shared::{distance, DOOR_REACH_DISTANCE, TOWN_COST, TRANSPORTER_REACH_DISTANCE, TRANSPORT_COST};
use std::collections::HashMap;

pub type NodeId = usize;
pub type MapId = usize;

#[derive(Debug, Clone)]
pub struct Node {
    pub map: MapId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Straight walk, cost is the Euclidean length.
    Walk,
    /// Door or transporter hop to the destination spawn.
    Transport { spawn: usize },
    /// Town warp to the map's primary spawn.
    Town,
    /// Forced relocation to the jail spawn. Modeled but never chosen by the
    /// search; there is no client action that warps to jail voluntarily.
    Jail,
    /// "leave" action out of a dead-end map.
    Leave,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub to: NodeId,
    pub kind: EdgeKind,
}

#[derive(Debug, Default)]
pub struct NavGraph {
    map_names: Vec<String>,
    map_ids: HashMap<String, MapId>,
    nodes: Vec<Node>,
    node_ids: HashMap<(MapId, u64, u64), NodeId>,
    out_edges: Vec<Vec<Edge>>,
    in_edges: Vec<Vec<Edge>>,
    nodes_by_map: Vec<Vec<NodeId>>,
    edge_count: usize,
    transport_cost: f64,
    town_cost: f64,
}

impl NavGraph {
    pub fn new() -> Self {
        NavGraph {
            transport_cost: TRANSPORT_COST,
            town_cost: TOWN_COST,
            ..Default::default()
        }
    }

    /// Overrides the fixed edge cost constants (used to tune warp/transport
    /// trade-offs without rebuilding).
    pub fn set_costs(&mut self, transport_cost: f64, town_cost: f64) {
        self.transport_cost = transport_cost;
        self.town_cost = town_cost;
    }

    pub fn transport_cost(&self) -> f64 {
        self.transport_cost
    }

    pub fn town_cost(&self) -> f64 {
        self.town_cost
    }

    pub fn map_id(&self, name: &str) -> Option<MapId> {
        self.map_ids.get(name).copied()
    }

    pub fn map_name(&self, id: MapId) -> &str {
        &self.map_names[id]
    }

    fn intern_map(&mut self, name: &str) -> MapId {
        if let Some(&id) = self.map_ids.get(name) {
            return id;
        }
        let id = self.map_names.len();
        self.map_names.push(name.to_string());
        self.map_ids.insert(name.to_string(), id);
        self.nodes_by_map.push(Vec::new());
        id
    }

    fn add_node(&mut self, map: MapId, x: f64, y: f64) -> NodeId {
        let key = (map, x.to_bits(), y.to_bits());
        if let Some(&id) = self.node_ids.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node { map, x, y });
        self.node_ids.insert(key, id);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        self.nodes_by_map[map].push(id);
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.out_edges[from].push(Edge { to, kind });
        self.in_edges[to].push(Edge { to: from, kind });
        self.edge_count += 1;
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn nodes_on_map(&self, map: MapId) -> &[NodeId] {
        &self.nodes_by_map[map]
    }

    pub fn out_edges(&self, id: NodeId) -> &[Edge] {
        &self.out_edges[id]
    }

    pub fn in_edges(&self, id: NodeId) -> &[Edge] {
        &self.in_edges[id]
    }

    /// Cost of following `edge` out of `from`.
    pub fn edge_cost(&self, from: NodeId, edge: &Edge) -> f64 {
        match edge.kind {
            EdgeKind::Walk => {
                let a = &self.nodes[from];
                let b = &self.nodes[edge.to];
                distance(a.x, a.y, b.x, b.y)
            }
            EdgeKind::Transport { .. } | EdgeKind::Leave => self.transport_cost,
            EdgeKind::Town | EdgeKind::Jail => self.town_cost,
        }
    }

    /// Populates nodes and edges for one prepared map.
    pub fn add_map(&mut self, map_name: &str, grid: &Grid, data: &GameData) {
        let map_id = self.intern_map(map_name);
        let map_data = match data.map(map_name) {
            Some(m) => m,
            None => return,
        };

        let mut walkable_nodes: Vec<NodeId> = Vec::new();

        // Nodes at grid corners.
        for y in 1..grid.height() as i64 - 1 {
            for x in 1..grid.width() as i64 {
                if grid.cell(x, y) != Some(WALKABLE) {
                    continue;
                }
                if is_corner(grid, x, y) {
                    walkable_nodes.push(self.add_node(
                        map_id,
                        (x + grid.min_x()) as f64,
                        (y + grid.min_y()) as f64,
                    ));
                }
            }
        }

        // Nodes at the spawn closest to each transporter.
        let mut transporters: Vec<(f64, f64)> = Vec::new();
        for npc in &map_data.npcs {
            if npc.id != "transporter" {
                continue;
            }
            if let Some((_, spawn)) = data.closest_spawn(map_name, npc.x, npc.y) {
                walkable_nodes.push(self.add_node(map_id, spawn.x, spawn.y));
                transporters.push((npc.x, npc.y));
            }
        }

        // Nodes at the near-side spawn of every usable door.
        let mut doors: Vec<&Door> = Vec::new();
        for door in &map_data.doors {
            if door.locked || door.requires_key {
                continue;
            }
            if data.map(&door.map).map_or(true, |m| m.ignore) {
                continue;
            }
            if let Some(spawn) = map_data.spawns.get(door.near_spawn) {
                walkable_nodes.push(self.add_node(map_id, spawn.x, spawn.y));
                doors.push(door);
            }
        }

        // Nodes at every spawn.
        for spawn in &map_data.spawns {
            walkable_nodes.push(self.add_node(map_id, spawn.x, spawn.y));
        }

        // Walk edges between mutually visible nodes. This pairwise scan is
        // the dominant cost of preparing a large map.
        for i in 0..walkable_nodes.len() {
            let a = walkable_nodes[i];
            let (ax, ay) = {
                let n = self.node(a);
                (n.x, n.y)
            };

            for &b in walkable_nodes.iter().skip(i + 1) {
                let (bx, by) = {
                    let n = self.node(b);
                    (n.x, n.y)
                };
                if los::can_walk(grid, (ax, ay), (bx, by)) {
                    self.add_edge(a, b, EdgeKind::Walk);
                    self.add_edge(b, a, EdgeKind::Walk);
                }
            }

            // Door hops from nodes within reach of a door.
            for door in &doors {
                if door.distance_from(ax, ay) > DOOR_REACH_DISTANCE {
                    continue;
                }
                if let Some(spawn) = data.spawn(&door.map, door.spawn) {
                    let dest_map = self.intern_map(&door.map);
                    let dest = self.add_node(dest_map, spawn.x, spawn.y);
                    self.add_edge(a, dest, EdgeKind::Transport { spawn: door.spawn });
                }
            }

            // Transporter hops to every map the transporter serves.
            for &(tx, ty) in &transporters {
                if distance(ax, ay, tx, ty) > TRANSPORTER_REACH_DISTANCE {
                    continue;
                }
                let Some(places) = data.transporter_places() else {
                    continue;
                };
                let mut destinations: Vec<(&String, usize)> =
                    places.iter().map(|(m, &s)| (m, s)).collect();
                destinations.sort();
                for (to_map, spawn_id) in destinations {
                    if to_map == map_name {
                        continue;
                    }
                    if data.map(to_map).map_or(true, |m| m.ignore) {
                        continue;
                    }
                    if let Some(spawn) = data.spawn(to_map, spawn_id) {
                        let dest_map = self.intern_map(to_map);
                        let dest = self.add_node(dest_map, spawn.x, spawn.y);
                        self.add_edge(a, dest, EdgeKind::Transport { spawn: spawn_id });
                    }
                }
            }
        }

        // Town, jail, and leave edges.
        let town = data
            .primary_spawn(map_name)
            .map(|s| self.add_node(map_id, s.x, s.y));
        let jail = data.primary_spawn("jail").map(|s| {
            let jail_map = self.intern_map("jail");
            self.add_node(jail_map, s.x, s.y)
        });
        let leave = if map_data.leave {
            data.primary_spawn("main").map(|s| {
                let main_map = self.intern_map("main");
                self.add_node(main_map, s.x, s.y)
            })
        } else {
            None
        };

        for &node in &walkable_nodes {
            if let Some(town) = town {
                if node != town {
                    self.add_edge(node, town, EdgeKind::Town);
                }
            }
            if let Some(jail) = jail {
                if node != jail {
                    self.add_edge(node, jail, EdgeKind::Jail);
                }
            }
            if let Some(leave) = leave {
                self.add_edge(node, leave, EdgeKind::Leave);
            }
        }
    }
}

/// 8-neighborhood corner classification: four inside patterns (walkable cell
/// wedged into a blocked corner) and four outside patterns (walkable cell
/// rounding a blocked corner).
fn is_corner(grid: &Grid, x: i64, y: i64) -> bool {
    let uw = |dx: i64, dy: i64| grid.cell(x + dx, y + dy) == Some(UNWALKABLE);
    let wk = |dx: i64, dy: i64| grid.cell(x + dx, y + dy) == Some(WALKABLE);

    // Inside corners.
    if uw(-1, -1) && uw(0, -1) && uw(1, -1) && uw(-1, 0) && uw(-1, 1) {
        return true;
    }
    if uw(-1, -1) && uw(0, -1) && uw(1, -1) && uw(1, 0) && uw(1, 1) {
        return true;
    }
    if uw(1, -1) && uw(1, 0) && uw(-1, 1) && uw(0, 1) && uw(1, 1) {
        return true;
    }
    if uw(-1, -1) && uw(-1, 0) && uw(-1, 1) && uw(0, 1) && uw(1, 1) {
        return true;
    }

    // Outside corners.
    if uw(-1, -1) && wk(0, -1) && wk(-1, 0) {
        return true;
    }
    if wk(0, -1) && uw(1, -1) && wk(1, 0) {
        return true;
    }
    if wk(1, 0) && wk(0, 1) && uw(1, 1) {
        return true;
    }
    if wk(-1, 0) && uw(-1, 1) && wk(0, 1) {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::data::{MapData, MapGeometry, Segment, SpawnPoint};

    fn test_data() -> GameData {
        let mut data = GameData {
            geometry: HashMap::new(),
            maps: HashMap::new(),
            monsters: HashMap::new(),
            skills: HashMap::new(),
            items: HashMap::new(),
            npcs: HashMap::new(),
            classes: HashMap::new(),
        };
        data.geometry.insert(
            "main".to_string(),
            MapGeometry {
                min_x: -50,
                min_y: -50,
                max_x: 50,
                max_y: 50,
                x_lines: vec![Segment {
                    at: 5,
                    from: 10,
                    to: 20,
                }],
                y_lines: vec![],
            },
        );
        data.maps.insert(
            "main".to_string(),
            MapData {
                spawns: vec![
                    SpawnPoint {
                        x: 0.0,
                        y: 0.0,
                        facing: None,
                    },
                    SpawnPoint {
                        x: 30.0,
                        y: 30.0,
                        facing: None,
                    },
                ],
                doors: vec![],
                npcs: vec![],
                ..Default::default()
            },
        );
        data
    }

    fn build_graph(data: &GameData) -> (NavGraph, Grid) {
        let geometry = data.geometry("main").unwrap();
        let spawns = &data.map("main").unwrap().spawns;
        let grid = Grid::build(geometry, spawns);
        let mut graph = NavGraph::new();
        graph.add_map("main", &grid, data);
        (graph, grid)
    }

    #[test]
    fn test_spawns_become_nodes() {
        let data = test_data();
        let (graph, _) = build_graph(&data);
        let map_id = graph.map_id("main").unwrap();
        let nodes = graph.nodes_on_map(map_id);

        assert!(nodes
            .iter()
            .any(|&id| graph.node(id).x == 0.0 && graph.node(id).y == 0.0));
        assert!(nodes
            .iter()
            .any(|&id| graph.node(id).x == 30.0 && graph.node(id).y == 30.0));
    }

    #[test]
    fn test_wall_produces_corner_nodes() {
        let data = test_data();
        let (graph, _) = build_graph(&data);
        let map_id = graph.map_id("main").unwrap();
        // The padded wall band has corners; more nodes than just the spawns.
        assert!(graph.nodes_on_map(map_id).len() > 2);
    }

    #[test]
    fn test_walk_edges_are_bidirectional() {
        let data = test_data();
        let (graph, _) = build_graph(&data);
        let map_id = graph.map_id("main").unwrap();
        for &node in graph.nodes_on_map(map_id) {
            for edge in graph.out_edges(node) {
                if edge.kind == EdgeKind::Walk {
                    assert!(
                        graph
                            .out_edges(edge.to)
                            .iter()
                            .any(|back| back.kind == EdgeKind::Walk && back.to == node),
                        "walk edge {} -> {} has no reverse",
                        node,
                        edge.to
                    );
                }
            }
        }
    }

    #[test]
    fn test_every_node_has_a_town_edge() {
        let data = test_data();
        let (graph, _) = build_graph(&data);
        let map_id = graph.map_id("main").unwrap();
        let town = graph
            .nodes_on_map(map_id)
            .iter()
            .copied()
            .find(|&id| graph.node(id).x == 0.0 && graph.node(id).y == 0.0)
            .unwrap();

        for &node in graph.nodes_on_map(map_id) {
            if node == town {
                continue;
            }
            assert!(
                graph
                    .out_edges(node)
                    .iter()
                    .any(|e| e.kind == EdgeKind::Town && e.to == town),
                "node {} has no town edge",
                node
            );
        }
    }

    #[test]
    fn test_edge_costs() {
        let data = test_data();
        let (mut graph, _) = build_graph(&data);
        let map_id = graph.map_id("main").unwrap();
        let node = graph.nodes_on_map(map_id)[0];

        for edge in graph.out_edges(node) {
            let cost = graph.edge_cost(node, edge);
            match edge.kind {
                EdgeKind::Walk => {
                    let a = graph.node(node);
                    let b = graph.node(edge.to);
                    assert_eq!(cost, distance(a.x, a.y, b.x, b.y));
                }
                EdgeKind::Town | EdgeKind::Jail => assert_eq!(cost, TOWN_COST),
                EdgeKind::Transport { .. } | EdgeKind::Leave => assert_eq!(cost, TRANSPORT_COST),
            }
        }

        graph.set_costs(10.0, 100.0);
        assert_eq!(graph.transport_cost(), 10.0);
        assert_eq!(graph.town_cost(), 100.0);
    }
}
