//! Walkability grids, navigation graph, and route planning over the game
//! world.
//!
//! All maps reachable from the starting map are prepared up front by
//! [`PathfinderBuilder::prepare`]; the result is an immutable [`Pathfinder`]
//! that is shared behind an `Arc` and queried concurrently without locks.

pub mod graph;
pub mod grid;
pub mod los;
pub mod route;
pub mod search;

use graph::{NavGraph, NodeId};
use grid::Grid;
use log::{error, info};
use shared::data::GameData;
use shared::{distance, Position};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use graph::EdgeKind;
pub use route::Step;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("no path found between the requested positions")]
    NoPath,
    #[error("route requires a step that cannot be executed")]
    UnsupportedStep,
}

/// Builds grids and the navigation graph during the single-threaded
/// preparation phase.
pub struct PathfinderBuilder {
    data: Arc<GameData>,
    grids: HashMap<String, Grid>,
    graph: NavGraph,
}

impl PathfinderBuilder {
    pub fn new(data: Arc<GameData>) -> Self {
        PathfinderBuilder {
            data,
            grids: HashMap::new(),
            graph: NavGraph::new(),
        }
    }

    /// Overrides the fixed transport/town edge costs before preparation.
    pub fn with_costs(mut self, transport_cost: f64, town_cost: f64) -> Self {
        self.graph.set_costs(transport_cost, town_cost);
        self
    }

    /// Builds the grid and graph for one map. Missing geometry is a
    /// programmer error or corrupt reference data, not a runtime condition.
    pub fn prepare_map(&mut self, map: &str) {
        if self.grids.contains_key(map) {
            return;
        }
        let geometry = self
            .data
            .geometry(map)
            .unwrap_or_else(|| panic!("no geometry for map '{}'", map));
        let map_data = self
            .data
            .map(map)
            .unwrap_or_else(|| panic!("no map data for '{}'", map));

        info!("Preparing {}...", map);
        let grid = Grid::build(geometry, &map_data.spawns);
        self.graph.add_map(map, &grid, &self.data);
        self.grids.insert(map.to_string(), grid);
    }

    /// Prepares every map reachable from `start_map` through doors and the
    /// transporter network, plus the disconnected jail map, and freezes the
    /// result.
    pub fn prepare(mut self, start_map: &str) -> Pathfinder {
        info!("Preparing pathfinding...");

        let mut maps: Vec<String> = vec![start_map.to_string()];
        let mut i = 0;
        while i < maps.len() {
            let map = maps[i].clone();
            if let Some(map_data) = self.data.map(&map) {
                for door in &map_data.doors {
                    if door.locked || door.requires_key {
                        continue;
                    }
                    if maps.contains(&door.map) {
                        continue;
                    }
                    if self.data.map(&door.map).map_or(false, |m| !m.ignore) {
                        maps.push(door.map.clone());
                    }
                }
            }
            i += 1;
        }

        if let Some(places) = self.data.transporter_places() {
            let mut destinations: Vec<&String> = places.keys().collect();
            destinations.sort();
            for map in destinations {
                if maps.contains(map) {
                    continue;
                }
                if self.data.map(map).map_or(false, |m| !m.ignore) {
                    maps.push(map.clone());
                }
            }
        }

        for map in &maps {
            self.prepare_map(map);
        }

        // Jail is disconnected from everything; prepare it separately.
        if self.data.map("jail").is_some() && self.data.geometry("jail").is_some() {
            self.prepare_map("jail");
        }

        info!(
            "Pathfinding prepared! ({} nodes, {} edges, {} maps)",
            self.graph.node_count(),
            self.graph.edge_count(),
            self.grids.len()
        );

        Pathfinder {
            data: self.data,
            grids: self.grids,
            graph: self.graph,
        }
    }
}

/// Frozen pathfinding state: per-map walkability grids and the global
/// navigation graph. Immutable after preparation; safe for unsynchronized
/// concurrent reads.
pub struct Pathfinder {
    data: Arc<GameData>,
    grids: HashMap<String, Grid>,
    graph: NavGraph,
}

impl Pathfinder {
    /// The walkability grid for a prepared map. Asking for an unprepared
    /// map is a programmer error.
    pub fn grid(&self, map: &str) -> &Grid {
        self.grids
            .get(map)
            .unwrap_or_else(|| panic!("map '{}' was not prepared", map))
    }

    pub fn has_map(&self, map: &str) -> bool {
        self.grids.contains_key(map)
    }

    pub fn graph(&self) -> &NavGraph {
        &self.graph
    }

    pub fn data(&self) -> &GameData {
        &self.data
    }

    /// Whether a straight walk between the two points stays on walkable
    /// cells. Always false across maps.
    pub fn can_walk(&self, from: &Position, to: &Position) -> bool {
        if from.map != to.map {
            return false;
        }
        los::can_walk(self.grid(&from.map), (from.x, from.y), (to.x, to.y))
    }

    /// The furthest point on the line from `from` toward `to` we can safely
    /// walk to. If `from` is somewhere it should not be (not walkable), we
    /// log the violation and fall back to the closest graph node.
    pub fn safe_walk_to(&self, from: &Position, to: &Position) -> Position {
        assert_eq!(from.map, to.map, "cannot walk across maps");

        match los::safe_walk_to(self.grid(&from.map), (from.x, from.y), (to.x, to.y)) {
            Some((x, y)) => Position::new(from.map.clone(), x, y),
            None => {
                error!(
                    "safe_walk_to: we should not be able to be at {}:{},{}",
                    from.map, from.x, from.y
                );
                match self.find_closest_node(&from.map, from.x, from.y) {
                    Some(node) => self.node_position(node),
                    None => from.clone(),
                }
            }
        }
    }

    pub fn node_position(&self, id: NodeId) -> Position {
        let node = self.graph.node(id);
        Position::new(self.graph.map_name(node.map).to_string(), node.x, node.y)
    }

    /// The closest graph node on `map`, preferring one we can walk straight
    /// to over the geometrically nearest (which may sit across a wall).
    pub fn find_closest_node(&self, map: &str, x: f64, y: f64) -> Option<NodeId> {
        let map_id = self.graph.map_id(map)?;
        let grid = self.grids.get(map)?;

        let mut closest: (f64, Option<NodeId>) = (f64::MAX, None);
        let mut closest_walkable: (f64, Option<NodeId>) = (f64::MAX, None);

        for &id in self.graph.nodes_on_map(map_id) {
            let node = self.graph.node(id);
            let d = distance(x, y, node.x, node.y);
            // No point running line-of-sight on nodes beyond the closest.
            if d > closest.0 {
                continue;
            }
            let walkable = los::can_walk(grid, (x, y), (node.x, node.y));
            if d < closest.0 {
                closest = (d, Some(id));
            }
            if walkable && d < closest_walkable.0 {
                closest_walkable = (d, Some(id));
            }
            if d < 1.0 {
                break;
            }
        }

        closest_walkable.1.or(closest.1)
    }

    /// Plans a route between two positions as an ordered list of typed
    /// steps. The first and last steps are always moves at the endpoints.
    pub fn find_path(&self, from: &Position, to: &Position) -> Result<Vec<Step>, PathError> {
        // Straight line beats the graph when it works.
        if from.map == to.map && self.can_walk(from, to) {
            return Ok(vec![
                Step::Move {
                    map: from.map.clone(),
                    x: from.x,
                    y: from.y,
                },
                Step::Move {
                    map: to.map.clone(),
                    x: to.x,
                    y: to.y,
                },
            ]);
        }

        let from_node = self
            .find_closest_node(&from.map, from.x, from.y)
            .ok_or(PathError::NoPath)?;
        let to_node = self
            .find_closest_node(&to.map, to.x, to.y)
            .ok_or(PathError::NoPath)?;

        let edges = search::shortest_path(&self.graph, from_node, to_node).ok_or(PathError::NoPath)?;
        route::translate(&self.graph, &self.data, &edges, from, to)
    }

    /// Total cost of a planned route using this graph's cost constants.
    pub fn path_cost(&self, steps: &[Step]) -> f64 {
        route::path_cost(steps, self.graph.transport_cost(), self.graph.town_cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::data::{Door, MapData, MapGeometry, NpcData, NpcPlacement, Segment, SpawnPoint};

    fn spawn(x: f64, y: f64) -> SpawnPoint {
        SpawnPoint { x, y, facing: None }
    }

    fn geometry() -> MapGeometry {
        MapGeometry {
            min_x: -100,
            min_y: -100,
            max_x: 100,
            max_y: 100,
            x_lines: vec![],
            y_lines: vec![],
        }
    }

    /// Two maps joined by a door near main's second spawn.
    fn two_map_world() -> Arc<GameData> {
        let mut data = GameData {
            geometry: HashMap::new(),
            maps: HashMap::new(),
            monsters: HashMap::new(),
            skills: HashMap::new(),
            items: HashMap::new(),
            npcs: HashMap::new(),
            classes: HashMap::new(),
        };
        data.geometry.insert("main".to_string(), geometry());
        data.geometry.insert("bank".to_string(), geometry());
        data.maps.insert(
            "main".to_string(),
            MapData {
                spawns: vec![spawn(0.0, 0.0), spawn(60.0, 0.0)],
                doors: vec![Door {
                    x: 70.0,
                    y: 0.0,
                    width: 10.0,
                    height: 8.0,
                    map: "bank".to_string(),
                    spawn: 0,
                    near_spawn: 1,
                    locked: false,
                    requires_key: false,
                }],
                npcs: vec![],
                ..Default::default()
            },
        );
        data.maps.insert(
            "bank".to_string(),
            MapData {
                spawns: vec![spawn(0.0, 0.0)],
                doors: vec![],
                npcs: vec![],
                ..Default::default()
            },
        );
        Arc::new(data)
    }

    #[test]
    fn test_prepare_follows_doors() {
        let pathfinder = PathfinderBuilder::new(two_map_world()).prepare("main");
        assert!(pathfinder.has_map("main"));
        assert!(pathfinder.has_map("bank"));
    }

    #[test]
    fn test_find_path_same_point_is_trivial() {
        let pathfinder = PathfinderBuilder::new(two_map_world()).prepare("main");
        let p = Position::new("main", 10.0, 10.0);
        let steps = pathfinder.find_path(&p, &p).unwrap();
        assert_eq!(pathfinder.path_cost(&steps), 0.0);
    }

    #[test]
    fn test_find_path_straight_line() {
        let pathfinder = PathfinderBuilder::new(two_map_world()).prepare("main");
        let from = Position::new("main", 0.0, 0.0);
        let to = Position::new("main", 20.0, 20.0);
        let steps = pathfinder.find_path(&from, &to).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(&steps[1], Step::Move { x, y, .. } if *x == 20.0 && *y == 20.0));
    }

    #[test]
    fn test_find_path_through_door() {
        let pathfinder = PathfinderBuilder::new(two_map_world()).prepare("main");
        let from = Position::new("main", 0.0, 0.0);
        let to = Position::new("bank", 10.0, 0.0);
        let steps = pathfinder.find_path(&from, &to).unwrap();

        assert!(steps
            .iter()
            .any(|s| matches!(s, Step::Transport { map, .. } if map == "bank")));
        assert_eq!(steps.last().unwrap().map(), "bank");
    }

    #[test]
    fn test_find_path_walks_around_wall() {
        let mut data = (*two_map_world()).clone();
        data.geometry.get_mut("main").unwrap().x_lines.push(Segment {
            at: 20,
            from: -30,
            to: 30,
        });
        let pathfinder = PathfinderBuilder::new(Arc::new(data)).prepare("main");

        let from = Position::new("main", 0.0, 0.0);
        let to = Position::new("main", 40.0, 0.0);
        assert!(!pathfinder.can_walk(&from, &to));

        let steps = pathfinder.find_path(&from, &to).unwrap();
        // Every consecutive pair of moves on the same map must be walkable.
        let mut previous: Option<Position> = None;
        for step in &steps {
            if let Step::Move { .. } = step {
                let position = step.position();
                if let Some(prev) = previous {
                    if prev.map == position.map {
                        assert!(
                            pathfinder.can_walk(&prev, &position),
                            "planned move crosses a wall: {:?} -> {:?}",
                            prev,
                            position
                        );
                    }
                }
                previous = Some(position);
            } else {
                previous = Some(step.position());
            }
        }
    }

    #[test]
    fn test_transporter_and_door_prefer_cheaper() {
        // Door next to the start, transporter far away: the door wins.
        let mut data = (*two_map_world()).clone();
        data.maps.get_mut("main").unwrap().npcs.push(NpcPlacement {
            id: "transporter".to_string(),
            x: -80.0,
            y: -80.0,
        });
        data.maps
            .get_mut("main")
            .unwrap()
            .spawns
            .push(spawn(-80.0, -80.0));
        let mut places = HashMap::new();
        places.insert("bank".to_string(), 0);
        data.npcs.insert(
            "transporter".to_string(),
            NpcData {
                places: Some(places),
                items: None,
            },
        );

        let pathfinder = PathfinderBuilder::new(Arc::new(data)).prepare("main");
        let from = Position::new("main", 55.0, 0.0);
        let to = Position::new("bank", 0.0, 0.0);
        let steps = pathfinder.find_path(&from, &to).unwrap();

        // The cheap route goes through the door at (70, 0), not the far
        // transporter; no intermediate move should head to (-80, -80).
        assert!(!steps
            .iter()
            .any(|s| matches!(s, Step::Move { x, y, .. } if *x == -80.0 && *y == -80.0)));
    }

    #[test]
    fn test_town_cost_flips_warp_preference() {
        // A wall forces the route to the spawn through the graph; whether
        // the final hop walks or warps depends only on the town cost.
        let mut data = (*two_map_world()).clone();
        data.geometry.get_mut("main").unwrap().x_lines.push(Segment {
            at: 20,
            from: -30,
            to: 30,
        });
        let data = Arc::new(data);

        let from = Position::new("main", 40.0, 0.0);
        let to = Position::new("main", 0.0, 0.0);

        let default_costs = PathfinderBuilder::new(Arc::clone(&data)).prepare("main");
        assert!(!default_costs.can_walk(&from, &to));
        let steps = default_costs.find_path(&from, &to).unwrap();
        assert!(
            steps.iter().all(|s| matches!(s, Step::Move { .. })),
            "short detour should stay on foot: {:?}",
            steps
        );

        let cheap_town = PathfinderBuilder::new(data)
            .with_costs(shared::TRANSPORT_COST, 10.0)
            .prepare("main");
        let steps = cheap_town.find_path(&from, &to).unwrap();
        assert!(
            steps.iter().any(|s| matches!(s, Step::Town { .. })),
            "a 10-unit town warp should beat walking around the wall: {:?}",
            steps
        );
    }
}
