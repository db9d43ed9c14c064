//! Translation of searched node paths into executable movement steps.

use crate::graph::{EdgeKind, NavGraph};
use crate::search::PathEdge;
use crate::PathError;
use shared::data::GameData;
use shared::{distance, Position};

/// One typed movement step of a planned route.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Straight walk to the point.
    Move { map: String, x: f64, y: f64 },
    /// Take a door or transporter to the destination spawn.
    Transport {
        map: String,
        x: f64,
        y: f64,
        spawn: usize,
    },
    /// Warp to the map's primary spawn.
    Town { map: String, x: f64, y: f64 },
    /// Leave a dead-end map for the default map.
    Leave { map: String, x: f64, y: f64 },
}

impl Step {
    pub fn map(&self) -> &str {
        match self {
            Step::Move { map, .. }
            | Step::Transport { map, .. }
            | Step::Town { map, .. }
            | Step::Leave { map, .. } => map,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Step::Move { map, x, y }
            | Step::Transport { map, x, y, .. }
            | Step::Town { map, x, y }
            | Step::Leave { map, x, y } => Position::new(map.clone(), *x, *y),
        }
    }
}

/// Total cost of a planned route, comparable across candidate destinations.
pub fn path_cost(steps: &[Step], transport_cost: f64, town_cost: f64) -> f64 {
    let mut cost = 0.0;
    if steps.is_empty() {
        return cost;
    }
    let mut current = steps[0].position();
    for step in &steps[1..] {
        match step {
            Step::Move { x, y, .. } => {
                cost += distance(current.x, current.y, *x, *y);
            }
            Step::Transport { .. } | Step::Leave { .. } => {
                cost += transport_cost;
            }
            Step::Town { .. } => {
                cost += town_cost;
            }
        }
        current = step.position();
    }
    cost
}

/// Turns searched edges into typed steps, inserting the auxiliary moves the
/// executor needs: a move to the transport point when the route starts on a
/// transport edge, and a move to the spawn after a town warp (warps do not
/// land exactly on the node). A long plain walk that ends on the map's
/// primary spawn is replaced by a warp when the warp is cheaper.
pub fn translate(
    graph: &NavGraph,
    data: &GameData,
    edges: &[PathEdge],
    from: &Position,
    to: &Position,
) -> Result<Vec<Step>, PathError> {
    let mut steps = vec![Step::Move {
        map: from.map.clone(),
        x: from.x,
        y: from.y,
    }];

    for (i, edge) in edges.iter().enumerate() {
        let to_node = graph.node(edge.to);
        let to_map = graph.map_name(to_node.map).to_string();

        match edge.kind {
            EdgeKind::Walk => {
                let from_node = graph.node(edge.from);
                let is_town_spawn = data
                    .primary_spawn(&to_map)
                    .map_or(false, |s| s.x == to_node.x && s.y == to_node.y);

                if is_town_spawn
                    && distance(from_node.x, from_node.y, to_node.x, to_node.y)
                        > graph.town_cost()
                {
                    // Warping is cheaper than walking all the way back.
                    steps.push(Step::Town {
                        map: to_map.clone(),
                        x: to_node.x,
                        y: to_node.y,
                    });
                    steps.push(Step::Move {
                        map: to_map,
                        x: to_node.x,
                        y: to_node.y,
                    });
                } else {
                    steps.push(Step::Move {
                        map: to_map,
                        x: to_node.x,
                        y: to_node.y,
                    });
                }
            }
            EdgeKind::Transport { spawn } => {
                if i == 0 {
                    // We have to reach the transport point before taking it.
                    let from_node = graph.node(edge.from);
                    steps.push(Step::Move {
                        map: graph.map_name(from_node.map).to_string(),
                        x: from_node.x,
                        y: from_node.y,
                    });
                }
                steps.push(Step::Transport {
                    map: to_map,
                    x: to_node.x,
                    y: to_node.y,
                    spawn,
                });
            }
            EdgeKind::Town => {
                steps.push(Step::Town {
                    map: to_map.clone(),
                    x: to_node.x,
                    y: to_node.y,
                });
                if let Some(spawn) = data.primary_spawn(&to_map) {
                    steps.push(Step::Move {
                        map: to_map,
                        x: spawn.x,
                        y: spawn.y,
                    });
                }
            }
            EdgeKind::Leave => {
                steps.push(Step::Leave {
                    map: to_map,
                    x: to_node.x,
                    y: to_node.y,
                });
            }
            EdgeKind::Jail => {
                // Nothing the client can emit performs this relocation.
                return Err(PathError::UnsupportedStep);
            }
        }
    }

    steps.push(Step::Move {
        map: to.map.clone(),
        x: to.x,
        y: to.y,
    });

    Ok(steps)
}
