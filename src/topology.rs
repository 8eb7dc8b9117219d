//! Node placement.
//!
//! Nodes are laid out row-first on a fixed grid so that sweeps over the node
//! count always place node `i` at the same position. Every node shares one
//! broadcast medium; positions are informational only for this scope.

use crate::NodeId;
use serde::Serialize;
use std::fmt;

/// Row-first grid position allocator.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GridLayout {
    pub min_x: f64,
    pub min_y: f64,
    /// Spacing between columns.
    pub delta_x: f64,
    /// Spacing between rows.
    pub delta_y: f64,
    /// Nodes per row.
    pub grid_width: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            delta_x: 5.0,
            delta_y: 10.0,
            grid_width: 3,
        }
    }
}

impl GridLayout {
    /// Position of the `index`-th node.
    pub fn position(&self, index: usize) -> Position {
        let width = self.grid_width.max(1);
        Position {
            x: self.min_x + self.delta_x * (index % width) as f64,
            y: self.min_y + self.delta_y * (index / width) as f64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// How a node moves. Only fixed positions are modelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Mobility {
    ConstantPosition,
}

/// A simulated endpoint. Its contention state lives in the MAC, indexed by
/// the same id.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub position: Position,
    pub mobility: Mobility,
}

/// Build `node_count` nodes placed on `layout`.
pub fn build(node_count: usize, layout: &GridLayout) -> Vec<Node> {
    (0..node_count)
        .map(|id| Node {
            id,
            position: layout.position(id),
            mobility: Mobility::ConstantPosition,
        })
        .collect()
}
