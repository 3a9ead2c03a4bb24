//! Value types for the abstract reachability graph (ARG) and the oracle wire
//! protocol.
//!
//! An ARG node is one abstract state of the analyzed program. Many ARG nodes
//! share a CFG node: the underlying control-flow location. Edges come in three
//! kinds: CFG edges follow control flow, entry edges represent function calls
//! (possibly spawning a thread), return edges connect a function's return node
//! back to the caller's successor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A source range, project-relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub end_column: u32,
}

impl Location {
    pub fn point(file: impl Into<String>, line: u32, column: u32) -> Location {
        Location {
            file: file.into(),
            line,
            column,
            end_line: line,
            end_column: column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Control-flow edge. `node` and `cfg_node` name the far end of the edge:
/// the successor in an outgoing list, the predecessor in an incoming one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    pub node: String,
    pub cfg_node: String,
    #[serde(default)]
    pub statement: String,
}

/// Function call edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryEdge {
    pub node: String,
    pub cfg_node: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub creates_new_thread: bool,
}

/// Function return edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnEdge {
    pub node: String,
    pub cfg_node: String,
}

/// Any ARG edge. All variants carry the ARG node and CFG node at the far end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeInfo {
    Cfg(CfgEdge),
    Entry(EntryEdge),
    Return(ReturnEdge),
}

impl EdgeInfo {
    pub fn node_id(&self) -> &str {
        match self {
            EdgeInfo::Cfg(e) => &e.node,
            EdgeInfo::Entry(e) => &e.node,
            EdgeInfo::Return(e) => &e.node,
        }
    }

    pub fn cfg_node_id(&self) -> &str {
        match self {
            EdgeInfo::Cfg(e) => &e.cfg_node,
            EdgeInfo::Entry(e) => &e.cfg_node,
            EdgeInfo::Return(e) => &e.cfg_node,
        }
    }

    pub fn creates_new_thread(&self) -> bool {
        matches!(self, EdgeInfo::Entry(e) if e.creates_new_thread)
    }
}

/// One ARG node with its adjacency, as used by the stepping engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub cfg_node_id: String,
    pub function: String,
    pub location: Location,
    pub outgoing_cfg: Vec<CfgEdge>,
    pub incoming_cfg: Vec<CfgEdge>,
    pub outgoing_entry: Vec<EntryEdge>,
    pub incoming_entry: Vec<EntryEdge>,
    pub outgoing_return: Vec<ReturnEdge>,
}

impl NodeInfo {
    /// Return nodes have no control-flow successors, only return edges.
    pub fn is_return_node(&self) -> bool {
        self.outgoing_cfg.is_empty() && !self.outgoing_return.is_empty()
    }

    pub fn with_location(mut self, location: Location) -> NodeInfo {
        self.location = location;
        self
    }
}

/// Parameters of an `arg_lookup` query. With neither field set the oracle
/// answers with the program entry nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl LookupParams {
    pub fn entry() -> LookupParams {
        LookupParams::default()
    }

    pub fn by_node(node_id: impl Into<String>) -> LookupParams {
        LookupParams {
            node: Some(node_id.into()),
            location: None,
        }
    }

    pub fn by_location(location: Location) -> LookupParams {
        LookupParams {
            node: None,
            location: Some(location),
        }
    }
}

/// One `arg_lookup` hit. Adjacency comes as flat `next`/`prev` edge lists
/// which [`LookupResult::into_node_info`] splits by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResult {
    pub node: String,
    pub cfg_node: String,
    pub function: String,
    pub location: Location,
    #[serde(default)]
    pub next: Vec<EdgeInfo>,
    #[serde(default)]
    pub prev: Vec<EdgeInfo>,
}

impl LookupResult {
    pub fn into_node_info(self) -> NodeInfo {
        let mut info = NodeInfo {
            node_id: self.node,
            cfg_node_id: self.cfg_node,
            function: self.function,
            location: self.location,
            outgoing_cfg: vec![],
            incoming_cfg: vec![],
            outgoing_entry: vec![],
            incoming_entry: vec![],
            outgoing_return: vec![],
        };
        for edge in self.next {
            match edge {
                EdgeInfo::Cfg(e) => info.outgoing_cfg.push(e),
                EdgeInfo::Entry(e) => info.outgoing_entry.push(e),
                EdgeInfo::Return(e) => info.outgoing_return.push(e),
            }
        }
        for edge in self.prev {
            match edge {
                EdgeInfo::Cfg(e) => info.incoming_cfg.push(e),
                EdgeInfo::Entry(e) => info.incoming_entry.push(e),
                // Incoming return edges carry no information the engine uses.
                EdgeInfo::Return(_) => {}
            }
        }
        info
    }
}

/// Result of an `arg_eval_int` query. `raw` is the analyzer's domain value,
/// `int` is set when the value is a single known integer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvalIntResult {
    pub raw: serde_json::Value,
    #[serde(default)]
    pub int: Option<i64>,
}
