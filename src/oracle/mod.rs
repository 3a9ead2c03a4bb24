//! Query facade over the remote analyzer.
//!
//! The analyzer owns the abstract reachability graph; this module only asks
//! questions about it. Three wire calls exist (`arg_lookup`, `arg_state`,
//! `arg_eval_int`), abstracted behind [`OracleTransport`] so tests can serve
//! a fixed graph without a socket.

pub mod json_rpc;

use serde_json::Value;

use crate::arg::{EvalIntResult, LookupParams, LookupResult, NodeInfo};

pub trait OracleTransport {
    fn arg_lookup(&mut self, params: &LookupParams) -> Result<Vec<LookupResult>, OracleError>;
    fn arg_state(&mut self, node_id: &str) -> Result<Value, OracleError>;
    fn arg_eval_int(
        &mut self,
        node_id: &str,
        expression: &str,
    ) -> Result<EvalIntResult, OracleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("analyzer unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
    #[error("{0}")]
    Rejected(String),
    #[error("node with id {0} not found")]
    NodeNotFound(String),
    #[error("multiple nodes with id {0} found")]
    AmbiguousNode(String),
    #[error("malformed analyzer response: {0}")]
    Protocol(String),
}

impl OracleError {
    /// True for errors that carry analyzer feedback the user should see
    /// verbatim, as opposed to transport failures.
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            OracleError::Rejected(_) | OracleError::NodeNotFound(_) | OracleError::AmbiguousNode(_)
        )
    }
}

/// Synchronous convenience layer over a transport.
pub struct OracleClient {
    transport: Box<dyn OracleTransport>,
}

impl OracleClient {
    pub fn new(transport: impl OracleTransport + 'static) -> OracleClient {
        OracleClient {
            transport: Box::new(transport),
        }
    }

    /// All nodes matching `params`, with return-node locations patched.
    pub fn lookup_nodes(&mut self, params: &LookupParams) -> Result<Vec<NodeInfo>, OracleError> {
        let results = self.transport.arg_lookup(params)?;
        Ok(results
            .into_iter()
            .map(|result| patch_return_location(result.into_node_info()))
            .collect())
    }

    /// The unique node with the given id.
    pub fn lookup_node(&mut self, node_id: &str) -> Result<NodeInfo, OracleError> {
        let mut nodes = self.lookup_nodes(&LookupParams::by_node(node_id))?;
        if nodes.len() > 1 {
            return Err(OracleError::AmbiguousNode(node_id.to_string()));
        }
        nodes
            .pop()
            .ok_or_else(|| OracleError::NodeNotFound(node_id.to_string()))
    }

    /// The full abstract state of a node, an opaque tree.
    pub fn fetch_state(&mut self, node_id: &str) -> Result<Value, OracleError> {
        self.transport.arg_state(node_id)
    }

    /// Evaluate an integer expression in the abstract state of a node.
    /// A rejection usually means the expression itself is invalid and the
    /// message explains why.
    pub fn eval_int(
        &mut self,
        node_id: &str,
        expression: &str,
    ) -> Result<EvalIntResult, OracleError> {
        self.transport.arg_eval_int(node_id, expression)
    }
}

/// A return node's reported range spans the whole function; collapse it to the
/// end of the last line so the client highlights something sensible.
fn patch_return_location(node: NodeInfo) -> NodeInfo {
    if !node.is_return_node() {
        return node;
    }
    let end = crate::arg::Location {
        file: node.location.file.clone(),
        line: node.location.end_line,
        column: node.location.end_column,
        end_line: node.location.end_line,
        end_column: node.location.end_column,
    };
    node.with_location(end)
}
