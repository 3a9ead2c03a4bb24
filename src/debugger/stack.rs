//! Call-stack assembly and graph searches over the ARG.
//!
//! The ARG may contain cycles, so every traversal keeps a visited set keyed by
//! node id.

use std::collections::HashSet;

use crate::arg::NodeInfo;
use crate::debugger::Debugger;
use crate::debugger::error::Error;
use crate::debugger::thread::StackFrame;

impl Debugger {
    /// Assemble the innermost-first stack for a leaf node by walking entry
    /// edges towards the callers.
    ///
    /// Callers are followed only while unique; once an entry node has several
    /// incoming entry edges, one frame is pushed per candidate caller (marked
    /// ambiguous) and the walk ends. Crossing a thread-creating entry edge
    /// bumps the synthetic thread index of the outer frames.
    pub(super) fn assemble_stack_trace(&mut self, leaf: NodeInfo) -> Result<Vec<StackFrame>, Error> {
        let mut local_thread_index = 0;
        let mut current = leaf.clone();
        let mut frames = vec![StackFrame::new(Some(leaf), false, local_thread_index)];

        loop {
            let entry_node = self.entry_node_of(&current)?;
            let incoming = entry_node.incoming_entry;
            if incoming.is_empty() {
                break;
            }

            let ambiguous = incoming.len() > 1;
            for edge in &incoming {
                if edge.creates_new_thread {
                    local_thread_index += 1;
                }
                let caller = self.oracle.lookup_node(&edge.node)?;
                frames.push(StackFrame::new(
                    Some(caller.clone()),
                    ambiguous,
                    local_thread_index,
                ));
                current = caller;
            }

            if incoming.len() != 1 {
                break;
            }
        }

        Ok(frames)
    }

    /// The innermost ancestor of `node` (over incoming CFG edges) that has no
    /// incoming CFG edges itself, i.e. the entry node of its function.
    pub(super) fn entry_node_of(&mut self, node: &NodeInfo) -> Result<NodeInfo, Error> {
        let mut seen = HashSet::new();
        self.entry_node_search(node, &mut seen)?
            .ok_or_else(|| Error::internal(format!("no entry node found for node {}", node.node_id)))
    }

    fn entry_node_search(
        &mut self,
        node: &NodeInfo,
        seen: &mut HashSet<String>,
    ) -> Result<Option<NodeInfo>, Error> {
        if node.incoming_cfg.is_empty() {
            return Ok(Some(node.clone()));
        }
        if !seen.insert(node.node_id.clone()) {
            return Ok(None);
        }
        for edge in &node.incoming_cfg {
            let predecessor = self.oracle.lookup_node(&edge.node)?;
            if let Some(entry) = self.entry_node_search(&predecessor, seen)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// All nodes reachable from `node` over outgoing CFG edges (including
    /// `node` itself) that satisfy `condition`.
    pub(super) fn find_reachable(
        &mut self,
        node: &NodeInfo,
        condition: fn(&NodeInfo) -> bool,
    ) -> Result<Vec<NodeInfo>, Error> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        self.find_reachable_search(node, condition, &mut seen, &mut found)?;
        Ok(found)
    }

    fn find_reachable_search(
        &mut self,
        node: &NodeInfo,
        condition: fn(&NodeInfo) -> bool,
        seen: &mut HashSet<String>,
        found: &mut Vec<NodeInfo>,
    ) -> Result<(), Error> {
        if !seen.insert(node.node_id.clone()) {
            return Ok(());
        }
        if condition(node) {
            found.push(node.clone());
        }
        for edge in &node.outgoing_cfg {
            let successor = self.oracle.lookup_node(&edge.node)?;
            self.find_reachable_search(&successor, condition, seen, found)?;
        }
        Ok(())
    }
}
