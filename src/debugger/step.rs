//! Stepping over the abstract reachability graph.
//!
//! Every operation picks a desired motion on the primary thread (the one
//! named in the request) and then attempts the same motion on every other
//! tracked thread. Threads that cannot follow lose their location; threads
//! that can follow advance in lockstep. The full move is resolved before any
//! thread state mutates, so a failed step leaves the store untouched.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use crate::arg::{EdgeInfo, LookupParams, NodeInfo};
use crate::dap::protocol::StepInTarget;
use crate::debugger::error::Error;
use crate::debugger::thread::{StackFrame, ThreadState};
use crate::debugger::{Debugger, StopReason};

/// Base of step-in target ids denoting CFG branch targets.
pub const CFG_STEP_OFFSET: i64 = 1_000_000;
/// Base of step-in target ids denoting function entry targets.
pub const ENTRY_STEP_OFFSET: i64 = 2_000_000;

fn cfg_candidates(node: &NodeInfo) -> Vec<EdgeInfo> {
    node.outgoing_cfg.iter().cloned().map(EdgeInfo::Cfg).collect()
}

fn entry_candidates(node: &NodeInfo) -> Vec<EdgeInfo> {
    node.outgoing_entry
        .iter()
        .cloned()
        .map(EdgeInfo::Entry)
        .collect()
}

impl Debugger {
    /// DAP `next`.
    pub fn step_over(&mut self, thread_id: i64) -> Result<(), Error> {
        let thread = self.thread_state(thread_id)?;
        let Some(current) = thread.current_frame().node().cloned() else {
            return Err(Error::user_facing("Cannot step over. Location is unavailable."));
        };

        if current.outgoing_cfg.is_empty() {
            if current.outgoing_return.is_empty() {
                return Err(Error::user_facing("Cannot step over. Reached last statement."));
            }
            // At a return node stepping over means stepping out.
            return self.step_out(thread_id);
        }

        for (id, thread) in &self.threads {
            let Some(node) = thread.current_frame().node() else {
                continue;
            };
            if node.outgoing_cfg.len() > 1 && !node.outgoing_entry.is_empty() {
                let suffix = if *id == thread_id {
                    String::new()
                } else {
                    format!(" for {}", thread.name())
                };
                return Err(Error::user_facing(format!(
                    "Ambiguous path through function{suffix}. Step into function to choose the desired path."
                )));
            }
        }

        if current.outgoing_cfg.len() > 1 {
            return Err(Error::user_facing(
                "Branching control flow. Use step into target to choose the desired branch.",
            ));
        }

        let target_edge = EdgeInfo::Cfg(current.outgoing_cfg[0].clone());
        self.step_all_threads_along_matching_edge(thread_id, &target_edge, cfg_candidates, false)
    }

    /// DAP `stepIn`. Without an explicit target steps into the only function
    /// call, or falls back to step over when there is none.
    pub fn step_in(&mut self, thread_id: i64, target_id: Option<i64>) -> Result<(), Error> {
        let thread = self.thread_state(thread_id)?;
        let Some(current) = thread.current_frame().node().cloned() else {
            return Err(Error::user_facing("Cannot step in. Location is unavailable."));
        };

        let target_id = match target_id {
            Some(id) => id,
            None if current.outgoing_entry.len() == 1 => ENTRY_STEP_OFFSET,
            None if current.outgoing_entry.len() > 1 => {
                return Err(Error::user_facing(
                    "Ambiguous function call. Use step into target to choose the desired call",
                ));
            }
            None => return self.step_over(thread_id),
        };

        if target_id >= ENTRY_STEP_OFFSET {
            let index = (target_id - ENTRY_STEP_OFFSET) as usize;
            let edge = current
                .outgoing_entry
                .get(index)
                .ok_or_else(|| Error::internal(format!("unknown step in target: {target_id}")))?
                .clone();
            self.step_all_threads_along_matching_edge(
                thread_id,
                &EdgeInfo::Entry(edge),
                entry_candidates,
                true,
            )
        } else if target_id >= CFG_STEP_OFFSET {
            let index = (target_id - CFG_STEP_OFFSET) as usize;
            let edge = current
                .outgoing_cfg
                .get(index)
                .ok_or_else(|| Error::internal(format!("unknown step in target: {target_id}")))?
                .clone();
            self.step_all_threads_along_matching_edge(
                thread_id,
                &EdgeInfo::Cfg(edge),
                cfg_candidates,
                false,
            )
        } else {
            Err(Error::internal(format!("unknown step in target: {target_id}")))
        }
    }

    /// DAP `stepInTargets` for the thread owning `frame_id`.
    ///
    /// Function calls are always offered; CFG branches only when there is no
    /// call to step over and control flow actually branches. Target ids encode
    /// the edge index before sorting.
    pub fn step_in_targets(&mut self, frame_id: i64) -> Result<Vec<StepInTarget>, Error> {
        let thread = self.thread_by_frame_id(frame_id)?;
        let Some(current) = thread.current_frame().node().cloned() else {
            return Ok(Vec::new());
        };

        let mut targets = Vec::new();
        for (index, edge) in current.outgoing_entry.iter().enumerate() {
            let kind = if edge.creates_new_thread { "thread" } else { "call" };
            targets.push(StepInTarget {
                id: ENTRY_STEP_OFFSET + index as i64,
                label: format!("{kind}: {}({})", edge.function, edge.args.join(", ")),
                line: current.location.line,
                column: current.location.column,
                end_line: current.location.end_line,
                end_column: current.location.end_column,
            });
        }

        if current.outgoing_entry.is_empty() && current.outgoing_cfg.len() > 1 {
            for (index, edge) in current.outgoing_cfg.iter().enumerate() {
                let node = self.oracle.lookup_node(&edge.node)?;
                targets.push(StepInTarget {
                    id: CFG_STEP_OFFSET + index as i64,
                    label: format!("branch: {}", edge.statement),
                    line: node.location.line,
                    column: node.location.column,
                    end_line: node.location.end_line,
                    end_column: node.location.end_column,
                });
            }
        }

        // Present targets in the order they appear in code.
        targets.sort_by_key(|target| (target.line, target.column));
        Ok(targets)
    }

    /// DAP `stepOut`.
    pub fn step_out(&mut self, thread_id: i64) -> Result<(), Error> {
        let target_thread = self.thread_state(thread_id)?;
        if target_thread.current_frame().node().is_none() {
            return Err(Error::user_facing("Cannot step out. Location is unavailable."));
        }
        let Some(previous) = target_thread.previous_frame() else {
            return Err(Error::user_facing("Cannot step out. Reached top of call stack."));
        };
        if previous.is_ambiguous() {
            return Err(Error::user_facing("Cannot step out. Call stack is ambiguous."));
        }
        let Some(target_call_node) = previous.node().cloned() else {
            return Err(Error::internal(format!(
                "no call node below the current frame of thread {thread_id}"
            )));
        };
        if target_call_node.outgoing_cfg.is_empty() {
            return Err(Error::user_facing("Cannot step out. Function never returns."));
        }

        struct Candidate {
            thread_id: i64,
            name: String,
            current: Option<NodeInfo>,
            call: Option<NodeInfo>,
            thread_exit: bool,
        }

        // Threads whose call site differs from the primary's (or is unknown)
        // do not take part in this motion at all and are dropped below.
        let mut candidates = Vec::new();
        for (id, thread) in &self.threads {
            let Some(previous) = thread.previous_frame() else {
                continue;
            };
            if previous.is_ambiguous() {
                continue;
            }
            if previous
                .node()
                .is_some_and(|node| node.cfg_node_id != target_call_node.cfg_node_id)
            {
                continue;
            }
            candidates.push(Candidate {
                thread_id: *id,
                name: thread.name().to_string(),
                current: thread.current_frame().node().cloned(),
                call: previous.node().cloned(),
                thread_exit: thread.current_frame().local_thread_index()
                    != previous.local_thread_index(),
            });
        }

        let mut target_nodes: HashMap<i64, Option<NodeInfo>> = HashMap::new();
        for candidate in candidates {
            let target_node = match candidate.current {
                None => None,
                Some(current) => {
                    let Some(call) = candidate.call else {
                        return Err(Error::internal(format!(
                            "no call node below the current frame of thread {}",
                            candidate.thread_id
                        )));
                    };

                    let candidate_ids = if candidate.thread_exit {
                        // A thread exit never returns to the parent frame, so
                        // there is nothing to filter with: every successor of
                        // the call is possible.
                        call.outgoing_cfg.iter().map(|e| e.node.clone()).collect_vec()
                    } else {
                        // Keep only successors of the call that some return
                        // edge of the current function actually reaches.
                        let returnable =
                            self.find_reachable(&current, |n| !n.outgoing_return.is_empty())?;
                        let return_ids: HashSet<String> = returnable
                            .iter()
                            .flat_map(|n| n.outgoing_return.iter())
                            .map(|e| e.node.clone())
                            .collect();
                        call.outgoing_cfg
                            .iter()
                            .map(|e| e.node.clone())
                            .filter(|id| return_ids.contains(id))
                            .collect_vec()
                    };

                    match candidate_ids.len() {
                        0 => None,
                        1 => Some(self.oracle.lookup_node(&candidate_ids[0])?),
                        _ => {
                            let suffix = if candidate.thread_id == thread_id {
                                String::new()
                            } else {
                                format!(" for {}", candidate.name)
                            };
                            return Err(Error::user_facing(format!(
                                "Ambiguous return path{suffix}. Step to return manually to choose the desired path."
                            )));
                        }
                    }
                }
            };
            target_nodes.insert(candidate.thread_id, target_node);
        }

        // Threads without a resolved entry drop out entirely; threads with an
        // unavailable target are kept.
        self.threads.retain(|id, _| target_nodes.contains_key(id));
        for (id, thread) in self.threads.iter_mut() {
            thread.pop_frame();
            thread
                .current_frame_mut()
                .set_node(target_nodes.remove(id).flatten());
        }

        self.on_threads_stopped(StopReason::Step, thread_id)
    }

    /// DAP `stepBack`: one CFG edge backwards.
    pub fn step_back(&mut self, thread_id: i64) -> Result<(), Error> {
        let thread = self.thread_state(thread_id)?;
        let Some(current) = thread.current_frame().node() else {
            return Err(Error::user_facing("Cannot step back. Location is unavailable."));
        };
        if current.incoming_cfg.is_empty() {
            return Err(Error::user_facing("Cannot step back. Reached start of function."));
        }
        if current.incoming_cfg.len() > 1 {
            return Err(Error::user_facing(
                "Cannot step back. Previous location is ambiguous.",
            ));
        }
        let target_cfg_node_id = current.incoming_cfg[0].cfg_node.clone();

        enum Move {
            Lookup(String),
            Restore(NodeInfo),
        }

        let mut moves: Vec<(i64, Move)> = Vec::new();
        for (id, thread) in &self.threads {
            let frame = thread.current_frame();
            if let Some(node) = frame.node() {
                let matching = node
                    .incoming_cfg
                    .iter()
                    .filter(|e| e.cfg_node == target_cfg_node_id)
                    .collect_vec();
                match matching.len() {
                    0 => {
                        return Err(Error::user_facing(format!(
                            "Cannot step back. No matching path from {}",
                            thread.name()
                        )));
                    }
                    1 => moves.push((*id, Move::Lookup(matching[0].node.clone()))),
                    _ => {
                        return Err(Error::user_facing(format!(
                            "Cannot step back. Path is ambiguous from {}",
                            thread.name()
                        )));
                    }
                }
            } else if let Some(last) = frame.last_reachable_node() {
                // An unavailable thread re-enters where it was last seen, but
                // only if that spot is where everyone is stepping back to.
                if last.cfg_node_id == target_cfg_node_id {
                    moves.push((*id, Move::Restore(last.clone())));
                }
            }
        }

        let mut steps: Vec<(i64, NodeInfo)> = Vec::new();
        for (id, mv) in moves {
            let node = match mv {
                Move::Lookup(node_id) => self.oracle.lookup_node(&node_id)?,
                Move::Restore(node) => node,
            };
            steps.push((id, node));
        }

        for (id, node) in steps {
            if let Some(thread) = self.threads.get_mut(&id) {
                thread.current_frame_mut().set_node(Some(node));
            }
        }

        self.on_threads_stopped(StopReason::Step, thread_id)
    }

    /// Runs to the next breakpoint in `direction` (1 forward, -1 backward).
    /// Every stop rebuilds the thread store from scratch: one thread per ARG
    /// node at the breakpoint's CFG location.
    pub fn run_to_next_breakpoint(&mut self, direction: i64) -> Result<(), Error> {
        // With no breakpoints set, breaking on entry acts as the only
        // breakpoint.
        while self.breakpoints.step_cursor(direction) {
            let (reason, target_nodes) = match self.breakpoints.active_location().cloned() {
                None => (
                    StopReason::Entry,
                    self.oracle.lookup_nodes(&LookupParams::entry())?,
                ),
                Some(location) => {
                    let mut nodes = self
                        .oracle
                        .lookup_nodes(&LookupParams::by_location(location.clone()))?
                        .into_iter()
                        .filter(|n| {
                            n.location.line <= location.line && location.line <= n.location.end_line
                        })
                        .collect_vec();
                    // Keep all ARG nodes of the first matching CFG location.
                    if let Some(first) = nodes.first() {
                        let cfg_node_id = first.cfg_node_id.clone();
                        nodes.retain(|n| n.cfg_node_id == cfg_node_id);
                    }
                    (StopReason::Breakpoint, nodes)
                }
            };

            if target_nodes.is_empty() {
                log::info!(
                    target: "debugger",
                    "skipped unreachable breakpoint {}",
                    self.breakpoints.cursor()
                );
                continue;
            }

            let mut new_threads = Vec::new();
            for node in target_nodes {
                let name = format!("breakpoint {}", node.node_id);
                let frames = self.assemble_stack_trace(node)?;
                new_threads.push(ThreadState::new(name, frames));
            }
            self.set_threads(new_threads);

            let first_thread_id = self
                .threads
                .keys()
                .next()
                .copied()
                .ok_or_else(|| Error::internal("no threads after a stop"))?;
            log::info!(
                target: "debugger",
                "stopped on breakpoint {}",
                self.breakpoints.cursor()
            );
            return self.on_threads_stopped(reason, first_thread_id);
        }

        log::info!(target: "debugger", "all breakpoints visited, terminating");
        self.notify_terminated()
    }

    /// Steps every thread along an edge matching `primary_target_edge` among
    /// the edges `candidates` yields for its current node.
    ///
    /// A candidate with the same ARG node as the primary's target wins
    /// outright; otherwise candidates with the primary target's CFG node are
    /// considered, and a unique one wins. Several CFG matches make the step
    /// ambiguous; none makes the thread's location unavailable.
    fn step_all_threads_along_matching_edge(
        &mut self,
        primary_thread_id: i64,
        primary_target_edge: &EdgeInfo,
        candidates: fn(&NodeInfo) -> Vec<EdgeInfo>,
        add_frame: bool,
    ) -> Result<(), Error> {
        // Every thread steps, including ones with an unavailable location;
        // otherwise the stack depths would drift apart across threads.
        let mut steps: Vec<(i64, Option<EdgeInfo>)> = Vec::new();
        for (id, thread) in &self.threads {
            let target_edge = match thread.current_frame().node() {
                None => None,
                Some(node) => {
                    let candidate_edges = candidates(node);
                    match candidate_edges
                        .iter()
                        .find(|e| e.node_id() == primary_target_edge.node_id())
                    {
                        Some(edge) => Some(edge.clone()),
                        None => {
                            let by_cfg = candidate_edges
                                .iter()
                                .filter(|e| e.cfg_node_id() == primary_target_edge.cfg_node_id())
                                .collect_vec();
                            if by_cfg.len() > 1 {
                                return Err(Error::user_facing(format!(
                                    "Cannot step. Path is ambiguous for {}.",
                                    thread.name()
                                )));
                            }
                            by_cfg.first().map(|e| (*e).clone())
                        }
                    }
                }
            };
            steps.push((*id, target_edge));
        }

        // Resolve target nodes up front so an oracle failure leaves the store
        // untouched.
        let mut resolved: Vec<(i64, Option<(EdgeInfo, NodeInfo)>)> = Vec::new();
        for (id, edge) in steps {
            let target = match edge {
                Some(edge) => {
                    let node = self.oracle.lookup_node(edge.node_id())?;
                    Some((edge, node))
                }
                None => None,
            };
            resolved.push((id, target));
        }

        for (id, target) in resolved {
            let Some(thread) = self.threads.get_mut(&id) else {
                continue;
            };
            if add_frame {
                let spawns = target
                    .as_ref()
                    .is_some_and(|(edge, _)| edge.creates_new_thread());
                let index =
                    thread.current_frame().local_thread_index() - if spawns { 1 } else { 0 };
                thread.push_frame(StackFrame::new(target.map(|(_, node)| node), false, index));
            } else {
                thread
                    .current_frame_mut()
                    .set_node(target.map(|(_, node)| node));
            }
        }

        self.on_threads_stopped(StopReason::Step, primary_thread_id)
    }
}
