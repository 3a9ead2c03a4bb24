//! The abstract debugger engine.
//!
//! The engine owns all cross-request state: the thread store, the breakpoint
//! registry and the memoized scope/variable caches. Stepping operations live
//! in [`step`], stack assembly in [`stack`], domain-value rendering in
//! [`variable`]. The engine publishes stops through the [`EventHook`] seam and
//! never touches the transport itself.

pub mod breakpoint;
pub mod error;
mod stack;
mod step;
pub mod thread;
pub mod variable;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::dap::protocol::{Scope, Variable};
use crate::debugger::breakpoint::BreakpointRegistry;
use crate::debugger::error::Error;
use crate::debugger::thread::{StackFrame, ThreadState};
use crate::oracle::{OracleClient, OracleError};

/// Multiplier for the thread id in a frame id. A frame id is calculated as
/// `thread_id * FRAME_ID_THREAD_ID_MULTIPLIER + frame_index`, which bounds a
/// stack to 100 000 frames.
pub const FRAME_ID_THREAD_ID_MULTIPLIER: i64 = 100_000;

/// Why the debugger stopped, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Breakpoint,
    Step,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Entry => "entry",
            StopReason::Breakpoint => "breakpoint",
            StopReason::Step => "step",
        }
    }
}

/// Observer for engine state transitions.
///
/// The stop notification goes out while the triggering request is still being
/// handled, before its response. Known clients tolerate this order; a hook
/// implementation may buffer the event if a stricter transport ever needs the
/// response first.
pub trait EventHook {
    fn on_stopped(&self, reason: StopReason, thread_id: i64) -> anyhow::Result<()>;
    fn on_terminated(&self) -> anyhow::Result<()>;
}

pub struct Debugger {
    oracle: OracleClient,
    hooks: Box<dyn EventHook>,
    threads: IndexMap<i64, ThreadState>,
    breakpoints: BreakpointRegistry,
    node_scopes: HashMap<String, Vec<Scope>>,
    stored_variables: HashMap<i64, Vec<Variable>>,
    next_variables_reference: i64,
}

impl Debugger {
    pub fn new(oracle: OracleClient, hooks: impl EventHook + 'static) -> Debugger {
        Debugger {
            oracle,
            hooks: Box::new(hooks),
            threads: IndexMap::new(),
            breakpoints: BreakpointRegistry::new(),
            node_scopes: HashMap::new(),
            stored_variables: HashMap::new(),
            next_variables_reference: 1,
        }
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointRegistry {
        &mut self.breakpoints
    }

    pub fn frame_id(thread_id: i64, frame_index: usize) -> i64 {
        thread_id * FRAME_ID_THREAD_ID_MULTIPLIER + frame_index as i64
    }

    pub fn thread_id_of_frame(frame_id: i64) -> i64 {
        frame_id / FRAME_ID_THREAD_ID_MULTIPLIER
    }

    fn frame_index_of(frame_id: i64) -> usize {
        (frame_id % FRAME_ID_THREAD_ID_MULTIPLIER) as usize
    }

    pub fn thread_states(&self) -> impl Iterator<Item = (i64, &ThreadState)> {
        self.threads.iter().map(|(id, thread)| (*id, thread))
    }

    pub fn thread_state(&self, thread_id: i64) -> Result<&ThreadState, Error> {
        self.threads
            .get(&thread_id)
            .ok_or_else(|| Error::internal(format!("thread {thread_id} not found")))
    }

    pub fn frame(&self, frame_id: i64) -> Result<&StackFrame, Error> {
        self.thread_state(Self::thread_id_of_frame(frame_id))?
            .frame(Self::frame_index_of(frame_id))
            .ok_or_else(|| Error::internal(format!("no frame with id {frame_id}")))
    }

    pub fn thread_by_frame_id(&self, frame_id: i64) -> Result<&ThreadState, Error> {
        self.thread_state(Self::thread_id_of_frame(frame_id))
    }

    /// DAP `scopes`: two scopes per node, memoized per node id until the next
    /// stop.
    pub fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>, Error> {
        let node_id = {
            let frame = self.frame(frame_id)?;
            let Some(node) = frame.node() else {
                return Err(Error::internal(format!(
                    "scopes requested for unavailable frame {frame_id}"
                )));
            };
            node.node_id.clone()
        };

        if let Some(scopes) = self.node_scopes.get(&node_id) {
            return Ok(scopes.clone());
        }

        let state = self.oracle.fetch_state(&node_id)?;
        let scopes = self.build_node_scopes(&state);
        self.node_scopes.insert(node_id, scopes.clone());
        Ok(scopes)
    }

    /// DAP `variables`.
    pub fn variables(&self, reference: i64) -> Result<Vec<Variable>, Error> {
        self.stored_variables
            .get(&reference)
            .cloned()
            .ok_or_else(|| Error::internal(format!("unknown variables reference {reference}")))
    }

    /// DAP `evaluate`: ask the oracle for the expression's abstract value and
    /// render it.
    pub fn evaluate(&mut self, frame_id: i64, expression: &str) -> Result<String, Error> {
        let node_id = {
            let frame = self.frame(frame_id)?;
            let Some(node) = frame.node() else {
                return Err(Error::internal(format!(
                    "evaluate requested for unavailable frame {frame_id}"
                )));
            };
            node.node_id.clone()
        };

        let result = match self.oracle.eval_int(&node_id, expression) {
            Ok(result) => result,
            // The analyzer's message explains why the expression is invalid;
            // show it as-is.
            Err(OracleError::Rejected(message)) => return Err(Error::UserFacing(message)),
            Err(err) => return Err(err.into()),
        };
        Ok(variable::domain_value_to_string(&result.raw))
    }

    pub(super) fn store_variables(&mut self, variables: Vec<Variable>) -> i64 {
        let reference = self.next_variables_reference;
        self.next_variables_reference += 1;
        self.stored_variables.insert(reference, variables);
        reference
    }

    pub(super) fn set_threads(&mut self, new_threads: Vec<ThreadState>) {
        self.threads.clear();
        for (index, thread) in new_threads.into_iter().enumerate() {
            self.threads.insert(index as i64, thread);
        }
    }

    /// Runs after every stop: drops caches that depend on thread state and
    /// notifies the client.
    pub(super) fn on_threads_stopped(
        &mut self,
        reason: StopReason,
        primary_thread_id: i64,
    ) -> Result<(), Error> {
        self.next_variables_reference = 1;
        self.stored_variables.clear();
        self.node_scopes.clear();

        self.hooks
            .on_stopped(reason, primary_thread_id)
            .map_err(Error::Hook)
    }

    pub(super) fn notify_terminated(&mut self) -> Result<(), Error> {
        self.hooks.on_terminated().map_err(Error::Hook)
    }
}
