//! Logical threads and their synthetic call stacks.
//!
//! A thread here is one abstract path under observation, not an OS thread.
//! Its stack is a sequence of frames ordered innermost first; each frame holds
//! a value copy of the ARG node it sits at.

use crate::arg::NodeInfo;

/// One synthetic call-stack frame.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Current ARG node; `None` when the thread cannot follow the motion that
    /// produced this stop.
    node: Option<NodeInfo>,
    /// Set when the frame was picked among several plausible callers during
    /// stack assembly.
    ambiguous: bool,
    /// Spawn nesting within the assembled stack; decreases when stepping into
    /// a thread-creating call, increases towards the outermost frame.
    local_thread_index: i32,
    /// Kept when `node` goes absent so that step back can re-enter.
    last_reachable_node: Option<NodeInfo>,
}

impl StackFrame {
    pub fn new(node: Option<NodeInfo>, ambiguous: bool, local_thread_index: i32) -> StackFrame {
        StackFrame {
            node,
            ambiguous,
            local_thread_index,
            last_reachable_node: None,
        }
    }

    pub fn node(&self) -> Option<&NodeInfo> {
        self.node.as_ref()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    pub fn local_thread_index(&self) -> i32 {
        self.local_thread_index
    }

    pub fn last_reachable_node(&self) -> Option<&NodeInfo> {
        self.last_reachable_node.as_ref()
    }

    /// Replace the frame's node. Losing the node keeps the previous one
    /// around; regaining one drops it.
    pub fn set_node(&mut self, node: Option<NodeInfo>) {
        match node {
            Some(node) => {
                self.node = Some(node);
                self.last_reachable_node = None;
            }
            None => {
                if let Some(prev) = self.node.take() {
                    self.last_reachable_node = Some(prev);
                }
            }
        }
    }
}

/// One logical thread: a name and a non-empty stack, innermost frame first.
#[derive(Debug, Clone)]
pub struct ThreadState {
    name: String,
    frames: Vec<StackFrame>,
}

impl ThreadState {
    pub fn new(name: impl Into<String>, frames: Vec<StackFrame>) -> ThreadState {
        debug_assert!(!frames.is_empty(), "a thread always has at least one frame");
        ThreadState {
            name: name.into(),
            frames,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&StackFrame> {
        self.frames.get(index)
    }

    pub fn current_frame(&self) -> &StackFrame {
        &self.frames[0]
    }

    pub fn current_frame_mut(&mut self) -> &mut StackFrame {
        &mut self.frames[0]
    }

    pub fn previous_frame(&self) -> Option<&StackFrame> {
        self.frames.get(1)
    }

    pub fn has_previous_frame(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.insert(0, frame);
    }

    /// Drop the innermost frame. The stack never becomes empty.
    pub fn pop_frame(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop the outermost frame");
        if self.frames.len() > 1 {
            self.frames.remove(0);
        }
    }
}
