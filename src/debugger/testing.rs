//! Engine test fixtures: a hand-built ARG served through the oracle seam and
//! a hook that records emitted events.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde_json::Value;

use crate::arg::{
    CfgEdge, EdgeInfo, EntryEdge, EvalIntResult, Location, LookupParams, LookupResult, NodeInfo,
    ReturnEdge,
};
use crate::debugger::{Debugger, EventHook, StopReason};
use crate::oracle::{OracleClient, OracleError, OracleTransport};

#[derive(Clone)]
pub(crate) struct ArgFixture {
    nodes: BTreeMap<String, NodeInfo>,
    entry_points: Vec<String>,
    breakpoints: Vec<(String, u32)>,
    states: HashMap<String, Value>,
    eval_results: HashMap<(String, String), Result<Value, String>>,
}

impl ArgFixture {
    pub fn new() -> ArgFixture {
        ArgFixture {
            nodes: BTreeMap::new(),
            entry_points: Vec::new(),
            breakpoints: Vec::new(),
            states: HashMap::new(),
            eval_results: HashMap::new(),
        }
    }

    /// Add a node occupying a single line of `main.c`.
    pub fn node(&mut self, id: &str, cfg_id: &str, function: &str, line: u32) -> &mut Self {
        self.node_with_range(id, cfg_id, function, line, line)
    }

    pub fn node_with_range(
        &mut self,
        id: &str,
        cfg_id: &str,
        function: &str,
        line: u32,
        end_line: u32,
    ) -> &mut Self {
        self.nodes.insert(
            id.to_string(),
            NodeInfo {
                node_id: id.to_string(),
                cfg_node_id: cfg_id.to_string(),
                function: function.to_string(),
                location: Location {
                    file: "main.c".to_string(),
                    line,
                    column: 1,
                    end_line,
                    end_column: 40,
                },
                outgoing_cfg: vec![],
                incoming_cfg: vec![],
                outgoing_entry: vec![],
                incoming_entry: vec![],
                outgoing_return: vec![],
            },
        );
        self
    }

    fn identity(&self, id: &str) -> (String, String) {
        let node = &self.nodes[id];
        (node.node_id.clone(), node.cfg_node_id.clone())
    }

    pub fn cfg_edge(&mut self, from: &str, to: &str, statement: &str) -> &mut Self {
        let (to_id, to_cfg) = self.identity(to);
        let (from_id, from_cfg) = self.identity(from);
        self.nodes
            .get_mut(from)
            .expect("edge source exists")
            .outgoing_cfg
            .push(CfgEdge {
                node: to_id,
                cfg_node: to_cfg,
                statement: statement.to_string(),
            });
        self.nodes
            .get_mut(to)
            .expect("edge target exists")
            .incoming_cfg
            .push(CfgEdge {
                node: from_id,
                cfg_node: from_cfg,
                statement: statement.to_string(),
            });
        self
    }

    pub fn entry_edge(
        &mut self,
        from: &str,
        to: &str,
        function: &str,
        creates_new_thread: bool,
    ) -> &mut Self {
        let (to_id, to_cfg) = self.identity(to);
        let (from_id, from_cfg) = self.identity(from);
        self.nodes
            .get_mut(from)
            .expect("edge source exists")
            .outgoing_entry
            .push(EntryEdge {
                node: to_id,
                cfg_node: to_cfg,
                function: function.to_string(),
                args: vec![],
                creates_new_thread,
            });
        self.nodes
            .get_mut(to)
            .expect("edge target exists")
            .incoming_entry
            .push(EntryEdge {
                node: from_id,
                cfg_node: from_cfg,
                function: function.to_string(),
                args: vec![],
                creates_new_thread,
            });
        self
    }

    pub fn return_edge(&mut self, from: &str, to: &str) -> &mut Self {
        let (to_id, to_cfg) = self.identity(to);
        self.nodes
            .get_mut(from)
            .expect("edge source exists")
            .outgoing_return
            .push(ReturnEdge {
                node: to_id,
                cfg_node: to_cfg,
            });
        self
    }

    /// Mark a node as a program entry (answers to an empty lookup).
    pub fn entry_point(&mut self, id: &str) -> &mut Self {
        self.entry_points.push(id.to_string());
        self
    }

    pub fn breakpoint_line(&mut self, file: &str, line: u32) -> &mut Self {
        self.breakpoints.push((file.to_string(), line));
        self
    }

    pub fn state(&mut self, id: &str, state: Value) -> &mut Self {
        self.states.insert(id.to_string(), state);
        self
    }

    pub fn eval_result(&mut self, id: &str, expression: &str, raw: Value) -> &mut Self {
        self.eval_results
            .insert((id.to_string(), expression.to_string()), Ok(raw));
        self
    }

    pub fn eval_error(&mut self, id: &str, expression: &str, message: &str) -> &mut Self {
        self.eval_results.insert(
            (id.to_string(), expression.to_string()),
            Err(message.to_string()),
        );
        self
    }

    /// The node as the engine sees it (location patches applied).
    pub fn node_info(&self, id: &str) -> NodeInfo {
        OracleClient::new(MockTransport {
            fixture: self.clone(),
        })
        .lookup_node(id)
        .expect("fixture node exists")
    }

    /// A debugger over this graph plus the hook recording its events, with
    /// the fixture's breakpoints already registered.
    pub fn debugger(&self) -> (Debugger, RecordingHook) {
        let hook = RecordingHook::default();
        let oracle = OracleClient::new(MockTransport {
            fixture: self.clone(),
        });
        let mut debugger = Debugger::new(oracle, hook.clone());

        let mut by_file: BTreeMap<String, Vec<Location>> = BTreeMap::new();
        for (file, line) in &self.breakpoints {
            by_file
                .entry(file.clone())
                .or_default()
                .push(Location::point(file.clone(), *line, 0));
        }
        for (file, locations) in by_file {
            debugger.breakpoints_mut().replace_file(&file, locations);
        }

        (debugger, hook)
    }
}

fn to_lookup_result(node: &NodeInfo) -> LookupResult {
    LookupResult {
        node: node.node_id.clone(),
        cfg_node: node.cfg_node_id.clone(),
        function: node.function.clone(),
        location: node.location.clone(),
        next: node
            .outgoing_cfg
            .iter()
            .cloned()
            .map(EdgeInfo::Cfg)
            .chain(node.outgoing_entry.iter().cloned().map(EdgeInfo::Entry))
            .chain(node.outgoing_return.iter().cloned().map(EdgeInfo::Return))
            .collect(),
        prev: node
            .incoming_cfg
            .iter()
            .cloned()
            .map(EdgeInfo::Cfg)
            .chain(node.incoming_entry.iter().cloned().map(EdgeInfo::Entry))
            .collect(),
    }
}

struct MockTransport {
    fixture: ArgFixture,
}

impl OracleTransport for MockTransport {
    fn arg_lookup(&mut self, params: &LookupParams) -> Result<Vec<LookupResult>, OracleError> {
        if let Some(node_id) = &params.node {
            return Ok(self
                .fixture
                .nodes
                .get(node_id)
                .map(to_lookup_result)
                .into_iter()
                .collect());
        }
        if let Some(location) = &params.location {
            return Ok(self
                .fixture
                .nodes
                .values()
                .filter(|n| {
                    n.location.file == location.file
                        && n.location.line <= location.line
                        && location.line <= n.location.end_line
                })
                .map(to_lookup_result)
                .collect());
        }
        Ok(self
            .fixture
            .entry_points
            .iter()
            .filter_map(|id| self.fixture.nodes.get(id))
            .map(to_lookup_result)
            .collect())
    }

    fn arg_state(&mut self, node_id: &str) -> Result<Value, OracleError> {
        self.fixture
            .states
            .get(node_id)
            .cloned()
            .ok_or_else(|| OracleError::Rejected(format!("no state for node {node_id}")))
    }

    fn arg_eval_int(
        &mut self,
        node_id: &str,
        expression: &str,
    ) -> Result<EvalIntResult, OracleError> {
        match self
            .fixture
            .eval_results
            .get(&(node_id.to_string(), expression.to_string()))
        {
            Some(Ok(raw)) => Ok(EvalIntResult {
                raw: raw.clone(),
                int: raw.as_i64(),
            }),
            Some(Err(message)) => Err(OracleError::Rejected(message.clone())),
            None => Err(OracleError::Rejected(format!(
                "cannot evaluate expression: {expression}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HookEvent {
    Stopped(StopReason, i64),
    Terminated,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingHook {
    events: Rc<RefCell<Vec<HookEvent>>>,
}

impl RecordingHook {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.borrow().clone()
    }
}

impl EventHook for RecordingHook {
    fn on_stopped(&self, reason: StopReason, thread_id: i64) -> anyhow::Result<()> {
        self.events
            .borrow_mut()
            .push(HookEvent::Stopped(reason, thread_id));
        Ok(())
    }

    fn on_terminated(&self) -> anyhow::Result<()> {
        self.events.borrow_mut().push(HookEvent::Terminated);
        Ok(())
    }
}
