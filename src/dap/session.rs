//! One DAP client session: decodes requests and maps them onto the engine.
//!
//! Requests are handled strictly one at a time off a blocking read loop; an
//! oracle query in flight blocks the session. The engine publishes `stopped`
//! and `terminated` events itself through the event hook, so by the time a
//! stepping request is answered its event is already out.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::arg::Location;
use crate::dap::hook::DapEventHook;
use crate::dap::io::{DapReader, SharedOutput};
use crate::dap::protocol::{self, DapRequest};
use crate::debugger::Debugger;
use crate::debugger::error::Error;
use crate::oracle::OracleClient;
use crate::oracle::json_rpc::JsonRpcTransport;

pub struct DebugSession {
    reader: DapReader,
    out: SharedOutput,
    oracle_socket: PathBuf,
    debugger: Option<Debugger>,
    /// Launch acknowledged, first run still waiting for `configurationDone`.
    launch_pending: bool,
}

impl DebugSession {
    pub fn new(reader: DapReader, out: SharedOutput, oracle_socket: PathBuf) -> DebugSession {
        DebugSession {
            reader,
            out,
            oracle_socket,
            debugger: None,
            launch_pending: false,
        }
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        loop {
            let request = self.reader.read_request()?;
            if !self.handle_request(&request)? {
                return Ok(());
            }
        }
    }

    /// Returns false when the session is over.
    fn handle_request(&mut self, request: &DapRequest) -> anyhow::Result<bool> {
        log::debug!(target: "dap", "{}: {}", request.seq, request.command);
        let out = self.out.clone();

        match request.command.as_str() {
            "initialize" => {
                let capabilities = protocol::Capabilities {
                    supports_configuration_done_request: true,
                    supports_step_in_targets_request: true,
                    supports_step_back: true,
                };
                respond_success(&out, request, Some(json!(capabilities)))?;
            }
            "launch" | "attach" => {
                // Attaching makes no sense for abstract debugging; treat it
                // as a launch so clients with an attach configuration still
                // work.
                if self.debugger.is_none() {
                    let transport = match JsonRpcTransport::connect(&self.oracle_socket) {
                        Ok(transport) => transport,
                        Err(err) => {
                            log::error!(target: "dap", "analyzer connection failed: {err}");
                            respond_error(&out, request, format!("cannot connect to analyzer: {err}"))?;
                            return Ok(true);
                        }
                    };
                    let hook = DapEventHook::new(self.out.clone());
                    self.debugger = Some(Debugger::new(OracleClient::new(transport), hook));
                }
                self.launch_pending = true;
                respond_success(&out, request, None)?;
                // Configuration (breakpoints etc.) starts now.
                send_event(&out, "initialized", None)?;
                log::info!(target: "dap", "launched, waiting for configuration");
            }
            "disconnect" => {
                respond_success(&out, request, None)?;
                log::info!(target: "dap", "client disconnected");
                return Ok(false);
            }
            "setExceptionBreakpoints" => {
                // Exception breakpoints are never advertised, but some
                // clients send them anyway.
                respond_success(&out, request, Some(json!({"breakpoints": []})))?;
            }
            _ => {
                let Some(debugger) = self.debugger.as_mut() else {
                    respond_error(&out, request, "no active debug session")?;
                    return Ok(true);
                };

                match request.command.as_str() {
                    "setBreakpoints" => {
                        let Some(args) =
                            parse_args::<protocol::SetBreakpointsArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let Some(client_path) = args.source.path.clone() else {
                            respond_error(&out, request, "breakpoint source has no path")?;
                            return Ok(true);
                        };
                        let source_path = relativize_to_cwd(&client_path);
                        log::info!(target: "dap", "setting breakpoints for {client_path} ({source_path})");

                        let locations = args
                            .breakpoints
                            .iter()
                            .map(|bp| {
                                Location::point(
                                    source_path.clone(),
                                    bp.line,
                                    bp.column.unwrap_or(0),
                                )
                            })
                            .collect_vec();
                        debugger.breakpoints_mut().replace_file(&source_path, locations);

                        let breakpoints = args
                            .breakpoints
                            .iter()
                            .map(|bp| protocol::Breakpoint {
                                verified: true,
                                line: bp.line,
                                column: bp.column,
                                source: args.source.clone(),
                            })
                            .collect_vec();
                        respond_success(&out, request, Some(json!({"breakpoints": breakpoints})))?;
                    }
                    "configurationDone" => {
                        respond_success(&out, request, None)?;
                        if self.launch_pending {
                            self.launch_pending = false;
                            log::info!(target: "dap", "configuration done, running to first stop");
                            debugger.breakpoints_mut().reset_cursor();
                            if let Err(err) = debugger.run_to_next_breakpoint(1) {
                                log::error!(target: "dap", "initial run failed: {err}");
                            }
                        }
                    }
                    "continue" => {
                        // All threads always run together; the requesting
                        // thread does not matter.
                        let result = debugger
                            .run_to_next_breakpoint(1)
                            .map(|_| Some(json!({"allThreadsContinued": true})));
                        respond_engine_result(&out, request, result)?;
                    }
                    "reverseContinue" => {
                        let result = debugger.run_to_next_breakpoint(-1).map(|_| None);
                        respond_engine_result(&out, request, result)?;
                    }
                    "next" => {
                        let Some(args) = parse_args::<protocol::ThreadArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = debugger.step_over(args.thread_id).map(|_| None);
                        respond_engine_result(&out, request, result)?;
                    }
                    "stepIn" => {
                        let Some(args) = parse_args::<protocol::StepInArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = debugger.step_in(args.thread_id, args.target_id).map(|_| None);
                        respond_engine_result(&out, request, result)?;
                    }
                    "stepInTargets" => {
                        let Some(args) =
                            parse_args::<protocol::StepInTargetsArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = debugger
                            .step_in_targets(args.frame_id)
                            .map(|targets| Some(json!({"targets": targets})));
                        respond_engine_result(&out, request, result)?;
                    }
                    "stepOut" => {
                        let Some(args) = parse_args::<protocol::ThreadArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = debugger.step_out(args.thread_id).map(|_| None);
                        respond_engine_result(&out, request, result)?;
                    }
                    "stepBack" => {
                        let Some(args) = parse_args::<protocol::ThreadArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = debugger.step_back(args.thread_id).map(|_| None);
                        respond_engine_result(&out, request, result)?;
                    }
                    "threads" => {
                        let threads = debugger
                            .thread_states()
                            .map(|(id, state)| protocol::Thread {
                                id,
                                name: state.name().to_string(),
                            })
                            .collect_vec();
                        respond_success(&out, request, Some(json!({"threads": threads})))?;
                    }
                    "stackTrace" => {
                        let Some(args) = parse_args::<protocol::ThreadArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = stack_trace_body(debugger, args.thread_id);
                        respond_engine_result(&out, request, result)?;
                    }
                    "scopes" => {
                        let Some(args) = parse_args::<protocol::ScopesArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = debugger
                            .scopes(args.frame_id)
                            .map(|scopes| Some(json!({"scopes": scopes})));
                        respond_engine_result(&out, request, result)?;
                    }
                    "variables" => {
                        let Some(args) = parse_args::<protocol::VariablesArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let result = debugger
                            .variables(args.variables_reference)
                            .map(|variables| Some(json!({"variables": variables})));
                        respond_engine_result(&out, request, result)?;
                    }
                    "evaluate" => {
                        let Some(args) = parse_args::<protocol::EvaluateArguments>(&out, request)?
                        else {
                            return Ok(true);
                        };
                        let Some(frame_id) = args.frame_id else {
                            respond_error(&out, request, "evaluate requires a frame")?;
                            return Ok(true);
                        };
                        let result = debugger
                            .evaluate(frame_id, &args.expression)
                            .map(|value| Some(json!({"result": value, "variablesReference": 0})));
                        respond_engine_result(&out, request, result)?;
                    }
                    command => {
                        log::warn!(target: "dap", "unsupported command: {command}");
                        respond_error(&out, request, format!("unsupported command: {command}"))?;
                    }
                }
            }
        }

        Ok(true)
    }
}

fn stack_trace_body(debugger: &Debugger, thread_id: i64) -> Result<Option<Value>, Error> {
    let thread = debugger.thread_state(thread_id)?;
    if thread.current_frame().node().is_none() {
        return Err(Error::UserFacing("No matching path".to_string()));
    }

    let current_thread_index = thread.current_frame().local_thread_index();
    let mut frames = Vec::with_capacity(thread.frames().len());
    for (index, frame) in thread.frames().iter().enumerate() {
        let Some(node) = frame.node() else {
            return Err(Error::Internal(format!(
                "missing node in frame {index} of thread {thread_id}"
            )));
        };
        // "? " marks frames picked among several plausible callers, "^"
        // frames that belong to a parent thread.
        let ambiguous = if frame.is_ambiguous() { "? " } else { "" };
        let parent = if frame.local_thread_index() != current_thread_index {
            "^"
        } else {
            ""
        };
        frames.push(protocol::StackFrame {
            id: Debugger::frame_id(thread_id, index),
            name: format!("{ambiguous}{parent}{} {}", node.function, node.node_id),
            source: protocol::Source {
                name: Some(node.location.file.clone()),
                path: Some(absolute_source_path(&node.location.file)),
            },
            line: node.location.line,
            column: node.location.column,
            end_line: node.location.end_line,
            end_column: node.location.end_column,
        });
    }

    Ok(Some(json!({
        "stackFrames": frames,
        "totalFrames": frames.len(),
    })))
}

fn respond_success(
    out: &SharedOutput,
    request: &DapRequest,
    body: Option<Value>,
) -> anyhow::Result<()> {
    out.lock().unwrap().respond_success(request, body)
}

fn respond_error(
    out: &SharedOutput,
    request: &DapRequest,
    message: impl Into<String>,
) -> anyhow::Result<()> {
    out.lock().unwrap().respond_error(request, message)
}

fn send_event(out: &SharedOutput, event: &'static str, body: Option<Value>) -> anyhow::Result<()> {
    out.lock().unwrap().send_event(event, body)
}

/// Answer an engine result: user-facing messages go out verbatim, everything
/// else is logged and collapsed into a generic failure.
fn respond_engine_result(
    out: &SharedOutput,
    request: &DapRequest,
    result: Result<Option<Value>, Error>,
) -> anyhow::Result<()> {
    match result {
        Ok(body) => respond_success(out, request, body),
        Err(err) => {
            if let Some(message) = err.user_message() {
                respond_error(out, request, message)
            } else {
                log::error!(target: "dap", "{}: {err}", request.command);
                let message = match err {
                    Error::Oracle(_) => "analyzer request failed",
                    _ => "internal server error",
                };
                respond_error(out, request, message)
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(
    out: &SharedOutput,
    request: &DapRequest,
) -> anyhow::Result<Option<T>> {
    match serde_json::from_value(request.arguments.clone()) {
        Ok(args) => Ok(Some(args)),
        Err(err) => {
            respond_error(out, request, format!("malformed arguments: {err}"))?;
            Ok(None)
        }
    }
}

/// Breakpoint paths arrive absolute from the client while the analyzer works
/// with paths relative to the working directory.
fn relativize_to_cwd(path: &str) -> String {
    let Ok(cwd) = std::env::current_dir() else {
        return path.to_string();
    };
    match Path::new(path).strip_prefix(&cwd) {
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

fn absolute_source_path(file: &str) -> String {
    let path = Path::new(file);
    if path.is_absolute() {
        return file.to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path).to_string_lossy().into_owned(),
        Err(_) => file.to_string(),
    }
}
