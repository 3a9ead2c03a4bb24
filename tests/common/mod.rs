//! Shared helpers for end-to-end DAP tests: a scripted DAP client over TCP
//! and a mock analyzer serving a fixed ARG over a Unix socket.

use anyhow::{Context, anyhow};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ---- ARG fixture, JSON-level -----------------------------------------------

pub fn node(id: &str, cfg: &str, function: &str, line: u64) -> Value {
    json!({
        "node": id,
        "cfg_node": cfg,
        "function": function,
        "location": {
            "file": "main.c",
            "line": line,
            "column": 1,
            "end_line": line,
            "end_column": 40,
        },
        "next": [],
        "prev": [],
    })
}

fn find<'a>(nodes: &'a [Value], id: &str) -> &'a Value {
    nodes
        .iter()
        .find(|n| n["node"] == id)
        .unwrap_or_else(|| panic!("fixture node {id} missing"))
}

pub fn link_cfg(nodes: &mut [Value], from: &str, to: &str, statement: &str) {
    let (to_id, to_cfg) = (find(nodes, to)["node"].clone(), find(nodes, to)["cfg_node"].clone());
    let (from_id, from_cfg) = (
        find(nodes, from)["node"].clone(),
        find(nodes, from)["cfg_node"].clone(),
    );

    let forward = json!({"kind": "cfg", "node": to_id, "cfg_node": to_cfg, "statement": statement});
    let backward = json!({"kind": "cfg", "node": from_id, "cfg_node": from_cfg, "statement": statement});

    for n in nodes.iter_mut() {
        if n["node"] == from {
            n["next"].as_array_mut().expect("next array").push(forward.clone());
        }
        if n["node"] == to {
            n["prev"].as_array_mut().expect("prev array").push(backward.clone());
        }
    }
}

// ---- mock analyzer ---------------------------------------------------------

static ORACLE_NONCE: AtomicU32 = AtomicU32::new(0);

pub struct MockOracle {
    pub socket_path: PathBuf,
}

impl MockOracle {
    /// Serve `nodes` over newline-delimited JSON-RPC on a fresh Unix socket.
    /// `entries` answers the empty lookup (program entry nodes).
    pub fn start(nodes: Vec<Value>, entries: Vec<String>) -> anyhow::Result<MockOracle> {
        let socket_path = std::env::temp_dir().join(format!(
            "argdap-test-{}-{}.sock",
            std::process::id(),
            ORACLE_NONCE.fetch_add(1, Ordering::SeqCst),
        ));
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("bind {}", socket_path.display()))?;

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    break;
                };
                let _ = serve_connection(stream, &nodes, &entries);
            }
        });

        Ok(MockOracle { socket_path })
    }
}

impl Drop for MockOracle {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn serve_connection(stream: UnixStream, nodes: &[Value], entries: &[String]) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = serde_json::from_str(&line)?;
        let response = answer(&request, nodes, entries);
        writeln!(writer, "{response}")?;
    }
}

fn answer(request: &Value, nodes: &[Value], entries: &[String]) -> Value {
    let id = request["id"].clone();
    let params = &request["params"];
    match request["method"].as_str() {
        Some("arg_lookup") => {
            let hits: Vec<Value> = if let Some(node_id) = params["node"].as_str() {
                nodes.iter().filter(|n| n["node"] == node_id).cloned().collect()
            } else if params["location"].is_object() {
                let file = params["location"]["file"].as_str().unwrap_or_default();
                let line = params["location"]["line"].as_u64().unwrap_or(0);
                nodes
                    .iter()
                    .filter(|n| {
                        n["location"]["file"] == file
                            && n["location"]["line"].as_u64().unwrap_or(0) <= line
                            && line <= n["location"]["end_line"].as_u64().unwrap_or(0)
                    })
                    .cloned()
                    .collect()
            } else {
                entries
                    .iter()
                    .filter_map(|id| nodes.iter().find(|n| n["node"] == id.as_str()))
                    .cloned()
                    .collect()
            };
            json!({"jsonrpc": "2.0", "id": id, "result": hits})
        }
        Some("arg_state") => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"mutex": [], "base": {"value domain": {"x": "5"}}},
        }),
        Some("arg_eval_int") => {
            if params["expression"] == "x" {
                json!({"jsonrpc": "2.0", "id": id, "result": {"raw": "5", "int": 5}})
            } else {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32000, "message": "unknown expression"},
                })
            }
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "unknown method"},
        }),
    }
}

// ---- adapter process -------------------------------------------------------

pub struct AdapterProcess {
    child: Child,
}

impl Drop for AdapterProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn start_adapter(oracle_socket: &std::path::Path) -> anyhow::Result<(AdapterProcess, SocketAddr)> {
    let addr = free_port()?;
    let child = Command::new(env!("CARGO_BIN_EXE_argdap"))
        .arg("--listen")
        .arg(addr.to_string())
        .arg("--oracle")
        .arg(oracle_socket)
        .arg("--oneshot")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn argdap")?;
    Ok((AdapterProcess { child }, addr))
}

fn free_port() -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

// ---- scripted DAP client ---------------------------------------------------

pub struct DapClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    next_seq: i64,
    pending_events: VecDeque<Value>,
}

impl DapClient {
    pub fn connect(addr: SocketAddr) -> anyhow::Result<DapClient> {
        let start = Instant::now();
        let stream = loop {
            match TcpStream::connect(addr) {
                Ok(stream) => break stream,
                Err(err) => {
                    if start.elapsed() > CONNECT_TIMEOUT {
                        return Err(anyhow!("failed to connect to {addr}: {err}"));
                    }
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .context("set DAP read timeout")?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(DapClient {
            stream,
            reader,
            next_seq: 1,
            pending_events: VecDeque::new(),
        })
    }

    pub fn send_request(&mut self, command: &str, arguments: Value) -> anyhow::Result<i64> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.write_message(&request)?;
        Ok(seq)
    }

    pub fn read_response(&mut self, request_seq: i64) -> anyhow::Result<Value> {
        loop {
            let msg = self.read_message()?;
            match msg.get("type").and_then(Value::as_str) {
                Some("event") => self.pending_events.push_back(msg),
                Some("response") => {
                    if msg.get("request_seq").and_then(Value::as_i64) == Some(request_seq) {
                        return Ok(msg);
                    }
                }
                _ => {}
            }
        }
    }

    /// A request expected to succeed; returns the response body.
    pub fn request_ok(&mut self, command: &str, arguments: Value) -> anyhow::Result<Value> {
        let seq = self.send_request(command, arguments)?;
        let response = self.read_response(seq)?;
        if response["success"] != true {
            return Err(anyhow!("{command} failed: {response}"));
        }
        Ok(response.get("body").cloned().unwrap_or(Value::Null))
    }

    /// A request expected to fail; returns the error message.
    pub fn request_err(&mut self, command: &str, arguments: Value) -> anyhow::Result<String> {
        let seq = self.send_request(command, arguments)?;
        let response = self.read_response(seq)?;
        if response["success"] != false {
            return Err(anyhow!("{command} unexpectedly succeeded: {response}"));
        }
        Ok(response["message"].as_str().unwrap_or_default().to_string())
    }

    pub fn wait_for_event(&mut self, name: &str) -> anyhow::Result<Value> {
        if let Some(position) = self
            .pending_events
            .iter()
            .position(|e| e.get("event").and_then(Value::as_str) == Some(name))
        {
            return Ok(self.pending_events.remove(position).expect("indexed event"));
        }
        loop {
            let msg = self.read_message()?;
            if msg.get("type").and_then(Value::as_str) != Some("event") {
                continue;
            }
            if msg.get("event").and_then(Value::as_str) == Some(name) {
                return Ok(msg);
            }
            self.pending_events.push_back(msg);
        }
    }

    fn read_message(&mut self) -> anyhow::Result<Value> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(anyhow!("DAP connection closed"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse()?);
            }
        }

        let len = content_length.ok_or_else(|| anyhow!("missing Content-Length header"))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    fn write_message(&mut self, msg: &Value) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg)?;
        write!(self.stream, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }
}
