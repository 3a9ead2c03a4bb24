//! Newline-delimited JSON-RPC 2.0 client for the analyzer socket.
//!
//! One request and one response JSON object per line, over a Unix domain
//! socket. Calls are strictly sequential; the engine never has more than one
//! query in flight.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{OracleError, OracleTransport};
use crate::arg::{EvalIntResult, LookupParams, LookupResult};

pub struct JsonRpcTransport {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: u64,
}

impl JsonRpcTransport {
    pub fn connect(path: &Path) -> Result<JsonRpcTransport, OracleError> {
        let stream = UnixStream::connect(path)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: UnixStream) -> Result<JsonRpcTransport, OracleError> {
        let reader = BufReader::new(stream.try_clone()?);
        Ok(JsonRpcTransport {
            stream,
            reader,
            next_id: 1,
        })
    }

    fn call(&mut self, method: &str, params: Value) -> Result<Value, OracleError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let mut payload =
            serde_json::to_vec(&request).map_err(|err| OracleError::Protocol(err.to_string()))?;
        payload.push(b'\n');
        self.stream.write_all(&payload)?;
        self.stream.flush()?;

        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(OracleError::Unavailable(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "analyzer connection closed",
                )));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response: RpcResponse =
                serde_json::from_str(line).map_err(|err| OracleError::Protocol(err.to_string()))?;
            if response.id != Some(id) {
                // Notifications and stale responses are not part of the
                // protocol; skip them rather than failing the query.
                log::warn!(target: "oracle", "unexpected message for id {:?}, expected {id}", response.id);
                continue;
            }
            if let Some(error) = response.error {
                return Err(OracleError::Rejected(error.message));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

impl OracleTransport for JsonRpcTransport {
    fn arg_lookup(&mut self, params: &LookupParams) -> Result<Vec<LookupResult>, OracleError> {
        let params =
            serde_json::to_value(params).map_err(|err| OracleError::Protocol(err.to_string()))?;
        let result = self.call("arg_lookup", params)?;
        serde_json::from_value(result).map_err(|err| OracleError::Protocol(err.to_string()))
    }

    fn arg_state(&mut self, node_id: &str) -> Result<Value, OracleError> {
        self.call("arg_state", json!({"node": node_id}))
    }

    fn arg_eval_int(
        &mut self,
        node_id: &str,
        expression: &str,
    ) -> Result<EvalIntResult, OracleError> {
        let result = self.call(
            "arg_eval_int",
            json!({"node": node_id, "expression": expression}),
        )?;
        serde_json::from_value(result).map_err(|err| OracleError::Protocol(err.to_string()))
    }
}
