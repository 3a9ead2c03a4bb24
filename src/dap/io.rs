//! DAP framing over TCP: a blocking reader plus a shared, sequenced writer.
//!
//! The writer is shared because events may be emitted from inside an engine
//! operation (through the event hook) while the session still owns the
//! request being answered. One `seq` counter covers responses and events.
//! Raw traffic is logged at trace level under the `dap` target; enable it
//! with `--trace-dap` or `RUST_LOG`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use serde::Serialize;
use serde_json::Value;

use crate::dap::protocol::{DapEvent, DapRequest, DapResponse};

pub type SharedOutput = Arc<Mutex<DapOutput>>;

/// Split a client connection into its reading and writing halves.
pub fn split(stream: TcpStream) -> anyhow::Result<(DapReader, SharedOutput)> {
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    let output = DapOutput {
        stream,
        next_seq: 1,
    };
    Ok((DapReader { reader }, Arc::new(Mutex::new(output))))
}

pub struct DapReader {
    reader: BufReader<TcpStream>,
}

impl DapReader {
    pub fn read_request(&mut self) -> anyhow::Result<DapRequest> {
        let message = self.read_message()?;
        serde_json::from_value(message).map_err(|err| anyhow!("malformed DAP request: {err}"))
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

        let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        let msg: Value = serde_json::from_slice(&buf)?;
        log::trace!(target: "dap", "<- {msg}");
        Ok(msg)
    }
}

pub struct DapOutput {
    stream: TcpStream,
    next_seq: i64,
}

impl DapOutput {
    pub fn respond_success(
        &mut self,
        request: &DapRequest,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        log::debug!(target: "dap", "success {}: {body:?}", request.seq);
        let seq = self.bump_seq();
        self.write_message(&DapResponse {
            seq,
            r#type: "response",
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        })
    }

    pub fn respond_error(
        &mut self,
        request: &DapRequest,
        message: impl Into<String>,
    ) -> anyhow::Result<()> {
        let message = message.into();
        log::debug!(target: "dap", "error {}: {message}", request.seq);
        let seq = self.bump_seq();
        self.write_message(&DapResponse {
            seq,
            r#type: "response",
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message),
            body: None,
        })
    }

    pub fn send_event(&mut self, event: &'static str, body: Option<Value>) -> anyhow::Result<()> {
        log::debug!(target: "dap", "event {event}: {body:?}");
        let seq = self.bump_seq();
        self.write_message(&DapEvent {
            seq,
            r#type: "event",
            event,
            body,
        })
    }

    fn bump_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn write_message<T: Serialize>(&mut self, v: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(v)?;
        log::trace!(target: "dap", "-> {}", String::from_utf8_lossy(&payload));
        write!(self.stream, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }
}
