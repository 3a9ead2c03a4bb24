use serde_json::json;

use crate::dap::io::SharedOutput;
use crate::debugger::{EventHook, StopReason};

/// Forwards engine stop/terminate notifications to the client as DAP events.
pub struct DapEventHook {
    out: SharedOutput,
}

impl DapEventHook {
    pub fn new(out: SharedOutput) -> DapEventHook {
        DapEventHook { out }
    }
}

impl EventHook for DapEventHook {
    fn on_stopped(&self, reason: StopReason, thread_id: i64) -> anyhow::Result<()> {
        self.out.lock().unwrap().send_event(
            "stopped",
            Some(json!({
                "reason": reason.as_str(),
                "threadId": thread_id,
                "allThreadsStopped": true,
            })),
        )
    }

    fn on_terminated(&self) -> anyhow::Result<()> {
        self.out.lock().unwrap().send_event("terminated", None)
    }
}
