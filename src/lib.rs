//! argdap - abstract debugging over the Debug Adapter Protocol.
//!
//! A conventional debugger follows one concrete execution. This adapter
//! instead navigates the abstract reachability graph (ARG) produced by a
//! static analyzer over a C program: every DAP thread tracks one abstract
//! path through the program, and a single step moves all tracked threads in
//! lockstep across the graph. The analyzer itself stays behind a small
//! JSON-RPC query interface (the "oracle") and is never run in-process.

pub mod arg;
pub mod dap;
pub mod debugger;
pub mod oracle;
