//! TUI debugger for the VM.
//!
//! Provides an interactive terminal-based debugger with:
//! - Disassembly view following the instruction pointer
//! - Flags, pointer cells and cycle counter
//! - Scrollable memory view
//! - Captured console output pane
//! - Step/run/breakpoint controls

mod app;
mod ui;

pub use app::{run_debugger, DebuggerApp};
