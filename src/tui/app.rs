//! Debugger application state and logic.

use crate::asm::disasm::{disassemble_program, DisasmLine};
use crate::cpu::io::ScriptedIo;
use crate::cpu::{Cpu, CpuError};
use crate::word::Word13;
use std::collections::HashSet;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Original program for reloads.
    pub program: Vec<Word13>,
    /// Shared handle on the VM's scripted I/O.
    pub io: ScriptedIo,
    /// Scripted input, replayed on reset.
    input: String,
    /// Breakpoints (by cell address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset.
    pub mem_scroll: usize,
    /// Static listing of the loaded program.
    listing: Vec<DisasmLine>,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program and scripted input.
    pub fn new(program: Vec<Word13>, input: &str) -> Self {
        let io = ScriptedIo::new(input);
        let mut cpu = Cpu::with_io(Box::new(io.clone()));
        let _ = cpu.load_program(&program);
        let listing = disassemble_program(&program);

        Self {
            cpu,
            program,
            io,
            input: input.to_string(),
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            mem_scroll: 0,
            listing,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let ip = self.cpu.mem.ip().get();
        match self.cpu.step() {
            Ok(instr) => {
                self.status = format!("{:04X}: {}", ip, instr.opcode.mnemonic());
            }
            Err(CpuError::NotRunning(state)) => {
                self.status = format!("CPU stopped: {:?}", state);
                self.running = false;
            }
            Err(err) => {
                self.status = format!("Trap: {}", err);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint or trap.
    pub fn run(&mut self) {
        // Step off a breakpoint we may be sitting on before resuming.
        if self.cpu.is_running() {
            self.step();
        }
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} cycles: {:?}", self.cpu.cycles, self.cpu.state);
            return;
        }

        let ip = self.cpu.mem.ip().get();
        if self.breakpoints.contains(&ip) {
            self.running = false;
            self.status = format!("Breakpoint at {:04X}", ip);
            return;
        }

        self.step();
    }

    /// Toggle a breakpoint at the current instruction pointer.
    pub fn toggle_breakpoint(&mut self) {
        let ip = self.cpu.mem.ip().get();
        if self.breakpoints.contains(&ip) {
            self.breakpoints.remove(&ip);
            self.status = format!("Removed breakpoint at {:04X}", ip);
        } else {
            self.breakpoints.insert(ip);
            self.status = format!("Set breakpoint at {:04X}", ip);
        }
    }

    /// Reset the CPU, reload the program and replay the scripted input.
    pub fn reset(&mut self) {
        self.io = ScriptedIo::new(&self.input);
        self.cpu = Cpu::with_io(Box::new(self.io.clone()));
        let _ = self.cpu.load_program(&self.program);
        self.running = false;
        self.status = "Reset. Ready.".into();
    }

    /// Get a disassembly window around the current instruction pointer.
    ///
    /// Returns (address, text, is_current) triples.
    pub fn disassembly_window(&self, rows: usize) -> Vec<(u16, String, bool)> {
        let ip = self.cpu.mem.ip().get();

        // The listing line whose cells cover the instruction pointer.
        let current = self
            .listing
            .iter()
            .position(|line| {
                let end = line.addr as usize + line.len;
                (line.addr as usize..end).contains(&(ip as usize))
            })
            .unwrap_or(0);

        let start = current.saturating_sub(rows / 2);
        self.listing
            .iter()
            .skip(start)
            .take(rows)
            .map(|line| (line.addr, line.text.clone(), line.addr == ip))
            .collect()
    }
}

/// Run the debugger with a program and optional scripted input.
pub fn run_debugger(program: Vec<Word13>, input: &str) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(program, input);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => {
                            app.mem_scroll = app.mem_scroll.saturating_sub(1);
                        }
                        KeyCode::Down => {
                            if app.mem_scroll < 0x1FFF {
                                app.mem_scroll += 1;
                            }
                        }
                        KeyCode::PageUp => {
                            app.mem_scroll = app.mem_scroll.saturating_sub(16);
                        }
                        KeyCode::PageDown => {
                            app.mem_scroll = (app.mem_scroll + 16).min(0x1FFF);
                        }
                        _ => {}
                    }
                }
            }
        }

        // Tick for continuous running
        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
