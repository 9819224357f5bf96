//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use super::app::DebuggerApp;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code, machine state, status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(6),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_machine_state(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, console output, help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_console(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

/// Draw the disassembly window around the instruction pointer.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let rows = (area.height as usize).saturating_sub(2);
    let window = app.disassembly_window(rows);

    let items: Vec<ListItem> = window
        .iter()
        .map(|(addr, text, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}{:04X}: {}", bp, prefix, addr, text)).style(style)
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    frame.render_widget(list, area);
}

/// Draw the pointer cells, flags and cycle counter.
fn draw_machine_state(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let flags = app.cpu.flags;

    let flag_span = |name: &'static str, set: bool| {
        Span::styled(
            format!(" {}={}", name, set as u8),
            if set {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::DarkGray)
            },
        )
    };

    let content = vec![
        Line::from(vec![
            Span::raw("IP: "),
            Span::styled(
                format!("{:04X}", app.cpu.mem.ip().get()),
                Style::default().fg(Color::Yellow),
            ),
            Span::raw("   SP: "),
            Span::styled(
                format!("{:04X}", app.cpu.mem.sp().get()),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::raw("Flags:"),
            flag_span("Z", flags.zero),
            flag_span("S", flags.sign),
            flag_span("C", flags.carry),
            flag_span("V", flags.overflow),
        ]),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   State: "),
            Span::styled(
                format!("{:?}", app.cpu.state),
                if app.cpu.is_running() {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                },
            ),
        ]),
    ];

    let paragraph = Paragraph::new(content).block(
        Block::default()
            .title(" Machine ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );

    frame.render_widget(paragraph, area);
}

/// Draw the scrollable memory view.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start = app.mem_scroll.min(0x1FFF);
    let end = (start + visible_rows).min(0x2000);

    let ip = app.cpu.mem.ip().get();

    let items: Vec<ListItem> = (start..end)
        .map(|addr| {
            let value = app.cpu.mem.peek(addr as u16);
            let is_ip = addr as u16 == ip;

            let text = format!("{:04X}: {}  ({})", addr, value, value.to_i16());

            let style = if is_ip {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if !value.is_zero() {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );

    frame.render_widget(list, area);
}

/// Draw the captured console output.
fn draw_console(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let output = app.io.output();
    let visible_rows = (area.height as usize).saturating_sub(2);

    // Show the tail that fits.
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(visible_rows);
    let tail = lines[start..].join("\n");

    let paragraph = Paragraph::new(tail)
        .style(Style::default().fg(Color::White))
        .block(
            Block::default()
                .title(" Console ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Blue)),
        );

    frame.render_widget(paragraph, area);
}

/// Draw the status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default().title(" Status ").borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw the help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓/PgUp/PgDn: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default().title(" Help ").borders(Borders::ALL));

    frame.render_widget(help, area);
}
