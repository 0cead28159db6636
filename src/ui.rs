//! Rendering for every screen. Pure draw code: reads app state, writes the
//! frame, and records the output pane height so key handling can page and
//! clamp correctly.

use ratatui::{
    layout::{Constraint, Layout},
    style::{Style, Stylize},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::app::{App, MenuEntry, Screen};
use crate::disks::Disk;
use crate::orchestrator::{RunOutcome, RunReport};
use crate::runner::RunStatus;

pub fn draw(frame: &mut Frame, app: &mut App) {
    match &app.screen {
        Screen::Menu => draw_menu(frame, app),
        Screen::Running { .. } => draw_running(frame, app),
        Screen::DiskPicker {
            test_name,
            disks,
            selected,
        } => draw_picker(frame, test_name, disks, *selected),
        Screen::Summary { reports } => draw_summary(frame, reports),
        Screen::Message { lines } => draw_message(frame, lines),
    }
}

fn draw_menu(frame: &mut Frame, app: &App) {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    frame.render_widget(
        Paragraph::new(vec![
            Line::from("vitals - Hardware Diagnostics").bold(),
            Line::from("↑↓ move • Enter run • a run all • o logs folder • q quit"),
        ])
        .centered(),
        header,
    );

    let entries = app.menu_entries();
    let mut lines: Vec<Line> = Vec::new();
    let mut entry_rows: Vec<usize> = Vec::new();
    let mut last_section = "";
    for (index, entry) in entries.iter().enumerate() {
        let selected = index == app.selected;
        match entry {
            MenuEntry::Test(i) => {
                let spec = &app.registry.tests()[*i];
                if spec.section != last_section {
                    lines.push(Line::from(format!(" {}", spec.section)).bold().dark_gray());
                    last_section = &spec.section;
                }
                let available = app.registry.is_available(spec);
                let label = if available {
                    format!("   {}", spec.name)
                } else {
                    format!("   [MISSING] {}", spec.name)
                };
                let mut style = Style::new();
                if !available {
                    style = style.dim();
                }
                if selected {
                    style = style.reversed();
                }
                entry_rows.push(lines.len());
                lines.push(Line::styled(label, style));
            }
            MenuEntry::RunAll => {
                lines.push(Line::from(""));
                push_row(&mut lines, &mut entry_rows, selected, " Run All Tests");
            }
            MenuEntry::OpenLogs => {
                push_row(&mut lines, &mut entry_rows, selected, " View Logs Folder");
            }
            MenuEntry::Quit => {
                push_row(&mut lines, &mut entry_rows, selected, " Exit");
            }
        }
    }

    // Keep the selected row on screen.
    let height = body.height as usize;
    let selected_row = entry_rows.get(app.selected).copied().unwrap_or(0);
    let offset = if height > 0 && selected_row + 1 > height {
        selected_row + 1 - height
    } else {
        0
    };
    frame.render_widget(Paragraph::new(lines).scroll((offset as u16, 0)), body);

    frame.render_widget(
        Paragraph::new(format!("Logs: {}", app.logs_dir.display())).dim(),
        footer,
    );
}

fn push_row(
    lines: &mut Vec<Line<'static>>,
    entry_rows: &mut Vec<usize>,
    selected: bool,
    label: &'static str,
) {
    let style = if selected {
        Style::new().reversed()
    } else {
        Style::new()
    };
    entry_rows.push(lines.len());
    lines.push(Line::styled(label, style));
}

fn draw_running(frame: &mut Frame, app: &mut App) {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Min(1),
        Constraint::Length(2),
    ])
    .areas(frame.area());

    let height = body.height as usize;
    app.pane_height = height;

    let live = app.active_run().map(|handle| {
        let elapsed = chrono::Local::now()
            .signed_duration_since(handle.started_at())
            .num_seconds()
            .max(0);
        (handle.line_count(), handle.log_note(), elapsed)
    });
    let in_run_all = app.in_run_all();

    let Screen::Running {
        test_name,
        command_line,
        view,
        finished,
    } = &mut app.screen
    else {
        return;
    };

    let max_top = app.buffer.max_top_offset(height);
    let top = if view.follow {
        max_top
    } else {
        view.scroll.min(max_top)
    };
    view.scroll = top;

    frame.render_widget(
        Paragraph::new(vec![
            Line::from(format!("Running: {}", test_name)).bold(),
            Line::from(format!("Command: {}", command_line)).dim(),
        ]),
        header,
    );

    let pane: Vec<Line> = app
        .buffer
        .visible_window(top, height)
        .into_iter()
        .map(Line::from)
        .collect();
    frame.render_widget(Paragraph::new(pane), body);

    let (status_line, help_line) = match finished {
        Some(run) => {
            let status_text = match run.status {
                RunStatus::Completed {
                    exit_code: Some(code),
                } if code != 0 => format!("Completed (exit code {})", code),
                status => status.label().to_string(),
            };
            let detail = match (&run.log_path, &run.log_note) {
                (Some(path), _) => format!("Log saved: {}", path.display()),
                (None, Some(note)) => note.clone(),
                (None, None) => String::new(),
            };
            (
                Line::from(format!("Finished: {} - {}   {}", run.test_name, status_text, detail)),
                Line::from("Press Enter to continue • ↑↓ scroll").reversed(),
            )
        }
        None => {
            let (lines_seen, log_note, elapsed) = match &live {
                Some((count, note, elapsed)) => (*count, note.clone(), *elapsed),
                None => (0, None, 0),
            };
            let mut status = format!("Streaming • {}s • {} lines", elapsed, lines_seen);
            if !view.follow {
                status.push_str(" • scrolled (End to follow)");
            }
            if let Some(note) = log_note {
                status.push_str(" • ");
                status.push_str(&note);
            }
            let help = if in_run_all {
                "s=stop test • Esc=stop all • ↑↓ scroll"
            } else {
                "s=stop • ↑↓ scroll"
            };
            (Line::from(status).dim(), Line::from(help).reversed())
        }
    };
    frame.render_widget(Paragraph::new(vec![status_line, help_line]), footer);
}

fn draw_picker(frame: &mut Frame, test_name: &str, disks: &[Disk], selected: usize) {
    let [header, body] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(1)]).areas(frame.area());

    frame.render_widget(
        Paragraph::new(vec![
            Line::from(format!("Select a disk for {} (q=Cancel)", test_name)).bold(),
            Line::from("Use arrows ↑↓ and Enter.").dim(),
        ]),
        header,
    );

    let rows: Vec<Line> = disks
        .iter()
        .enumerate()
        .map(|(index, disk)| {
            let style = if index == selected {
                Style::new().reversed()
            } else {
                Style::new()
            };
            Line::styled(format!("  {}", disk.label()), style)
        })
        .collect();
    frame.render_widget(Paragraph::new(rows), body);
}

fn draw_summary(frame: &mut Frame, reports: &[RunReport]) {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Min(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    frame.render_widget(
        Paragraph::new(Line::from("Run All Results").bold()),
        header,
    );

    let rows: Vec<Line> = reports
        .iter()
        .map(|report| {
            let outcome = Span::from(report.outcome.label());
            let outcome = match report.outcome {
                RunOutcome::Completed => outcome.green(),
                RunOutcome::Cancelled => outcome.yellow(),
                RunOutcome::Failed | RunOutcome::ToolMissing => outcome.red(),
                RunOutcome::Skipped => outcome.dim(),
            };
            Line::from(vec![
                Span::from(format!("  {:<28} ", report.test_name)),
                outcome,
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(rows), body);

    frame.render_widget(
        Paragraph::new("Press any key to return to the menu").dim(),
        footer,
    );
}

fn draw_message(frame: &mut Frame, lines: &[String]) {
    let [body, footer] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(frame.area());

    let text: Vec<Line> = lines.iter().map(|l| Line::from(l.as_str())).collect();
    frame.render_widget(Paragraph::new(text), body);
    frame.render_widget(Paragraph::new("Press any key to continue...").dim(), footer);
}
