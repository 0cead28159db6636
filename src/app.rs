//! Application state and key dispatch for the interactive menu.
//!
//! The view layer owns no run logic: it asks the registry what exists, tells
//! the runner to start or cancel, and renders whatever the scrollback buffer
//! holds. The event loop blocks only on "next keypress or tick" so a cancel
//! request is always serviced promptly, however busy the child process is.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::DefaultTerminal;

use crate::config::Config;
use crate::disks::{self, Disk};
use crate::orchestrator::{Orchestrator, RunOutcome, RunReport};
use crate::registry::Registry;
use crate::runner::{ProcessRunner, RunConfig, RunHandle, RunRequest, RunStatus};
use crate::scrollback::ScrollbackBuffer;
use crate::ui;

/// One row of the main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuEntry {
    /// Index into `Registry::tests`.
    Test(usize),
    RunAll,
    OpenLogs,
    Quit,
}

/// Scroll state of the output pane. While `follow` is set the pane sticks to
/// the newest line; scrolling up detaches, scrolling back to the bottom
/// re-attaches.
#[derive(Debug, Clone, Copy)]
pub struct OutputView {
    pub scroll: usize,
    pub follow: bool,
}

impl OutputView {
    fn following() -> Self {
        Self {
            scroll: 0,
            follow: true,
        }
    }
}

/// Terminal facts about a finalized run, kept for the footer after the
/// handle has been released.
#[derive(Debug, Clone)]
pub struct FinishedRun {
    pub test_name: String,
    pub status: RunStatus,
    pub log_path: Option<PathBuf>,
    pub log_note: Option<String>,
}

impl FinishedRun {
    fn from_handle(handle: &RunHandle) -> Self {
        Self {
            test_name: handle.test_name().to_string(),
            status: handle.status(),
            log_path: handle.log_path(),
            log_note: handle.log_note(),
        }
    }
}

pub enum Screen {
    Menu,
    Running {
        test_name: String,
        command_line: String,
        view: OutputView,
        finished: Option<FinishedRun>,
    },
    DiskPicker {
        test_name: String,
        disks: Vec<Disk>,
        selected: usize,
    },
    Summary {
        reports: Vec<RunReport>,
    },
    Message {
        lines: Vec<String>,
    },
}

pub struct App {
    pub registry: Registry,
    pub config: Config,
    pub logs_dir: PathBuf,
    pub buffer: Arc<ScrollbackBuffer>,
    pub screen: Screen,
    pub selected: usize,
    /// Output pane height from the last draw; key handling uses it to page
    /// and clamp scrolling.
    pub pane_height: usize,
    runner: ProcessRunner,
    run_all: Option<Orchestrator>,
    should_quit: bool,
}

impl App {
    pub fn new(registry: Registry, config: Config, logs_dir: PathBuf) -> Self {
        let buffer = Arc::new(ScrollbackBuffer::new(config.retention_cap));
        let runner = ProcessRunner::new(RunConfig {
            logs_dir: logs_dir.clone(),
            grace_period: config.grace_period(),
        });
        Self {
            registry,
            config,
            logs_dir,
            buffer,
            screen: Screen::Menu,
            selected: 0,
            pane_height: 0,
            runner,
            run_all: None,
            should_quit: false,
        }
    }

    /// Main loop: advance run state, draw, then wait for one keypress or the
    /// next tick. Never blocks on child-process I/O.
    pub fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        while !self.should_quit {
            self.drive();
            terminal.draw(|frame| ui::draw(frame, &mut self))?;
            if event::poll(self.config.tick())? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn menu_entries(&self) -> Vec<MenuEntry> {
        let mut entries: Vec<MenuEntry> = (0..self.registry.tests().len())
            .map(MenuEntry::Test)
            .collect();
        entries.push(MenuEntry::RunAll);
        entries.push(MenuEntry::OpenLogs);
        entries.push(MenuEntry::Quit);
        entries
    }

    pub fn active_run(&self) -> Option<&RunHandle> {
        self.runner.active()
    }

    pub fn in_run_all(&self) -> bool {
        self.run_all.is_some()
    }

    /// Per-frame bookkeeping: collect a finalized run, and in run-all mode
    /// start the next test or move to the summary.
    fn drive(&mut self) {
        if let Some(handle) = self.runner.take_finished() {
            let finished = FinishedRun::from_handle(&handle);
            if let Some(orchestrator) = self.run_all.as_mut() {
                orchestrator.record(finished.test_name, RunOutcome::from(finished.status));
            } else if let Screen::Running { finished: slot, .. } = &mut self.screen {
                *slot = Some(finished);
            }
        }
        if self.run_all.is_some() && self.runner.active().is_none() {
            self.advance_run_all();
        }
    }

    fn advance_run_all(&mut self) {
        loop {
            let next = match self.run_all.as_mut() {
                Some(orchestrator) => orchestrator.next_test(),
                None => return,
            };
            let Some(name) = next else {
                if let Some(orchestrator) = self.run_all.take() {
                    self.screen = Screen::Summary {
                        reports: orchestrator.into_reports(),
                    };
                }
                return;
            };
            let Ok(spec) = self.registry.resolve(&name) else {
                if let Some(orchestrator) = self.run_all.as_mut() {
                    orchestrator.record(name, RunOutcome::Skipped);
                }
                continue;
            };
            if spec.needs_disk() {
                self.buffer
                    .append(format!("Skipping {} (requires disk selection)", spec.name));
                if let Some(orchestrator) = self.run_all.as_mut() {
                    orchestrator.record(name, RunOutcome::Skipped);
                }
                continue;
            }
            let request = RunRequest::from_spec(spec, &self.registry);
            let command_line = spec.command_line();
            let test_name = spec.name.clone();
            self.buffer.clear();
            match self.runner.start(request, Arc::clone(&self.buffer)) {
                Ok(_) => {
                    self.screen = Screen::Running {
                        test_name,
                        command_line,
                        view: OutputView::following(),
                        finished: None,
                    };
                    return;
                }
                Err(e) => {
                    tracing::warn!("run-all could not start {}: {}", name, e);
                    if let Some(orchestrator) = self.run_all.as_mut() {
                        orchestrator.record(name, RunOutcome::Failed);
                    }
                }
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }
        match &self.screen {
            Screen::Menu => self.handle_menu_key(key),
            Screen::Running { .. } => self.handle_running_key(key),
            Screen::DiskPicker { .. } => self.handle_picker_key(key),
            Screen::Summary { .. } | Screen::Message { .. } => {
                // Any key returns to the menu.
                self.screen = Screen::Menu;
            }
        }
    }

    fn handle_menu_key(&mut self, key: KeyEvent) {
        let entries = self.menu_entries();
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (self.selected + 1).min(entries.len() - 1);
            }
            KeyCode::Enter => self.activate(entries[self.selected]),
            KeyCode::Char('a') | KeyCode::Char('A') => self.start_run_all(),
            KeyCode::Char('o') | KeyCode::Char('O') => self.open_logs_folder(),
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            _ => {}
        }
    }

    fn activate(&mut self, entry: MenuEntry) {
        match entry {
            MenuEntry::Test(index) => {
                let spec = &self.registry.tests()[index];
                if !self.registry.is_available(spec) {
                    self.screen = Screen::Message {
                        lines: vec![
                            format!("Required tool '{}' is not installed.", spec.required_bin),
                            "Install it via your package manager, then restart vitals.".to_string(),
                        ],
                    };
                    return;
                }
                if spec.needs_disk() {
                    let found = disks::discover();
                    if found.is_empty() {
                        self.screen = Screen::Message {
                            lines: vec!["No storage disks found! Skipping disk test.".to_string()],
                        };
                        return;
                    }
                    self.screen = Screen::DiskPicker {
                        test_name: spec.name.clone(),
                        disks: found,
                        selected: 0,
                    };
                    return;
                }
                let name = spec.name.clone();
                self.start_test(&name, None);
            }
            MenuEntry::RunAll => self.start_run_all(),
            MenuEntry::OpenLogs => self.open_logs_folder(),
            MenuEntry::Quit => self.should_quit = true,
        }
    }

    fn start_test(&mut self, name: &str, disk: Option<&str>) {
        let Ok(spec) = self.registry.resolve(name) else {
            tracing::warn!("tried to start unknown test {:?}", name);
            return;
        };
        let request = RunRequest::with_disk(spec, &self.registry, disk);
        let command_line = request.argv.join(" ");
        let test_name = spec.name.clone();
        self.buffer.clear();
        match self.runner.start(request, Arc::clone(&self.buffer)) {
            Ok(_) => {
                self.screen = Screen::Running {
                    test_name,
                    command_line,
                    view: OutputView::following(),
                    finished: None,
                };
            }
            Err(e) => {
                tracing::warn!("could not start {}: {}", name, e);
            }
        }
    }

    fn start_run_all(&mut self) {
        if self.runner.active().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let names: Vec<String> = self
            .registry
            .tests()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        self.run_all = Some(Orchestrator::new(names));
        // drive() starts the first test before the next draw.
    }

    fn handle_running_key(&mut self, key: KeyEvent) {
        let Screen::Running { view, finished, .. } = &mut self.screen else {
            return;
        };
        let page = self.pane_height.max(1);
        let max_top = self.buffer.max_top_offset(page);

        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                let top = if view.follow { max_top } else { view.scroll.min(max_top) };
                view.scroll = top.saturating_sub(1);
                view.follow = false;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if !view.follow {
                    view.scroll = (view.scroll + 1).min(max_top);
                    if view.scroll >= max_top {
                        view.follow = true;
                    }
                }
            }
            KeyCode::PageUp => {
                let top = if view.follow { max_top } else { view.scroll.min(max_top) };
                view.scroll = top.saturating_sub(page);
                view.follow = false;
            }
            KeyCode::PageDown => {
                if !view.follow {
                    view.scroll = (view.scroll + page).min(max_top);
                    if view.scroll >= max_top {
                        view.follow = true;
                    }
                }
            }
            KeyCode::Home => {
                view.scroll = 0;
                view.follow = false;
            }
            KeyCode::End => {
                view.follow = true;
            }
            KeyCode::Char('s') | KeyCode::Char('q') => {
                if finished.is_some() {
                    self.finish_running_screen();
                } else {
                    self.runner.cancel_active();
                }
            }
            KeyCode::Esc => {
                if finished.is_some() {
                    self.finish_running_screen();
                } else {
                    // Global cancel: end the current test and, in run-all
                    // mode, everything still queued.
                    if let Some(orchestrator) = self.run_all.as_mut() {
                        orchestrator.cancel_remaining();
                    }
                    self.runner.cancel_active();
                }
            }
            KeyCode::Enter => {
                if finished.is_some() {
                    self.finish_running_screen();
                }
            }
            _ => {}
        }
    }

    fn finish_running_screen(&mut self) {
        self.screen = Screen::Menu;
    }

    fn handle_picker_key(&mut self, key: KeyEvent) {
        let Screen::DiskPicker {
            test_name,
            disks,
            selected,
        } = &mut self.screen
        else {
            return;
        };
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => *selected = selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                *selected = (*selected + 1).min(disks.len().saturating_sub(1));
            }
            KeyCode::Enter => {
                let name = test_name.clone();
                let disk = disks[*selected].name.clone();
                self.start_test(&name, Some(&disk));
            }
            KeyCode::Char('q') | KeyCode::Esc => self.screen = Screen::Menu,
            _ => {}
        }
    }

    /// Open the logs directory in the desktop file manager, or show the path
    /// when no opener is available.
    fn open_logs_folder(&mut self) {
        match which::which("xdg-open") {
            Ok(opener) => {
                let spawned = std::process::Command::new(opener)
                    .arg(&self.logs_dir)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn();
                if let Err(e) = spawned {
                    tracing::warn!("xdg-open failed: {}", e);
                }
            }
            Err(_) => {
                self.screen = Screen::Message {
                    lines: vec![
                        "Logs folder location:".to_string(),
                        self.logs_dir.display().to_string(),
                    ],
                };
            }
        }
    }
}
