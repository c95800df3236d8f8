//! # Demo Application
//!
//! A small deterministic TUI used as a capture target. It renders a row of
//! buttons, a checkbox, a text field and a status line, and reacts to keys
//! and mouse events so every interaction verb has something to act on:
//!
//! - `click:#Increment`, `click:.Reset`, `click:Enable feature` hit widgets by label
//! - `hover:Exit` highlights a button
//! - `type:hello` fills the text field
//! - `press:left`, `press:right`, `press:enter`, `press:space`, `press:q`
//!
//! Output never depends on wall-clock time, so two captures of the same
//! script produce identical artifacts.

use clap::Parser;
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
        MouseEventKind,
    },
    execute, queue,
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::{
    error::Error,
    io::{Stdout, Write, stdout},
    time::{Duration, Instant},
};

#[derive(Parser, Debug)]
#[command(name = "demo-app", about = "Capture target for tui-snapshots")]
struct Args {
    /// Exit on its own after this many seconds
    #[arg(long)]
    exit_after: Option<u64>,

    /// Title shown in the header
    #[arg(long, default_value = "Demo App")]
    title: String,
}

const BUTTONS: [&str; 3] = ["Increment", "Reset", "Exit"];
const BUTTON_ROW: u16 = 3;
const CHECKBOX_ROW: u16 = 7;
const INPUT_ROW: u16 = 9;

#[derive(Default)]
struct App {
    selected: usize,
    hovered: Option<usize>,
    counter: u64,
    checked: bool,
    input: String,
    status: String,
    quit: bool,
}

/// Column span of each button, including its brackets.
fn button_spans() -> Vec<(u16, u16)> {
    let mut x = 2;
    BUTTONS
        .iter()
        .map(|label| {
            let width = label.len() as u16 + 4;
            let span = (x, x + width);
            x += width + 2;
            span
        })
        .collect()
}

impl App {
    fn activate(&mut self, index: usize) {
        self.selected = index;
        match index {
            0 => {
                self.counter += 1;
                self.status = format!("Counter incremented to {}", self.counter);
            }
            1 => {
                self.counter = 0;
                self.status = "Counter reset".to_string();
            }
            _ => self.quit = true,
        }
    }

    fn key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        match code {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => self.quit = true,
            KeyCode::Char('q') if self.input.is_empty() => self.quit = true,
            KeyCode::Left => self.selected = self.selected.saturating_sub(1),
            KeyCode::Right => self.selected = (self.selected + 1).min(BUTTONS.len() - 1),
            KeyCode::Enter => self.activate(self.selected),
            KeyCode::Char(' ') if self.input.is_empty() => self.checked = !self.checked,
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Esc => {
                self.input.clear();
                self.status = "Input cleared".to_string();
            }
            _ => {}
        }
    }

    fn button_at(col: u16, row: u16) -> Option<usize> {
        if !(BUTTON_ROW..BUTTON_ROW + 3).contains(&row) {
            return None;
        }
        button_spans()
            .iter()
            .position(|(start, end)| (*start..*end).contains(&col))
    }

    fn mouse(&mut self, kind: MouseEventKind, col: u16, row: u16) {
        match kind {
            MouseEventKind::Down(_) => {
                if let Some(index) = Self::button_at(col, row) {
                    self.activate(index);
                } else if row == CHECKBOX_ROW {
                    self.checked = !self.checked;
                    self.status = format!("Feature {}", if self.checked { "enabled" } else { "disabled" });
                }
            }
            MouseEventKind::Moved => self.hovered = Self::button_at(col, row),
            _ => {}
        }
    }

    fn render(&self, title: &str, w: &mut Stdout) -> Result<(), Box<dyn Error>> {
        let (width, _) = terminal::size()?;
        queue!(
            w,
            Clear(ClearType::All),
            MoveTo(0, 0),
            SetBackgroundColor(Color::DarkBlue),
            SetForegroundColor(Color::White),
            Print(format!("{:<width$}", format!(" {title}"), width = width as usize)),
            ResetColor,
        )?;

        for (i, ((x, end), label)) in button_spans().into_iter().zip(BUTTONS).enumerate() {
            let inner = (end - x - 2) as usize;
            let color = if self.hovered == Some(i) {
                Color::Yellow
            } else if self.selected == i {
                Color::Cyan
            } else {
                Color::White
            };
            queue!(
                w,
                SetForegroundColor(color),
                MoveTo(x, BUTTON_ROW),
                Print(format!("+{}+", "-".repeat(inner))),
                MoveTo(x, BUTTON_ROW + 1),
                Print(format!("| {label} |")),
                MoveTo(x, BUTTON_ROW + 2),
                Print(format!("+{}+", "-".repeat(inner))),
                ResetColor,
            )?;
        }

        queue!(
            w,
            MoveTo(2, CHECKBOX_ROW),
            Print(format!("[{}] Enable feature", if self.checked { "x" } else { " " })),
            MoveTo(2, INPUT_ROW),
            Print("Input: "),
            SetForegroundColor(Color::Green),
            Print(&self.input),
            ResetColor,
            MoveTo(2, INPUT_ROW + 2),
            Print(format!("Counter: {}", self.counter)),
            MoveTo(2, INPUT_ROW + 4),
            SetForegroundColor(Color::DarkGrey),
            Print(if self.status.is_empty() { "Ready" } else { self.status.as_str() }),
            ResetColor,
        )?;
        w.flush()?;
        Ok(())
    }
}

fn run(args: &Args, w: &mut Stdout) -> Result<(), Box<dyn Error>> {
    let started = Instant::now();
    let mut app = App::default();
    app.render(&args.title, w)?;

    while !app.quit {
        if let Some(limit) = args.exit_after {
            if started.elapsed() >= Duration::from_secs(limit) {
                break;
            }
        }
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => app.key(key.code, key.modifiers),
            Event::Mouse(mouse) => app.mouse(mouse.kind, mouse.column, mouse.row),
            Event::Resize(_, _) => {}
            _ => continue,
        }
        app.render(&args.title, w)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut w = stdout();
    terminal::enable_raw_mode()?;
    execute!(w, EnterAlternateScreen, EnableMouseCapture, Hide)?;

    let result = run(&args, &mut w);

    execute!(w, Show, DisableMouseCapture, LeaveAlternateScreen)?;
    terminal::disable_raw_mode()?;

    if let Err(ref e) = result {
        eprintln!("Application error: {}", e);
    }
    result
}
