//! Terminal rendering of the provisioning timeline
//!
//! The renderer follows the orchestrator's progress channel. On a terminal it
//! redraws the whole timeline in place after every update; otherwise it prints
//! one line per status change so logs and CI output stay readable.

use crossterm::{
    cursor::MoveUp,
    queue,
    style::{Print, Stylize},
    terminal::{self, Clear, ClearType},
};
use std::io::{self, IsTerminal, Write};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use cmsforge_engine::{Step, StepStatus, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Redraw in place with colors
    Live,
    /// Append-only, no escape sequences
    Plain,
}

impl DisplayMode {
    /// `Live` only when stdout is a terminal and `NO_COLOR` is unset.
    #[must_use]
    pub fn detect() -> Self {
        if io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none() {
            Self::Live
        } else {
            Self::Plain
        }
    }
}

fn glyph(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "·",
        StepStatus::InProgress => "›",
        StepStatus::Complete => "✓",
        StepStatus::Error => "✗",
    }
}

/// One row of a live frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLine {
    Step { status: StepStatus, label: String },
    Output(String),
    Error(String),
}

impl FrameLine {
    /// Unstyled row text, cut to at most `width` columns.
    #[must_use]
    pub fn text(&self, width: Option<usize>) -> String {
        let full = match self {
            Self::Step { status, label } => format!("{} {label}", glyph(*status)),
            Self::Output(line) | Self::Error(line) => format!("    {line}"),
        };
        match width {
            Some(width) => fit(&full, width),
            None => full,
        }
    }
}

/// Rows of a full redraw: every step, the live output of the running step and
/// any error.
#[must_use]
pub fn frame(timeline: &Timeline) -> Vec<FrameLine> {
    let mut lines = Vec::with_capacity(timeline.len());
    for step in timeline.steps() {
        lines.push(FrameLine::Step {
            status: step.status,
            label: step.label.clone(),
        });
        if step.status == StepStatus::InProgress {
            lines.extend(step.output_lines.iter().cloned().map(FrameLine::Output));
        }
        if let Some(error) = &step.error {
            lines.push(FrameLine::Error(error.clone()));
        }
    }
    lines
}

/// Cut `text` so it occupies one terminal row of `width` columns. The last
/// column stays free so the cursor never wraps.
fn fit(text: &str, width: usize) -> String {
    let room = width.saturating_sub(1).max(1);
    if text.chars().count() <= room {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(room - 1).collect();
    cut.push('…');
    cut
}

/// Lines announcing every status that changed between two snapshots.
///
/// Output-only updates produce nothing. A snapshot with a different step list
/// is treated as a fresh run.
#[must_use]
pub fn plain_events(previous: Option<&Timeline>, current: &Timeline) -> Vec<String> {
    let total = current.len();
    let previous = previous.filter(|p| {
        p.len() == total
            && p.steps()
                .iter()
                .zip(current.steps())
                .all(|(a, b)| a.label == b.label)
    });

    current
        .steps()
        .iter()
        .enumerate()
        .filter(|(index, step)| {
            let before = previous
                .and_then(|p| p.get(*index))
                .map_or(StepStatus::Pending, |s| s.status);
            step.status != before
        })
        .map(|(index, step)| plain_line(index + 1, total, step))
        .collect()
}

fn plain_line(number: usize, total: usize, step: &Step) -> String {
    let prefix = format!("[{number}/{total}] {}", step.label);
    match step.status {
        StepStatus::Pending => format!("{prefix}: pending"),
        StepStatus::InProgress => format!("{prefix} ..."),
        StepStatus::Complete => format!("{prefix}: done"),
        StepStatus::Error => format!(
            "{prefix}: failed: {}",
            step.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Stateful renderer for one run.
pub struct ProgressDisplay {
    mode: DisplayMode,
    drawn_lines: u16,
    last: Option<Timeline>,
}

impl ProgressDisplay {
    #[must_use]
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            drawn_lines: 0,
            last: None,
        }
    }

    pub fn render(&mut self, timeline: &Timeline, out: &mut impl Write) -> io::Result<()> {
        if self.last.as_ref() == Some(timeline) {
            return Ok(());
        }
        match self.mode {
            DisplayMode::Live => {
                let width = terminal::size().ok().map(|(cols, _)| usize::from(cols));
                self.redraw(timeline, width, out)?;
            }
            DisplayMode::Plain => {
                for line in plain_events(self.last.as_ref(), timeline) {
                    writeln!(out, "{line}")?;
                }
            }
        }
        out.flush()?;
        self.last = Some(timeline.clone());
        Ok(())
    }

    /// Every row is cut to `width`, so `drawn_lines` is the number of
    /// terminal rows to move back over next time.
    fn redraw(
        &mut self,
        timeline: &Timeline,
        width: Option<usize>,
        out: &mut impl Write,
    ) -> io::Result<()> {
        if self.drawn_lines > 0 {
            queue!(out, MoveUp(self.drawn_lines))?;
        }
        queue!(out, Print("\r"), Clear(ClearType::FromCursorDown))?;

        let mut drawn: u16 = 0;
        for line in frame(timeline) {
            let text = line.text(width);
            match &line {
                FrameLine::Step { status, .. } => {
                    let mark = glyph(*status);
                    match text.strip_prefix(mark) {
                        Some(rest) => {
                            let mark = match status {
                                StepStatus::Pending => mark.dark_grey(),
                                StepStatus::InProgress => mark.cyan(),
                                StepStatus::Complete => mark.green(),
                                StepStatus::Error => mark.red(),
                            };
                            queue!(out, Print(mark), Print(rest))?;
                        }
                        // Cut down to the ellipsis on a very narrow terminal
                        None => queue!(out, Print(text.as_str()))?,
                    }
                }
                FrameLine::Output(_) => queue!(out, Print(text.as_str().dark_grey()))?,
                FrameLine::Error(_) => queue!(out, Print(text.as_str().red()))?,
            }
            queue!(out, Print("\n"))?;
            drawn = drawn.saturating_add(1);
        }
        self.drawn_lines = drawn;
        Ok(())
    }
}

/// Render every snapshot published on `updates` until the sender is dropped.
pub fn spawn(mut updates: watch::Receiver<Timeline>, mode: DisplayMode) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut display = ProgressDisplay::new(mode);
        let mut stdout = io::stdout();
        loop {
            let timeline = updates.borrow_and_update().clone();
            if !timeline.is_empty()
                && let Err(e) = display.render(&timeline, &mut stdout)
            {
                tracing::debug!(error = %e, "Progress display write failed");
            }
            if updates.changed().await.is_err() {
                break;
            }
        }
        let last = updates.borrow().clone();
        if !last.is_empty()
            && let Err(e) = display.render(&last, &mut stdout)
        {
            tracing::debug!(error = %e, "Progress display write failed");
        }
    })
}
