//! Progress rendering.
//!
//! In interactive mode ordinary log lines are queued and flushed at the start
//! of each redraw, followed by the persistent sections (separator rule, alert
//! history, active group status). The cursor math relies on every frame being
//! written without a trailing newline, so the next frame can move up by the
//! previous frame's line count and clear downward.
//!
//! In non-interactive mode lines go straight to the [`Ui`] and redraws are
//! no-ops.

use crate::ui::{Style, Ui};
use parking_lot::Mutex;
use sewing_core::LogLevel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

const SPINNER: [char; 14] = [
    '⠄', '⠆', '⠇', '⠋', '⠙', '⠸', '⠰', '⠠', '⠰', '⠸', '⠙', '⠋', '⠇', '⠆',
];

const CURSOR_COL0: &str = "\x1b[1G";
const CLEAR_DOWN: &str = "\x1b[0J";

/// State handed to section renderers on each frame.
#[derive(Debug)]
pub struct Frame<'a> {
    pub ui: &'a Ui,
    pub tick: usize,
}

impl Frame<'_> {
    pub fn spinner(&self) -> char {
        spinner_glyph(self.tick)
    }
}

pub fn spinner_glyph(tick: usize) -> char {
    SPINNER[tick % SPINNER.len()]
}

pub type SectionRenderer = Arc<dyn Fn(&Frame<'_>) -> String + Send + Sync>;

pub fn section<F>(render: F) -> SectionRenderer
where
    F: Fn(&Frame<'_>) -> String + Send + Sync + 'static,
{
    Arc::new(render)
}

/// A region of the frame that is re-rendered on every redraw.
#[derive(Default)]
pub struct PersistentSection {
    content: Mutex<Option<SectionRenderer>>,
}

impl std::fmt::Debug for PersistentSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentSection")
            .field("set", &self.is_set())
            .finish()
    }
}

impl PersistentSection {
    pub fn set(&self, renderer: SectionRenderer) {
        *self.content.lock() = Some(renderer);
    }

    pub fn clear(&self) {
        *self.content.lock() = None;
    }

    pub fn is_set(&self) -> bool {
        self.content.lock().is_some()
    }

    pub fn render(&self, frame: &Frame<'_>) -> String {
        let renderer = self.content.lock().clone();
        renderer.map(|render| render(frame)).unwrap_or_default()
    }
}

pub struct ProgressView {
    ui: Arc<Ui>,
    interactive: bool,
    queued: Mutex<Vec<String>>,
    last_size: Mutex<usize>,
    tick: AtomicUsize,
    separator: PersistentSection,
    alerts: Mutex<Vec<String>>,
    active_group: PersistentSection,
}

impl std::fmt::Debug for ProgressView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressView")
            .field("interactive", &self.interactive)
            .field("queued", &self.queued.lock().len())
            .field("last_size", &*self.last_size.lock())
            .finish_non_exhaustive()
    }
}

impl ProgressView {
    pub fn new(ui: Arc<Ui>, interactive: bool) -> Self {
        Self {
            ui,
            interactive,
            queued: Mutex::new(Vec::new()),
            last_size: Mutex::new(0),
            tick: AtomicUsize::new(0),
            separator: PersistentSection::default(),
            alerts: Mutex::new(Vec::new()),
            active_group: PersistentSection::default(),
        }
    }

    pub fn ui(&self) -> &Ui {
        &self.ui
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Log an ordinary line. Lines below the display level are dropped.
    pub fn log(&self, text: &str, level: LogLevel) {
        if !self.ui.can_log_level(level) {
            return;
        }
        if self.interactive {
            self.queued.lock().push(text.to_string());
        } else {
            self.ui.log(text, level);
        }
    }

    /// Write to the error stream, bypassing the frame.
    pub fn error(&self, text: &str, level: LogLevel) {
        self.ui.error(text, level);
    }

    /// Append a line to the alert history shown under the separator.
    pub fn alert(&self, text: &str, level: LogLevel) {
        if !self.ui.can_log_level(level) {
            return;
        }
        self.alerts.lock().push(text.to_string());
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().clone()
    }

    /// Show a subdued rule of `ch` at the top of the persistent area.
    pub fn set_separator(&self, ch: char) {
        self.separator.set(section(move |frame| {
            frame.ui.style(Style::Subdued, frame.ui.rule(ch))
        }));
    }

    pub fn set_active_group(&self, renderer: SectionRenderer) {
        self.active_group.set(renderer);
    }

    pub fn clear_active_group(&self) {
        self.active_group.clear();
    }

    pub fn advance_spinner(&self) {
        self.tick.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick(&self) -> usize {
        self.tick.load(Ordering::Relaxed)
    }

    /// Render the persistent sections for the current tick.
    pub fn persistent_sections(&self) -> Vec<String> {
        let frame = Frame {
            ui: &self.ui,
            tick: self.tick(),
        };
        let alerts = self.alerts.lock().join("\n");
        vec![
            self.separator.render(&frame),
            alerts,
            self.active_group.render(&frame),
        ]
    }

    /// Repaint the frame. No-op unless interactive.
    pub fn redraw(&self) {
        if !self.interactive {
            return;
        }
        // Holding last_size for the whole repaint serializes concurrent
        // redraws, which would otherwise corrupt the cursor math.
        let mut last_size = self.last_size.lock();
        let queued = std::mem::take(&mut *self.queued.lock());
        let sections = self.persistent_sections();
        let (text, size) = compose_frame(*last_size, &queued, &sections);
        self.ui.write(&text);
        *last_size = size;
    }

    /// Start the redraw and spinner loops. Both stop when the guard drops.
    pub fn start_timers(self: &Arc<Self>, redraw_every: Duration, spin_every: Duration) -> TimerGuard {
        trace!(?redraw_every, ?spin_every, "starting render timers");
        let redraw = {
            let view = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(redraw_every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    view.redraw();
                }
            })
        };
        let spinner = {
            let view = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(spin_every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    view.advance_spinner();
                }
            })
        };
        TimerGuard {
            handles: vec![redraw, spinner],
        }
    }
}

/// Aborts the render loops on drop.
#[derive(Debug)]
pub struct TimerGuard {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        trace!("render timers stopped");
    }
}

/// Control sequence that returns the cursor to the top of the previous frame
/// and clears it.
pub fn frame_prefix(last_size: usize) -> String {
    let mut out = String::new();
    if last_size > 1 {
        out.push_str(&format!("\x1b[{}A", last_size - 1));
    }
    out.push_str(CURSOR_COL0);
    out.push_str(CLEAR_DOWN);
    out
}

/// Build one frame: clear the previous frame, flush queued lines, then draw
/// the non-empty sections. Returns the text and its line count.
pub fn compose_frame(last_size: usize, queued: &[String], sections: &[String]) -> (String, usize) {
    let mut out = frame_prefix(last_size);
    for line in queued {
        out.push_str(line);
        out.push('\n');
    }

    let body = sections
        .iter()
        .map(|section| section.trim_end())
        .filter(|section| !section.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let size = if body.is_empty() { 0 } else { body.lines().count() };
    out.push_str(&body);

    (out, size)
}
