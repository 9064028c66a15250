//! Local status display.
//!
//! The unit has a 16x2 character panel; this build renders it to the log,
//! and only when the text changes.

use tracing::info;

pub const COLUMNS: usize = 16;

pub trait StatusDisplay {
    fn show(&mut self, lines: &[String; 2]);
}

#[derive(Debug, Default)]
pub struct LogDisplay {
    shown: Option<[String; 2]>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Clip a line to the panel width.
pub fn fit(line: &str) -> String {
    line.chars().take(COLUMNS).collect()
}

impl StatusDisplay for LogDisplay {
    fn show(&mut self, lines: &[String; 2]) {
        let frame = [fit(&lines[0]), fit(&lines[1])];
        if self.shown.as_ref() == Some(&frame) {
            return;
        }
        info!(line1 = %frame[0], line2 = %frame[1], "display");
        self.shown = Some(frame);
    }
}
