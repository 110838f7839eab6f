//! Transcript scrollback
//!
//! Flattens a connection's execution log into display lines (most recent
//! execution first) and tracks a clamped scroll offset over them.
//!
//! The line count used for clamping is a structural estimate per execution:
//! three fixed lines, one per stdout line, and for non-empty stderr one per
//! stderr line plus the separator. It does not look at trailing newlines, so
//! it can exceed the rendered line count by a few lines.

use std::fmt;

use super::types::CommandExecution;

/// Separator placed before captured stderr
pub const STDERR_SEPARATOR: &str = "--- stderr ---";

/// One rendered transcript line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptLine {
    Blank,
    /// `$ command  [HH:MM:SS]`
    Header { command: String, time: String },
    Stdout(String),
    StderrSeparator,
    Stderr(String),
    /// Only emitted for non-zero exit codes
    ExitCode(i32),
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank => Ok(()),
            Self::Header { command, time } => write!(f, "$ {}  [{}]", command, time),
            Self::Stdout(line) | Self::Stderr(line) => f.write_str(line),
            Self::StderrSeparator => f.write_str(STDERR_SEPARATOR),
            Self::ExitCode(code) => write!(f, "[Exit code: {}]", code),
        }
    }
}

/// Render the log most-recent-first
pub fn render_transcript(executions: &[CommandExecution]) -> Vec<TranscriptLine> {
    let mut lines = Vec::new();

    for execution in executions.iter().rev() {
        lines.push(TranscriptLine::Blank);
        lines.push(TranscriptLine::Header {
            command: execution.command.clone(),
            time: execution.submitted_at.format("%H:%M:%S").to_string(),
        });

        if !execution.stdout.is_empty() {
            lines.extend(
                execution
                    .stdout
                    .trim_end_matches('\n')
                    .split('\n')
                    .map(|l| TranscriptLine::Stdout(l.to_string())),
            );
        }

        if !execution.stderr.is_empty() {
            lines.push(TranscriptLine::StderrSeparator);
            lines.extend(
                execution
                    .stderr
                    .trim_end_matches('\n')
                    .split('\n')
                    .map(|l| TranscriptLine::Stderr(l.to_string())),
            );
        }

        if execution.exit_code != 0 {
            lines.push(TranscriptLine::ExitCode(execution.exit_code));
        }
    }

    lines
}

/// Structural line-count estimate used to clamp scrolling
pub fn estimate_total_lines(executions: &[CommandExecution]) -> usize {
    executions
        .iter()
        .map(|e| {
            let stderr = if e.stderr.is_empty() {
                0
            } else {
                e.stderr.split('\n').count() + 1
            };
            3 + e.stdout.split('\n').count() + stderr
        })
        .sum()
}

/// Scroll position over one transcript; 0 shows the newest lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollbackModel {
    offset: usize,
}

impl ScrollbackModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move toward older content, pinned at the estimated total
    pub fn scroll_up(&mut self, lines: usize, executions: &[CommandExecution]) {
        let total = estimate_total_lines(executions);
        self.offset = self.offset.saturating_add(lines).min(total);
    }

    /// Move toward newer content, pinned at 0
    pub fn scroll_down(&mut self, lines: usize) {
        self.offset = self.offset.saturating_sub(lines);
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Lines `[offset, offset + height)` of `lines`, clamped to its length
    pub fn visible<'a>(&self, lines: &'a [TranscriptLine], height: usize) -> &'a [TranscriptLine] {
        let start = self.offset.min(lines.len());
        let end = start.saturating_add(height).min(lines.len());
        &lines[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::RemoteOutput;
    use std::time::Duration;

    fn execution(command: &str, stdout: &str, stderr: &str, exit_code: i32) -> CommandExecution {
        CommandExecution::pending(command).complete(
            RemoteOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_render_most_recent_first() {
        let log = vec![
            execution("first", "a\n", "", 0),
            execution("second", "b\nc\n", "oops\n", 2),
        ];

        let lines = render_transcript(&log);

        assert_eq!(lines[0], TranscriptLine::Blank);
        assert!(matches!(&lines[1], TranscriptLine::Header { command, .. } if command == "second"));
        assert_eq!(lines[2], TranscriptLine::Stdout("b".to_string()));
        assert_eq!(lines[3], TranscriptLine::Stdout("c".to_string()));
        assert_eq!(lines[4], TranscriptLine::StderrSeparator);
        assert_eq!(lines[5], TranscriptLine::Stderr("oops".to_string()));
        assert_eq!(lines[6], TranscriptLine::ExitCode(2));
        assert!(matches!(&lines[8], TranscriptLine::Header { command, .. } if command == "first"));
        assert_eq!(lines[9], TranscriptLine::Stdout("a".to_string()));
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn test_line_display() {
        assert_eq!(TranscriptLine::ExitCode(1).to_string(), "[Exit code: 1]");
        assert_eq!(TranscriptLine::StderrSeparator.to_string(), STDERR_SEPARATOR);
        let header = TranscriptLine::Header {
            command: "uptime".to_string(),
            time: "12:00:01".to_string(),
        };
        assert_eq!(header.to_string(), "$ uptime  [12:00:01]");
    }

    #[test]
    fn test_estimate() {
        // 3 + 3 ("b", "c", "")
        let plain = execution("ls", "b\nc\n", "", 0);
        assert_eq!(estimate_total_lines(std::slice::from_ref(&plain)), 6);

        // 3 + 1 ("") + 2 ("oops", "") + 1
        let failed = execution("x", "", "oops\n", 1);
        assert_eq!(estimate_total_lines(&[failed]), 7);

        assert_eq!(estimate_total_lines(&[]), 0);
    }

    #[test]
    fn test_scroll_clamps() {
        let log = vec![execution("ls", "b\nc\n", "", 0)];
        let total = estimate_total_lines(&log);
        let mut model = ScrollbackModel::new();

        model.scroll_up(total + 10, &log);
        assert_eq!(model.offset(), total);

        model.scroll_down(2);
        assert_eq!(model.offset(), total - 2);

        model.scroll_down(100);
        assert_eq!(model.offset(), 0);
    }

    #[test]
    fn test_scroll_on_empty_log_stays_at_zero() {
        let mut model = ScrollbackModel::new();
        model.scroll_up(5, &[]);
        assert_eq!(model.offset(), 0);
    }

    #[test]
    fn test_visible_window() {
        let log = vec![
            execution("one", "1\n", "", 0),
            execution("two", "2\n", "", 0),
        ];
        let lines = render_transcript(&log);
        let mut model = ScrollbackModel::new();

        assert_eq!(model.visible(&lines, 3).len(), 3);
        assert_eq!(model.visible(&lines, 100).len(), lines.len());

        model.scroll_up(3, &log);
        let window = model.visible(&lines, 10);
        assert_eq!(window.len(), lines.len() - 3);
        assert_eq!(window[0], TranscriptLine::Blank);

        model.scroll_up(100, &log);
        assert!(model.visible(&lines, 10).is_empty());
    }
}
