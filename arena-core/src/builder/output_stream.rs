//! Build console: prettified, user-facing build output.
//!
//! This is a PURE PRESENTATION LAYER. It has zero influence on build semantics.
//!
//! Responsibilities:
//! - Banners for the start and end of a build cycle
//! - Per-occurrence forbidden instruction warnings
//! - Prettifying engine progress for terminal display
//!
//! Diagnostics go through `tracing`; this is only what the user reads.

use crate::engine::ProgressMessage;
use crate::error::ArenaError;
use colored::Colorize;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Captured console output.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

struct BufferWriter(SharedBuffer);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Prettified build console.
pub struct Console {
    out: Box<dyn Write + Send>,
    /// Start of the current cycle, for progress timestamps.
    start_time: Instant,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, start_time: Instant::now() }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// A console writing into memory, and a handle to read what it wrote.
    pub fn buffer() -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::new(Box::new(BufferWriter(buffer.clone()))), buffer)
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        // A closed terminal must not fail the build
        let _ = self.out.write_fmt(args);
        let _ = self.out.write_all(b"\n");
        let _ = self.out.flush();
    }

    fn timestamp(&self) -> String {
        format!("{:>6.2}s", self.start_time.elapsed().as_secs_f64())
    }

    pub fn welcome(&mut self, dir: &Path, watch: bool) {
        let mode = if watch { " (watch mode)" } else { "" };
        self.line(format_args!(
            "{} {}{}",
            "arena".cyan().bold(),
            format!("building agent in {}", dir.display()).bold(),
            mode.dimmed()
        ));
    }

    pub fn building(&mut self, id: &str, name: &str) {
        self.start_time = Instant::now();
        self.line(format_args!("{} {} ({})", "▶ Building".green().bold(), id.bold(), name));
    }

    pub fn forbidden_instruction(&mut self, instruction: &str, line: usize) {
        self.line(format_args!(
            "{} {}",
            "⚠".yellow().bold(),
            format!(
                "Forbidden instruction {} on line {}; \
                 it will not be allowed when the agent is deployed",
                instruction, line
            )
            .yellow()
        ));
    }

    /// Print one engine progress message.
    pub fn progress(&mut self, message: &ProgressMessage) {
        let timestamp = self.timestamp().dimmed();

        match message {
            ProgressMessage::Stream(text) => {
                for line in text.lines() {
                    let line = line.trim_end();
                    if line.trim().is_empty() {
                        // Skip blank lines for cleaner output
                        continue;
                    }
                    if line.starts_with("Step ") {
                        self.line(format_args!("{} {}", timestamp, line.bold().green()));
                    } else {
                        self.line(format_args!("{} │ {}", timestamp, line));
                    }
                }
            }
            ProgressMessage::Status { id, status, progress } => {
                let id = id.as_deref().map(|id| format!("{}: ", id)).unwrap_or_default();
                let progress = progress.as_deref().unwrap_or("");
                self.line(format_args!(
                    "{} {}{} {}",
                    timestamp,
                    id.dimmed(),
                    status,
                    progress.dimmed()
                ));
            }
            ProgressMessage::Aux { image_id } => {
                let label = "image".dimmed();
                self.line(format_args!("{} {} {}", timestamp, label, image_id.dimmed()));
            }
            ProgressMessage::Error { message } => {
                let mark = "✗".red().bold();
                self.line(format_args!("{} {} {}", timestamp, mark, message.trim_end().red()));
            }
        }
    }

    /// Success banner; `image_id` is the engine's id for the image, when it reported one.
    pub fn success(&mut self, id: &str, image_id: Option<&str>) {
        self.line(format_args!(
            "{} Your agent has been built. Its id is {}",
            "✓".green().bold(),
            id.bold()
        ));
        if let Some(image_id) = image_id {
            self.line(format_args!("  {} {}", "image".dimmed(), image_id.dimmed()));
        }
    }

    pub fn awaiting_changes(&mut self, dir: &Path) {
        self.line(format_args!(
            "{}",
            format!("Watching for changes in {} (Ctrl-C to stop)", dir.display()).dimmed()
        ));
    }

    pub fn cycle_failed(&mut self, err: &ArenaError) {
        self.line(format_args!("{} {}", "✗".red().bold(), err.to_string().red()));
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").field("start_time", &self.start_time).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(buffer: &SharedBuffer) -> String {
        String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_stream_lines_are_split_and_blank_lines_skipped() {
        let (mut console, buffer) = Console::buffer();
        console.progress(&ProgressMessage::Stream(
            "Step 2/3 : RUN make\n\n ---> Running in 1f2e\nok\n".into(),
        ));

        let out = output(&buffer);
        assert_eq!(out.lines().count(), 3);
        assert!(out.contains("Step 2/3 : RUN make"));
        assert!(out.contains("---> Running in 1f2e"));
    }

    #[test]
    fn test_status_with_progress() {
        let (mut console, buffer) = Console::buffer();
        console.progress(&ProgressMessage::Status {
            id: Some("a1b2".into()),
            status: "Extracting".into(),
            progress: Some("[=>   ]".into()),
        });

        let out = output(&buffer);
        assert!(out.contains("a1b2: "));
        assert!(out.contains("Extracting"));
        assert!(out.contains("[=>   ]"));
    }

    #[test]
    fn test_banners() {
        let (mut console, buffer) = Console::buffer();
        console.building("fox-42", "Fox");
        console.forbidden_instruction("ADD", 3);
        console.success("fox-42", Some("sha256:0123abcd"));
        console.awaiting_changes(Path::new("/src/fox"));

        let out = output(&buffer);
        assert!(out.contains("fox-42"));
        assert!(out.contains("Forbidden instruction ADD on line 3"));
        assert!(out.contains("Its id is"));
        assert!(out.contains("sha256:0123abcd"));
        assert!(out.contains("/src/fox"));
    }
}
