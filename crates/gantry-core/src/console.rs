//! Console output buffer, command input with history, and the socket
//! subscriber that ties them to daemon events.
//!
//! Lines are stored with their ANSI sequences intact; interpreting them is
//! the renderer's job.

use crate::client::types::SocketEvent;
use crate::persist::{command_history_key, load_json, save_json, KeyValueStore};
use crate::ws::{OutboundEvent, ServerEvent};
use std::collections::VecDeque;
use std::sync::Arc;

pub const ANSI_RESET: &str = "\u{1b}[0m";
const ANSI_ERROR: &str = "\u{1b}[1m\u{1b}[41m";

/// Marker prefixed to lines generated by the panel rather than the server.
pub const TERMINAL_PRELUDE: &str = "\u{1b}[1m\u{1b}[33mcontainer@gantry~ \u{1b}[0m";

/// Maximum number of remembered commands.
pub const HISTORY_LIMIT: usize = 32;

pub const DEFAULT_SCROLLBACK: usize = 1000;
pub const DEFAULT_VIEWPORT_ROWS: usize = 24;

/// Strip one trailing `\r\n`, `\n` or `\r`.
pub fn strip_trailing_newline(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .or_else(|| text.strip_suffix('\r'))
        .unwrap_or(text)
}

// ── Output buffer ──────────────────────────────────────────────────────────

/// Ordered console lines with a viewport.
///
/// `viewport_top` is the index of the first visible line. The viewport is
/// "at the bottom" when it shows the last line; appends keep it there,
/// otherwise the position is preserved.
#[derive(Debug)]
pub struct ConsoleBuffer {
    lines: VecDeque<String>,
    scrollback: usize,
    viewport_rows: usize,
    viewport_top: usize,
    appended: u64,
}

impl ConsoleBuffer {
    pub fn new(scrollback: usize, viewport_rows: usize) -> Self {
        let scrollback = scrollback.max(1);
        Self {
            lines: VecDeque::with_capacity(scrollback.min(DEFAULT_SCROLLBACK)),
            scrollback,
            viewport_rows: viewport_rows.max(1),
            viewport_top: 0,
            appended: 0,
        }
    }

    pub fn append_line(&mut self, text: &str, is_prelude: bool) {
        let follow = !self.is_scrolled_up();
        let text = strip_trailing_newline(text);
        let line = if is_prelude {
            format!("{}{}", TERMINAL_PRELUDE, text)
        } else {
            text.to_string()
        };

        self.lines.push_back(line);
        self.appended += 1;

        let mut evicted = 0;
        while self.lines.len() > self.scrollback {
            self.lines.pop_front();
            evicted += 1;
        }

        if follow {
            self.viewport_top = self.bottom_top();
        } else {
            self.viewport_top = self.viewport_top.saturating_sub(evicted);
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.viewport_top = 0;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Total lines ever appended, including evicted and cleared ones.
    pub fn appended_total(&self) -> u64 {
        self.appended
    }

    /// The last `n` lines (fewer if the buffer holds fewer).
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &str> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).map(String::as_str)
    }

    pub fn visible_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .skip(self.viewport_top)
            .take(self.viewport_rows)
            .map(String::as_str)
    }

    pub fn viewport_top(&self) -> usize {
        self.viewport_top
    }

    pub fn viewport_rows(&self) -> usize {
        self.viewport_rows
    }

    fn bottom_top(&self) -> usize {
        self.lines.len().saturating_sub(self.viewport_rows)
    }

    pub fn is_scrolled_up(&self) -> bool {
        self.viewport_top < self.bottom_top()
    }

    pub fn scroll_up(&mut self, rows: usize) {
        self.viewport_top = self.viewport_top.saturating_sub(rows);
    }

    pub fn scroll_down(&mut self, rows: usize) {
        self.viewport_top = (self.viewport_top + rows).min(self.bottom_top());
    }

    pub fn scroll_to_bottom(&mut self) {
        self.viewport_top = self.bottom_top();
    }

    pub fn set_viewport_rows(&mut self, rows: usize) {
        let follow = !self.is_scrolled_up();
        self.viewport_rows = rows.max(1);
        if follow {
            self.viewport_top = self.bottom_top();
        } else {
            self.viewport_top = self.viewport_top.min(self.bottom_top());
        }
    }
}

// ── Command input ──────────────────────────────────────────────────────────

/// Input line plus recall over previously submitted commands.
///
/// History is newest-first. `index` is `None` when not browsing.
#[derive(Debug, Default)]
pub struct CommandInput {
    history: Vec<String>,
    index: Option<usize>,
    text: String,
}

impl CommandInput {
    pub fn with_history(mut history: Vec<String>) -> Self {
        history.truncate(HISTORY_LIMIT);
        Self {
            history,
            index: None,
            text: String::new(),
        }
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn history_index(&self) -> Option<usize> {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Record a command. Returns the text to send, or `None` for blank input.
    pub fn submit(&mut self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        self.history.insert(0, text.to_string());
        self.history.truncate(HISTORY_LIMIT);
        self.index = None;
        self.text.clear();
        Some(text.to_string())
    }

    /// Recall an older entry. Stops at the oldest one.
    pub fn previous(&mut self) -> &str {
        if self.history.is_empty() {
            return &self.text;
        }
        let last = self.history.len() - 1;
        let next = match self.index {
            None => 0,
            Some(i) => (i + 1).min(last),
        };
        self.index = Some(next);
        self.text = self.history[next].clone();
        &self.text
    }

    /// Recall a newer entry. Past the newest the input is emptied.
    pub fn next(&mut self) -> &str {
        self.index = match self.index {
            None | Some(0) => None,
            Some(i) => Some(i - 1),
        };
        self.text = match self.index {
            Some(i) => self.history[i].clone(),
            None => String::new(),
        };
        &self.text
    }
}

// ── Socket subscriber ──────────────────────────────────────────────────────

/// Console state for one server view.
pub struct ConsoleSink {
    server_id: String,
    buffer: ConsoleBuffer,
    input: CommandInput,
    transferring: bool,
    store: Arc<dyn KeyValueStore>,
}

impl ConsoleSink {
    pub fn new(
        server_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        scrollback: usize,
        viewport_rows: usize,
    ) -> Self {
        let server_id = server_id.into();
        let history: Vec<String> =
            load_json(store.as_ref(), &command_history_key(&server_id)).unwrap_or_default();
        Self {
            server_id,
            buffer: ConsoleBuffer::new(scrollback, viewport_rows),
            input: CommandInput::with_history(history),
            transferring: false,
            store,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn buffer(&self) -> &ConsoleBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ConsoleBuffer {
        &mut self.buffer
    }

    pub fn input(&self) -> &CommandInput {
        &self.input
    }

    pub fn is_transferring(&self) -> bool {
        self.transferring
    }

    pub fn set_transferring(&mut self, transferring: bool) {
        self.transferring = transferring;
    }

    pub fn append_line(&mut self, text: &str, is_prelude: bool) {
        self.buffer.append_line(text, is_prelude);
    }

    /// Record a command and build the request that carries it to the daemon.
    pub fn submit_command(&mut self, text: &str) -> Option<OutboundEvent> {
        let command = self.input.submit(text)?;
        let key = command_history_key(&self.server_id);
        if let Err(e) = save_json(self.store.as_ref(), &key, &self.input.history()) {
            log::warn!("Failed to persist command history for {}: {}", self.server_id, e);
        }
        Some(OutboundEvent::SendCommand { command })
    }

    pub fn history_previous(&mut self) -> &str {
        self.input.previous()
    }

    pub fn history_next(&mut self) -> &str {
        self.input.next()
    }

    pub fn on_event(&mut self, event: &SocketEvent) {
        match event {
            SocketEvent::Open => {
                if !self.transferring {
                    self.buffer.clear();
                }
            }
            SocketEvent::Server(server_event) => self.on_server_event(server_event),
            _ => {}
        }
    }

    fn on_server_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ConsoleOutput(line) => {
                let line = format!("{}{}", strip_trailing_newline(line), ANSI_RESET);
                self.buffer.append_line(&line, false);
            }
            ServerEvent::InstallOutput(line) => self.buffer.append_line(line, false),
            ServerEvent::TransferLogs(line) => self.buffer.append_line(line, true),
            ServerEvent::DaemonMessage(line) => {
                let line = format!("{}{}", strip_trailing_newline(line), ANSI_RESET);
                self.buffer.append_line(&line, true);
            }
            ServerEvent::DaemonError(line) | ServerEvent::JwtError(line) => {
                let line = format!(
                    "{}{}{}",
                    ANSI_ERROR,
                    strip_trailing_newline(line),
                    ANSI_RESET
                );
                self.buffer.append_line(&line, true);
            }
            ServerEvent::Status(state) => {
                let line = format!("Server marked as {}...{}", state, ANSI_RESET);
                self.buffer.append_line(&line, true);
            }
            ServerEvent::InstallStarted => {
                self.buffer
                    .append_line("Installation process has started.", true);
            }
            ServerEvent::InstallCompleted => {
                self.buffer
                    .append_line("Installation process has completed.", true);
            }
            ServerEvent::TransferStatus(status) => self.on_transfer_status(status),
            _ => {}
        }
    }

    fn on_transfer_status(&mut self, status: &str) {
        let line = match status {
            "starting" => {
                self.transferring = true;
                "Transfer has started.".to_string()
            }
            "success" | "completed" => {
                self.transferring = false;
                "Transfer has completed.".to_string()
            }
            "failure" => {
                self.transferring = false;
                "Transfer has failed.".to_string()
            }
            other => format!("Transfer status: {}", other),
        };
        self.buffer
            .append_line(&format!("{}{}", line, ANSI_RESET), true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;

    fn sink() -> ConsoleSink {
        ConsoleSink::new("srv", Arc::new(MemoryStore::new()), 100, 3)
    }

    #[test]
    fn strips_exactly_one_newline_variant() {
        assert_eq!(strip_trailing_newline("a\r\n"), "a");
        assert_eq!(strip_trailing_newline("a\n"), "a");
        assert_eq!(strip_trailing_newline("a\r"), "a");
        assert_eq!(strip_trailing_newline("a\n\n"), "a\n");
        assert_eq!(strip_trailing_newline("a"), "a");
    }

    #[test]
    fn prelude_lines_are_prefixed() {
        let mut buf = ConsoleBuffer::new(10, 5);
        buf.append_line("hello\n", true);
        buf.append_line("\u{1b}[31mraw\u{1b}[0m", false);
        let lines: Vec<&str> = buf.lines().collect();
        assert_eq!(lines[0], format!("{}hello", TERMINAL_PRELUDE));
        assert_eq!(lines[1], "\u{1b}[31mraw\u{1b}[0m");
    }

    #[test]
    fn append_follows_bottom_when_not_scrolled() {
        let mut buf = ConsoleBuffer::new(100, 3);
        for i in 0..10 {
            buf.append_line(&i.to_string(), false);
            assert!(!buf.is_scrolled_up());
        }
        let visible: Vec<&str> = buf.visible_lines().collect();
        assert_eq!(visible, vec!["7", "8", "9"]);
    }

    #[test]
    fn append_preserves_position_when_scrolled_up() {
        let mut buf = ConsoleBuffer::new(100, 3);
        for i in 0..10 {
            buf.append_line(&i.to_string(), false);
        }
        buf.scroll_up(4);
        assert!(buf.is_scrolled_up());
        let top = buf.viewport_top();
        buf.append_line("10", false);
        assert_eq!(buf.viewport_top(), top);
        assert!(buf.is_scrolled_up());

        buf.scroll_to_bottom();
        assert!(!buf.is_scrolled_up());
        let visible: Vec<&str> = buf.visible_lines().collect();
        assert_eq!(visible, vec!["8", "9", "10"]);
    }

    #[test]
    fn scroll_down_clamps_at_bottom() {
        let mut buf = ConsoleBuffer::new(100, 3);
        for i in 0..5 {
            buf.append_line(&i.to_string(), false);
        }
        buf.scroll_up(100);
        assert_eq!(buf.viewport_top(), 0);
        buf.scroll_down(100);
        assert_eq!(buf.viewport_top(), 2);
        assert!(!buf.is_scrolled_up());
    }

    #[test]
    fn scrollback_evicts_oldest_and_keeps_scrolled_line() {
        let mut buf = ConsoleBuffer::new(5, 2);
        for i in 0..5 {
            buf.append_line(&i.to_string(), false);
        }
        buf.scroll_up(2);
        assert_eq!(buf.viewport_top(), 1);
        buf.append_line("5", false);
        assert_eq!(buf.len(), 5);
        // Line "1" is still the top visible line after "0" was evicted.
        assert_eq!(buf.visible_lines().next(), Some("1"));
        assert_eq!(buf.appended_total(), 6);
    }

    #[test]
    fn tail_returns_last_lines() {
        let mut buf = ConsoleBuffer::new(10, 2);
        for i in 0..4 {
            buf.append_line(&i.to_string(), false);
        }
        assert_eq!(buf.tail(2).collect::<Vec<_>>(), vec!["2", "3"]);
        assert_eq!(buf.tail(10).count(), 4);
    }

    #[test]
    fn blank_commands_are_ignored() {
        let mut input = CommandInput::default();
        assert_eq!(input.submit(""), None);
        assert_eq!(input.submit("   \t"), None);
        assert!(input.history().is_empty());
    }

    #[test]
    fn history_keeps_newest_32_without_dedup() {
        let mut input = CommandInput::default();
        for i in 0..40 {
            input.submit(&format!("cmd {}", i));
        }
        assert_eq!(input.history().len(), HISTORY_LIMIT);
        assert_eq!(input.history()[0], "cmd 39");
        assert_eq!(input.history()[31], "cmd 8");

        input.submit("again");
        input.submit("again");
        assert_eq!(&input.history()[..2], &["again", "again"]);
    }

    #[test]
    fn recall_clamps_at_both_ends() {
        let mut input = CommandInput::default();
        for cmd in ["first", "second", "third"] {
            input.submit(cmd);
        }
        assert_eq!(input.previous(), "third");
        assert_eq!(input.previous(), "second");
        assert_eq!(input.previous(), "first");
        assert_eq!(input.previous(), "first");
        assert_eq!(input.history_index(), Some(2));

        assert_eq!(input.next(), "second");
        assert_eq!(input.next(), "third");
        assert_eq!(input.history_index(), Some(0));
        assert_eq!(input.next(), "");
        assert_eq!(input.history_index(), None);
        assert_eq!(input.next(), "");
        assert_eq!(input.history().len(), 3);
    }

    #[test]
    fn submit_resets_browse_index() {
        let mut input = CommandInput::default();
        input.submit("a");
        input.submit("b");
        input.previous();
        input.previous();
        input.submit("c");
        assert_eq!(input.history_index(), None);
        assert_eq!(input.text(), "");
        assert_eq!(input.previous(), "c");
    }

    #[test]
    fn sink_submits_and_persists_history() {
        let store = Arc::new(MemoryStore::new());
        let mut sink = ConsoleSink::new("srv-1", store.clone(), 100, 10);
        let event = sink.submit_command("say hello");
        assert_eq!(
            event,
            Some(OutboundEvent::SendCommand {
                command: "say hello".to_string()
            })
        );
        assert_eq!(sink.submit_command("  "), None);

        let reloaded = ConsoleSink::new("srv-1", store, 100, 10);
        assert_eq!(reloaded.input().history(), &["say hello".to_string()]);
    }

    #[test]
    fn reconnect_clears_unless_transferring() {
        let mut sink = sink();
        sink.append_line("old", false);
        sink.on_event(&SocketEvent::Open);
        assert!(sink.buffer().is_empty());

        sink.append_line("kept", false);
        sink.on_event(&SocketEvent::Server(ServerEvent::TransferStatus(
            "starting".to_string(),
        )));
        assert!(sink.is_transferring());
        sink.on_event(&SocketEvent::Open);
        assert_eq!(sink.buffer().lines().next(), Some("kept"));
        sink.on_event(&SocketEvent::Server(ServerEvent::TransferStatus(
            "failure".to_string(),
        )));
        assert!(!sink.is_transferring());
        assert!(sink.buffer().tail(1).next().unwrap().contains("Transfer has failed."));
    }

    #[test]
    fn daemon_events_render_with_prelude() {
        let mut sink = sink();
        sink.on_event(&SocketEvent::Server(ServerEvent::Status("running".to_string())));
        sink.on_event(&SocketEvent::Server(ServerEvent::DaemonError("disk full\n".to_string())));
        sink.on_event(&SocketEvent::Server(ServerEvent::ConsoleOutput("Done (3.2s)!\r\n".to_string())));
        let lines: Vec<&str> = sink.buffer().lines().collect();
        assert_eq!(
            lines[0],
            format!("{}Server marked as running...{}", TERMINAL_PRELUDE, ANSI_RESET)
        );
        assert_eq!(
            lines[1],
            format!("{}{}disk full{}", TERMINAL_PRELUDE, ANSI_ERROR, ANSI_RESET)
        );
        assert_eq!(lines[2], format!("Done (3.2s)!{}", ANSI_RESET));
    }
}
