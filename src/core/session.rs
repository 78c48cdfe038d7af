//! Terminal sessions
//!
//! A [`Term`] ties a shell on a pty to a [`TerminalState`]. A reader thread
//! moves pty output into a [`ByteQueue`]; the host calls [`Term::update`]
//! from its own loop to decode the queued bytes and flush the screen.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error, info, warn};

use super::display::{DisplayBuffer, Viewport};
use super::pty::{self, ChildExit, Pty, SpawnOptions};
use super::queue::ByteQueue;
use super::term::{Decoder, Response, TerminalState, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::config::Config;
use crate::ui::keymapper::{Key, KeyMapper};

/// Called from the reader thread when new output should be drawn
pub type RedrawHook = Arc<dyn Fn() + Send + Sync>;

const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";

/// Display buffer name for terminal `id`
pub fn buffer_name(id: u32) -> String {
    format!("*term{}", id)
}

/// One terminal: a shell, its pty, and the emulated screen
pub struct Term {
    id: u32,
    buffer_name: String,
    shell: String,
    pty: Pty,
    pub state: TerminalState,
    decoder: Decoder,
    queue: Arc<ByteQueue>,
    /// Set by the reader thread when the pty closes
    process_exited: Arc<AtomicBool>,
    exit: Option<ChildExit>,
    term_mode: bool,
    delay_update: bool,
    /// Replies bound for the host terminal
    passthrough: Vec<u8>,
    redraw: RedrawHook,
    stop: Option<File>,
    reader: Option<JoinHandle<()>>,
}

impl Term {
    /// Start a shell and its reader thread
    pub fn spawn(
        id: u32,
        config: &Config,
        cols: u16,
        rows: u16,
        redraw: RedrawHook,
    ) -> pty::Result<Self> {
        let shell = pty::resolve_shell(config.shell.as_deref());
        let pty = Pty::spawn(&SpawnOptions {
            shell: shell.clone(),
            term_var: config.term_var.clone(),
            show_welcome: config.show_welcome,
            cols: cols.max(1),
            rows: rows.max(1),
        })?;

        let (stop_rx, stop_tx) = nix::unistd::pipe()?;
        let queue = Arc::new(ByteQueue::new());
        let process_exited = Arc::new(AtomicBool::new(false));

        let reader = {
            let master = pty.reader()?;
            let queue = queue.clone();
            let exited = process_exited.clone();
            let redraw = redraw.clone();
            let chunk = config.read_chunk_size;
            let max_block = config.max_block_size;
            thread::Builder::new()
                .name(format!("term{}-reader", id))
                .spawn(move || read_loop(master, stop_rx, queue, exited, redraw, chunk, max_block))?
        };

        let state = TerminalState::new(cols.max(1) as usize, rows.max(1) as usize, config.scrollback)
            .with_tab_width(config.tab_width);

        let term = Self {
            id,
            buffer_name: buffer_name(id),
            shell,
            pty,
            state,
            decoder: Decoder::new(),
            queue,
            process_exited,
            exit: None,
            term_mode: config.auto_term_mode,
            delay_update: false,
            passthrough: Vec::new(),
            redraw,
            stop: Some(File::from(stop_tx)),
            reader: Some(reader),
        };
        info!("Opened {} ({})", term.buffer_name, term.shell);
        Ok(term)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn buffer_name(&self) -> &str {
        &self.buffer_name
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn title(&self) -> &str {
        &self.state.title
    }

    /// Decode pending output and flush the screen into `buffer`.
    ///
    /// `viewport` is given when this terminal's buffer is the one on
    /// display; the cursor is then placed on the screen cursor. Returns the
    /// number of lines rewritten.
    pub fn update(
        &mut self,
        buffer: &mut dyn DisplayBuffer,
        viewport: Option<&mut dyn Viewport>,
    ) -> usize {
        // The frame has not caught up with the last resize yet
        if self.delay_update {
            self.delay_update = false;
            return 0;
        }

        let bytes = self.queue.drain();
        if !bytes.is_empty() || self.decoder.has_pending() {
            let responses = self.decoder.feed(&bytes, &mut self.state);
            for response in responses {
                self.respond(response);
            }
        }
        let written = self.state.flush(buffer);
        self.queue.finish_drain();

        // Output that arrived while decoding would otherwise wait for the next event
        if !self.queue.is_empty() {
            (self.redraw)();
        }

        if let Some(view) = viewport {
            let screen = self.state.screen();
            view.place_cursor(screen.scrollback() + screen.height(), 1);
            view.place_cursor(self.state.absolute_row(), self.state.col());
        }
        written
    }

    fn respond(&mut self, response: Response) {
        let bytes = response.to_bytes();
        if response.is_for_host() {
            self.passthrough.extend_from_slice(&bytes);
        } else if let Err(e) = self.pty.write_all(&bytes) {
            warn!("{}: failed to send {:?}: {}", self.buffer_name, response, e);
        }
    }

    /// Bytes to forward to the host terminal, e.g. clipboard requests
    pub fn take_passthrough(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.passthrough)
    }

    /// Resize the pty and both screens. No-op if the size is unchanged.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let (cols, rows) = (cols.max(1), rows.max(1));
        if self.state.width() == cols as usize && self.state.height() == rows as usize {
            return;
        }
        if let Err(e) = self.pty.resize(cols, rows) {
            error!("{}: {}", self.buffer_name, e);
        }
        self.state.resize(cols as usize, rows as usize);
        debug!("{} resized to {}x{}", self.buffer_name, cols, rows);
        self.delay_update = true;
    }

    pub fn write(&self, bytes: &[u8]) -> pty::Result<()> {
        self.pty.write_all(bytes)
    }

    /// Send keys to the shell. Ignored outside term mode.
    pub fn keys(&self, keys: &[Key]) -> pty::Result<()> {
        if !self.term_mode {
            debug!("{}: dropping {} keys outside term mode", self.buffer_name, keys.len());
            return Ok(());
        }
        let app_keys = self.state.modes.app_keys;
        let bytes: Vec<u8> = keys
            .iter()
            .flat_map(|&key| KeyMapper::encode(key, app_keys))
            .collect();
        self.write(&bytes)
    }

    /// Type `text` as keys; newlines become Enter and tabs Tab
    pub fn feed_text(&self, text: &str) -> pty::Result<()> {
        let keys: Vec<Key> = text
            .chars()
            .map(|ch| match ch {
                '\n' => Key::Enter,
                '\t' => Key::Tab,
                ch => Key::Char(ch),
            })
            .collect();
        self.keys(&keys)
    }

    /// Bracketed paste
    pub fn paste(&self, text: &str) -> pty::Result<()> {
        let mut bytes = Vec::with_capacity(text.len() + PASTE_START.len() + PASTE_END.len());
        bytes.extend_from_slice(PASTE_START);
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(PASTE_END);
        self.write(&bytes)
    }

    pub fn is_term_mode(&self) -> bool {
        self.term_mode
    }

    pub fn set_term_mode(&mut self, on: bool) {
        if self.term_mode != on {
            debug!("{}: term mode {}", self.buffer_name, if on { "on" } else { "off" });
        }
        self.term_mode = on;
    }

    pub fn toggle_term_mode(&mut self) {
        self.set_term_mode(!self.term_mode);
    }

    /// Reap the child if it has exited
    pub fn check_child(&mut self) {
        if self.exit.is_some() {
            return;
        }
        match self.pty.try_wait() {
            Ok(Some(exit)) => {
                info!("{}: shell exited with {:?}", self.buffer_name, exit.code);
                self.exit = Some(exit);
                self.process_exited.store(true, Ordering::SeqCst);
            }
            Ok(None) => {}
            Err(e) => warn!("{}: waitpid failed: {}", self.buffer_name, e),
        }
    }

    pub fn process_exited(&self) -> bool {
        self.process_exited.load(Ordering::SeqCst)
    }

    pub fn bad_shell(&self) -> bool {
        self.exit.is_some_and(|e| e.bad_shell)
    }

    pub fn exit_status(&self) -> Option<ChildExit> {
        self.exit
    }

    fn stop_reader(&mut self) {
        if let Some(mut stop) = self.stop.take() {
            if let Err(e) = stop.write_all(&[0]) {
                debug!("{}: stop pipe write failed: {}", self.buffer_name, e);
            }
        }
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                error!("{}: reader thread panicked", self.buffer_name);
            }
        }
    }
}

impl Drop for Term {
    fn drop(&mut self) {
        self.stop_reader();
        if self.exit.is_none() {
            self.pty.hangup();
            self.check_child();
        }
        debug!("Closed {}", self.buffer_name);
    }
}

/// Reader thread body: wait for output or the stop signal, queue what
/// arrives and request redraws.
fn read_loop(
    mut master: File,
    stop: OwnedFd,
    queue: Arc<ByteQueue>,
    exited: Arc<AtomicBool>,
    redraw: RedrawHook,
    chunk: usize,
    max_block: usize,
) {
    loop {
        let (readable, stopped) = {
            let mut fds = [
                PollFd::new(master.as_fd(), PollFlags::POLLIN),
                PollFd::new(stop.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("poll on pty failed: {}", e);
                    exited.store(true, Ordering::SeqCst);
                    break;
                }
            }
            let events = |fd: &PollFd| fd.revents().unwrap_or(PollFlags::empty());
            (events(&fds[0]), events(&fds[1]))
        };

        if !stopped.is_empty() {
            debug!("reader stopping");
            break;
        }
        if readable.is_empty() {
            continue;
        }

        match queue.fill_from(&mut master, chunk, max_block) {
            Ok(outcome) => {
                if outcome.force_update && !queue.is_draining() {
                    redraw();
                }
                if outcome.eof {
                    debug!("pty closed");
                    exited.store(true, Ordering::SeqCst);
                    redraw();
                    break;
                }
            }
            Err(e) => {
                warn!("pty read failed: {}", e);
                exited.store(true, Ordering::SeqCst);
                redraw();
                break;
            }
        }
    }
}

/// Owns every open terminal
pub struct TermManager {
    terms: Vec<Term>,
    counter: u32,
    config: Config,
    redraw: RedrawHook,
    size: (u16, u16),
}

impl TermManager {
    pub fn new(config: Config, redraw: RedrawHook) -> Self {
        Self {
            terms: Vec::new(),
            counter: 0,
            config,
            redraw,
            size: (DEFAULT_WIDTH as u16, DEFAULT_HEIGHT as u16),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Size given to terminals opened from now on
    pub fn set_default_size(&mut self, cols: u16, rows: u16) {
        self.size = (cols, rows);
    }

    /// Open a terminal with the next free number
    pub fn new_term(&mut self) -> pty::Result<&mut Term> {
        loop {
            self.counter += 1;
            if self.position(self.counter).is_none() {
                break;
            }
        }
        self.new_term_numbered(self.counter)
    }

    /// Open terminal `n`, or return it if it is already open
    pub fn new_term_numbered(&mut self, n: u32) -> pty::Result<&mut Term> {
        let idx = match self.position(n) {
            Some(idx) => idx,
            None => {
                let (cols, rows) = self.size;
                let term = Term::spawn(n, &self.config, cols, rows, self.redraw.clone())?;
                self.terms.push(term);
                self.counter = self.counter.max(n);
                self.terms.len() - 1
            }
        };
        Ok(&mut self.terms[idx])
    }

    fn position(&self, id: u32) -> Option<usize> {
        self.terms.iter().position(|t| t.id == id)
    }

    pub fn get(&self, id: u32) -> Option<&Term> {
        self.terms.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Term> {
        self.terms.iter_mut().find(|t| t.id == id)
    }

    pub fn get_by_buffer(&mut self, name: &str) -> Option<&mut Term> {
        self.terms.iter_mut().find(|t| t.buffer_name == name)
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Reap any exited children
    pub fn reap_children(&mut self) {
        for term in &mut self.terms {
            term.check_child();
        }
    }

    /// Close terminals whose shell has exited and been reaped
    pub fn remove_exited(&mut self) -> Vec<ClosedTerm> {
        self.reap_children();

        let mut removed = Vec::new();
        self.terms.retain(|term| {
            let Some(exit) = term.exit else {
                return true;
            };
            if exit.bad_shell {
                error!("Failed to start shell '{}'", term.shell);
            }
            removed.push(ClosedTerm {
                id: term.id,
                shell: term.shell.clone(),
                exit,
            });
            false
        });
        removed
    }
}

/// A terminal closed by [`TermManager::remove_exited`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTerm {
    pub id: u32,
    pub shell: String,
    pub exit: ChildExit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::display::MemoryBuffer;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn test_config(shell: &str) -> Config {
        Config {
            shell: Some(shell.to_string()),
            show_welcome: false,
            scrollback: 100,
            ..Config::default()
        }
    }

    fn counting_hook() -> (RedrawHook, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        (
            Arc::new(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    /// Update until `done` holds or a timeout passes
    fn pump(term: &mut Term, buffer: &mut MemoryBuffer, done: impl Fn(&Term) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            term.update(buffer, None);
            if done(term) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_buffer_name() {
        assert_eq!(buffer_name(3), "*term3");
    }

    #[test]
    fn test_shell_output_reaches_screen() {
        let (hook, redraws) = counting_hook();
        let mut term = Term::spawn(1, &test_config("/bin/sh"), 40, 10, hook).unwrap();
        assert_eq!(term.buffer_name(), "*term1");
        assert_eq!((term.state.width(), term.state.height()), (40, 10));

        let mut buffer = MemoryBuffer::new();
        term.feed_text("printf 'ab\\033[1;31mcd\\n'\n").unwrap();
        let seen = pump(&mut term, &mut buffer, |t| {
            (1..=t.state.height()).any(|r| t.state.screen().row_text(r) == "abcd")
        });
        assert!(seen);
        assert!(redraws.load(Ordering::SeqCst) > 0);
        assert_eq!(buffer.line_count(), 110);
        assert!(buffer.lines().iter().any(|l| l == "abcd"));
    }

    #[test]
    fn test_cursor_report_round_trip() {
        let (hook, _) = counting_hook();
        let mut term = Term::spawn(2, &test_config("/bin/sh"), 80, 24, hook).unwrap();
        let mut buffer = MemoryBuffer::new();

        // The reply arrives on the shell's stdin; dump its first bytes in hex
        term.write(b"stty raw -echo; printf '\\033[6n'; dd bs=1 count=4 2>/dev/null | od -An -tx1; stty sane\n")
            .unwrap();
        let seen = pump(&mut term, &mut buffer, |t| {
            (1..=t.state.height()).any(|r| t.state.screen().row_text(r).contains("1b 5b"))
        });
        assert!(seen);
    }

    #[test]
    fn test_exit_is_detected() {
        let (hook, _) = counting_hook();
        let mut term = Term::spawn(3, &test_config("/bin/sh"), 80, 24, hook).unwrap();
        term.write(b"exit 0\n").unwrap();
        let mut buffer = MemoryBuffer::new();
        assert!(pump(&mut term, &mut buffer, |t| t.process_exited()));
        let deadline = Instant::now() + Duration::from_secs(5);
        while term.exit_status().is_none() && Instant::now() < deadline {
            term.check_child();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(term.exit_status().and_then(|e| e.code), Some(0));
        assert!(!term.bad_shell());
    }

    #[test]
    fn test_manager_removes_bad_shell() {
        let (hook, _) = counting_hook();
        let mut manager = TermManager::new(test_config("/no/such/shell"), hook);
        let id = manager.new_term().unwrap().id();
        assert_eq!(id, 1);
        assert!(manager.get_by_buffer("*term1").is_some());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut removed = Vec::new();
        while removed.is_empty() && Instant::now() < deadline {
            removed = manager.remove_exited();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, 1);
        assert_eq!(removed[0].shell, "/no/such/shell");
        assert!(removed[0].exit.bad_shell);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_manager_keeps_running_terms() {
        let (hook, _) = counting_hook();
        let mut manager = TermManager::new(test_config("/bin/sh"), hook);
        manager.new_term().unwrap();
        assert!(manager.remove_exited().is_empty());
        assert_eq!(manager.terms().len(), 1);
    }

    #[test]
    fn test_manager_numbering() {
        let (hook, _) = counting_hook();
        let mut manager = TermManager::new(test_config("/bin/sh"), hook);
        assert_eq!(manager.new_term_numbered(5).unwrap().id(), 5);
        assert_eq!(manager.new_term_numbered(5).unwrap().id(), 5);
        assert_eq!(manager.terms().len(), 1);
        assert_eq!(manager.new_term().unwrap().id(), 6);
        assert_eq!(manager.get(6).map(Term::buffer_name), Some("*term6"));
    }

    #[test]
    fn test_term_mode_gates_keys() {
        let (hook, _) = counting_hook();
        let mut term = Term::spawn(4, &test_config("/bin/sh"), 80, 24, hook).unwrap();
        let mut buffer = MemoryBuffer::new();
        assert!(term.is_term_mode());

        term.toggle_term_mode();
        assert!(!term.is_term_mode());
        term.feed_text("echo dropped\n").unwrap();

        term.set_term_mode(true);
        assert!(term.is_term_mode());
        term.feed_text("echo kept\n").unwrap();

        let has_row = |t: &Term, text: &str| {
            (1..=t.state.height()).any(|r| t.state.screen().row_text(r).contains(text))
        };
        assert!(pump(&mut term, &mut buffer, |t| {
            (1..=t.state.height()).any(|r| t.state.screen().row_text(r) == "kept")
        }));
        // The shell answers in order, so dropped input would already show
        assert!(!has_row(&term, "dropped"));
        assert!(!buffer.lines().iter().any(|l| l.contains("dropped")));
    }

    #[test]
    fn test_resize_skips_one_update() {
        let (hook, _) = counting_hook();
        let mut term = Term::spawn(5, &test_config("/bin/sh"), 80, 24, hook).unwrap();
        let mut buffer = MemoryBuffer::new();

        // Same size: nothing changes and the next update runs
        term.resize(80, 24);
        assert_eq!((term.state.width(), term.state.height()), (80, 24));
        assert!(term.update(&mut buffer, None) > 0);
        assert_eq!(buffer.line_count(), 124);

        term.resize(100, 30);
        assert_eq!((term.state.width(), term.state.height()), (100, 30));
        // One update is skipped, the next one catches up
        assert_eq!(term.update(&mut buffer, None), 0);
        assert_eq!(buffer.line_count(), 124);
        assert!(term.update(&mut buffer, None) > 0);
        assert_eq!(buffer.line_count(), 130);

        // The shell sees the new size
        term.feed_text("stty size\n").unwrap();
        assert!(pump(&mut term, &mut buffer, |t| {
            (1..=t.state.height()).any(|r| t.state.screen().row_text(r) == "30 100")
        }));
    }
}
