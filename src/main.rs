//! vtbuf - run a shell inside the vtbuf terminal core
//!
//! A small host for the library: one terminal, flushed into an in-memory
//! line buffer and drawn onto the console with crossterm.
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+T | Toggle term mode |
//! | PageUp/PageDown, Up/Down | Scroll back (view mode) |
//! | Esc, q | Back to term mode (view mode) |

use std::env;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vtbuf::config::{config_dir, Config};
use vtbuf::core::display::{MemoryBuffer, Viewport};
use vtbuf::core::session::{RedrawHook, Term, TermManager};
use vtbuf::ui::{KeyMapper, Renderer, StatusInfo};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct Args {
    shell: Option<String>,
    debug: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run(Args),
    Help,
    Version,
}

fn print_help() {
    eprintln!("vtbuf {} - terminal emulator core demo", VERSION);
    eprintln!();
    eprintln!("Usage: vtbuf [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <CMD>     Shell to run (default: config, then $SHELL)");
    eprintln!("      --debug           Log at debug level");
    eprintln!("  -V, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Ctrl+T                Toggle term mode");
    eprintln!("  PageUp/PageDown       Scroll back (view mode)");
    eprintln!("  Esc, q                Leave view mode");
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-V" | "--version" => return Ok(Command::Version),
            "--debug" => parsed.debug = true,
            "-s" | "--shell" => {
                let shell = args.next().ok_or("--shell requires a command")?;
                parsed.shell = Some(shell);
            }
            other => return Err(format!("Unknown option: {}", other)),
        }
    }
    Ok(Command::Run(parsed))
}

/// Log to `~/.vtbuf/vtbuf.log`; `RUST_LOG` overrides the level
fn init_logging(debug: bool) {
    let log_path = config_dir()
        .map(|dir| dir.join("vtbuf.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("vtbuf.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let level = if debug { "debug" } else { "info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args(env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            eprintln!("vtbuf {}", VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let mut config = Config::load();
    if args.shell.is_some() {
        config.shell = args.shell;
    }
    init_logging(args.debug || config.debug_log);
    info!("vtbuf {} starting", VERSION);

    run(config)
}

/// Cursor position reported by `Term::update`
#[derive(Default)]
struct HostCursor(Option<(usize, usize)>);

impl Viewport for HostCursor {
    fn place_cursor(&mut self, row: usize, col: usize) {
        self.0 = Some((row, col));
    }
}

/// Host-side view state
struct View {
    buffer: MemoryBuffer,
    cursor: HostCursor,
    /// Lines scrolled back while out of term mode
    offset: usize,
    quit: bool,
}

fn run(config: Config) -> anyhow::Result<()> {
    let redraw = Arc::new(AtomicBool::new(true));
    let hook: RedrawHook = {
        let redraw = redraw.clone();
        Arc::new(move || redraw.store(true, Ordering::SeqCst))
    };

    let (cols, rows) = Renderer::size()?;
    let rows = rows.saturating_sub(1).max(1);
    let mut renderer = Renderer::new(config.palette());
    let mut manager = TermManager::new(config, hook);
    manager.set_default_size(cols, rows);
    let id = manager.new_term()?.id();

    renderer.init()?;
    let result = main_loop(&mut manager, id, &mut renderer, &redraw);
    renderer.cleanup()?;

    for closed in manager.remove_exited() {
        if closed.exit.bad_shell {
            eprintln!("Failed to start shell '{}'", closed.shell);
        } else {
            info!("*term{} closed", closed.id);
        }
    }
    result
}

fn main_loop(
    manager: &mut TermManager,
    id: u32,
    renderer: &mut Renderer,
    redraw: &AtomicBool,
) -> anyhow::Result<()> {
    let mut view = View {
        buffer: MemoryBuffer::new(),
        cursor: HostCursor::default(),
        offset: 0,
        quit: false,
    };

    loop {
        manager.reap_children();
        let Some(term) = manager.get_mut(id) else {
            break;
        };
        if term.process_exited() && term.exit_status().is_some() {
            info!("{} exited", term.buffer_name());
            break;
        }

        if redraw.swap(false, Ordering::SeqCst) {
            term.update(&mut view.buffer, Some(&mut view.cursor));
            let passthrough = term.take_passthrough();
            if !passthrough.is_empty() {
                let mut stdout = io::stdout();
                stdout.write_all(&passthrough)?;
                stdout.flush()?;
            }
            draw(renderer, term, &view)?;
        }

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let mut dirty = true;
        match event::read()? {
            Event::Key(key) => handle_key(term, &mut view, key)?,
            Event::Mouse(mouse) => match KeyMapper::from_mouse(&mouse) {
                Some(key) if term.is_term_mode() => term.keys(&[key])?,
                Some(key) => scroll_view(term, &mut view, key),
                None => dirty = false,
            },
            Event::Paste(text) if term.is_term_mode() => term.paste(&text)?,
            Event::Resize(cols, rows) => {
                term.resize(cols, rows.saturating_sub(1).max(1));
                renderer.invalidate();
            }
            _ => dirty = false,
        }
        if view.quit {
            break;
        }
        if dirty {
            redraw.store(true, Ordering::SeqCst);
        }
    }
    Ok(())
}

fn draw(renderer: &mut Renderer, term: &Term, view: &View) -> io::Result<()> {
    let status = StatusInfo {
        buffer_name: term.buffer_name(),
        title: term.title(),
        term_mode: term.is_term_mode(),
        offset: view.offset,
    };
    renderer.render(view.buffer.lines(), &term.state, view.cursor.0, &status)
}

fn handle_key(term: &mut Term, view: &mut View, key: KeyEvent) -> anyhow::Result<()> {
    if key.kind == KeyEventKind::Release {
        return Ok(());
    }
    if key.code == KeyCode::Char('t') && key.modifiers.contains(KeyModifiers::CONTROL) {
        term.toggle_term_mode();
        view.offset = 0;
        return Ok(());
    }

    let Some(mapped) = KeyMapper::from_crossterm(&key) else {
        return Ok(());
    };
    if term.is_term_mode() {
        if let Err(e) = term.keys(&[mapped]) {
            error!("{}: {}", term.buffer_name(), e);
            view.quit = true;
        }
        return Ok(());
    }

    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => {
            term.set_term_mode(true);
            view.offset = 0;
        }
        _ => scroll_view(term, view, mapped),
    }
    Ok(())
}

/// Move the view through the scrollback
fn scroll_view(term: &Term, view: &mut View, key: vtbuf::ui::Key) {
    use vtbuf::ui::Key;

    let page = term.state.height().max(2) - 1;
    let limit = term.state.screen().scrollback();
    view.offset = match key {
        Key::Up | Key::WheelUp => view.offset + 1,
        Key::PageUp => view.offset + page,
        Key::Down | Key::WheelDown => view.offset.saturating_sub(1),
        Key::PageDown => view.offset.saturating_sub(page),
        Key::Home => limit,
        Key::End => 0,
        _ => view.offset,
    }
    .min(limit);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(args(&[])), Ok(Command::Run(Args::default())));
        assert_eq!(
            parse_args(args(&["-s", "/bin/zsh", "--debug"])),
            Ok(Command::Run(Args {
                shell: Some("/bin/zsh".into()),
                debug: true,
            }))
        );
        assert_eq!(parse_args(args(&["--shell", "fish"])), Ok(Command::Run(Args {
            shell: Some("fish".into()),
            debug: false,
        })));
        assert_eq!(parse_args(args(&["-h"])), Ok(Command::Help));
        assert_eq!(parse_args(args(&["-V"])), Ok(Command::Version));
        assert!(parse_args(args(&["--shell"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
