//! Key mapping for terminal input
//!
//! Host key events are first reduced to a [`Key`], which is then encoded as
//! the byte sequence the child expects.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent, MouseEventKind};

/// A key as seen by the terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    /// Ctrl + character
    Ctrl(char),
    /// Alt (meta) + character
    Alt(char),
    Enter,
    Tab,
    BackTab,
    Backspace,
    Escape,
    Up,
    Down,
    Right,
    Left,
    Home,
    End,
    Insert,
    Delete,
    PageUp,
    PageDown,
    /// Function key 1..=12
    F(u8),
    Menu,
    WheelUp,
    WheelDown,
}

/// Key mapper for converting keys to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Bytes to send for `key`. `app_keys` selects application cursor keys.
    pub fn encode(key: Key, app_keys: bool) -> Vec<u8> {
        match key {
            Key::Char(ch) => ch.to_string().into_bytes(),
            Key::Ctrl(ch) => Self::ctrl_char(ch),
            Key::Alt(ch) => {
                let mut bytes = vec![0x1B];
                bytes.extend(ch.to_string().as_bytes());
                bytes
            }
            Key::Enter => vec![0x0D],
            Key::Tab => vec![0x09],
            Key::BackTab => b"\x1b[Z".to_vec(),
            Key::Backspace => vec![0x7F],
            Key::Escape => vec![0x1B],

            Key::Up | Key::WheelUp => Self::cursor_key(b'A', app_keys),
            Key::Down | Key::WheelDown => Self::cursor_key(b'B', app_keys),
            Key::Right => Self::cursor_key(b'C', app_keys),
            Key::Left => Self::cursor_key(b'D', app_keys),
            Key::Home => Self::cursor_key(b'H', app_keys),
            Key::End => Self::cursor_key(b'F', app_keys),

            Key::Insert => Self::tilde_key(2),
            Key::Delete => Self::tilde_key(3),
            Key::PageUp => Self::tilde_key(5),
            Key::PageDown => Self::tilde_key(6),
            Key::Menu => Self::tilde_key(29),
            Key::F(n) => Self::function_key(n),
        }
    }

    /// Control byte for Ctrl + `ch`
    fn ctrl_char(ch: char) -> Vec<u8> {
        match ch {
            'a'..='z' => vec![ch as u8 - b'a' + 1],
            'A'..='Z' => vec![ch as u8 - b'A' + 1],
            '@' | '`' | ' ' | '2' => vec![0x00],
            '[' | '3' => vec![0x1B],
            '\\' | '4' => vec![0x1C],
            ']' | '5' => vec![0x1D],
            '^' | '~' | '6' => vec![0x1E],
            '_' | '?' | '7' => vec![0x1F],
            other => other.to_string().into_bytes(),
        }
    }

    /// Arrow, Home and End: SS3 in application mode, CSI otherwise
    fn cursor_key(key: u8, app_keys: bool) -> Vec<u8> {
        if app_keys {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    fn tilde_key(code: u8) -> Vec<u8> {
        format!("\x1b[{}~", code).into_bytes()
    }

    fn function_key(n: u8) -> Vec<u8> {
        match n {
            1 => b"\x1bOP".to_vec(),
            2 => b"\x1bOQ".to_vec(),
            3 => b"\x1bOR".to_vec(),
            4 => b"\x1bOS".to_vec(),
            5 => Self::tilde_key(15),
            6 => Self::tilde_key(17),
            7 => Self::tilde_key(18),
            8 => Self::tilde_key(19),
            9 => Self::tilde_key(20),
            10 => Self::tilde_key(21),
            11 => Self::tilde_key(23),
            12 => Self::tilde_key(24),
            _ => vec![],
        }
    }

    /// Reduce a crossterm key event. Releases and unmapped keys give `None`.
    pub fn from_crossterm(event: &KeyEvent) -> Option<Key> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
        let alt = event.modifiers.contains(KeyModifiers::ALT);

        let key = match event.code {
            KeyCode::Char(ch) if ctrl && alt => {
                let bytes = Self::ctrl_char(ch);
                match bytes.as_slice() {
                    [b] if *b < 0x20 => Key::Alt(*b as char),
                    _ => Key::Alt(ch),
                }
            }
            KeyCode::Char(ch) if ctrl => Key::Ctrl(ch),
            KeyCode::Char(ch) if alt => Key::Alt(ch),
            KeyCode::Char(ch) => Key::Char(ch),
            KeyCode::Enter => Key::Enter,
            KeyCode::Tab if event.modifiers.contains(KeyModifiers::SHIFT) => Key::BackTab,
            KeyCode::Tab => Key::Tab,
            KeyCode::BackTab => Key::BackTab,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Esc => Key::Escape,
            KeyCode::Up => Key::Up,
            KeyCode::Down => Key::Down,
            KeyCode::Right => Key::Right,
            KeyCode::Left => Key::Left,
            KeyCode::Home => Key::Home,
            KeyCode::End => Key::End,
            KeyCode::Insert => Key::Insert,
            KeyCode::Delete => Key::Delete,
            KeyCode::PageUp => Key::PageUp,
            KeyCode::PageDown => Key::PageDown,
            KeyCode::F(n @ 1..=12) => Key::F(n),
            KeyCode::Menu => Key::Menu,
            _ => return None,
        };
        Some(key)
    }

    /// Only the wheel is translated; other mouse events are the host's
    pub fn from_mouse(event: &MouseEvent) -> Option<Key> {
        match event.kind {
            MouseEventKind::ScrollUp => Some(Key::WheelUp),
            MouseEventKind::ScrollDown => Some(Key::WheelDown),
            _ => None,
        }
    }
}
