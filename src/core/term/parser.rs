//! Restartable VT stream decoder
//!
//! Splits raw pty output into printable characters, control bytes and
//! escape sequences, and applies them to a [`TerminalState`]. Input may end
//! anywhere: an unfinished escape sequence or UTF-8 character is kept and
//! joined with the next chunk.

use tracing::{debug, trace, warn};

use super::sequence::{Csi, Dcs, Osc};
use super::state::TerminalState;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Longest unterminated sequence kept across calls
pub const MAX_PENDING_SEQUENCE: usize = 64 * 1024;

/// Reply produced while decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `CSI 5 n`: ESC [ 0 n
    StatusOk,
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(usize, usize),
    /// Primary device attributes
    DeviceAttributes,
    /// Secondary device attributes
    SecondaryDeviceAttributes,
    /// OSC 4/10/11 color query
    ColorQuery(i64),
    /// OSC 52, forwarded to the host terminal rather than the child
    Clipboard(String),
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::StatusOk => b"\x1b[0n".to_vec(),
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            // VT102
            Response::DeviceAttributes => b"\x1b[?6c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>0;0;0c".to_vec(),
            Response::ColorQuery(code) => {
                format!("\x1b]{};rgb:ffff/ffff/ffff\x07", code).into_bytes()
            }
            Response::Clipboard(arg) => format!("\x1b]52;{}\x07", arg).into_bytes(),
        }
    }

    /// Whether the reply goes to the host terminal instead of the child
    pub fn is_for_host(&self) -> bool {
        matches!(self, Response::Clipboard(_))
    }
}

/// Expected length of a UTF-8 sequence from its lead byte
fn utf8_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7f => Some(1),
        0xc2..=0xdf => Some(2),
        0xe0..=0xef => Some(3),
        0xf0..=0xf4 => Some(4),
        _ => None,
    }
}

/// Outcome of looking at one escape sequence
enum Step {
    /// Bytes consumed
    Advance(usize),
    /// Sequence runs past the end of input
    Incomplete,
}

/// An oversized sequence whose remaining bytes are being dropped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Discard {
    Csi,
    /// Ends at BEL or ESC \
    Osc,
    /// Ends at ESC \; any other ESC aborts it
    Dcs,
}

#[derive(Debug, Default)]
pub struct Decoder {
    partial_seq: Vec<u8>,
    partial_char: Vec<u8>,
    discarding: Option<Discard>,
    dec_test: bool,
    charset_select: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether bytes from a previous call are waiting for more input
    pub fn has_pending(&self) -> bool {
        !self.partial_seq.is_empty() || !self.partial_char.is_empty() || self.discarding.is_some()
    }

    /// Decode `input`, applying it to `state`. Returns the replies produced.
    pub fn feed(&mut self, input: &[u8], state: &mut TerminalState) -> Vec<Response> {
        let mut responses = Vec::new();

        let owned;
        let buf: &[u8] = if self.partial_seq.is_empty() && self.partial_char.is_empty() {
            input
        } else {
            let mut joined = std::mem::take(&mut self.partial_seq);
            joined.append(&mut self.partial_char);
            joined.extend_from_slice(input);
            owned = joined;
            &owned
        };

        let mut i = 0;
        while i < buf.len() {
            if let Some(kind) = self.discarding {
                let (n, done) = discard_len(kind, &buf[i..]);
                i += n;
                if done {
                    self.discarding = None;
                    continue;
                }
                // Only an ESC waiting for its next byte is left
                self.partial_seq = buf[i..].to_vec();
                break;
            }

            let b = buf[i];

            if self.charset_select {
                // Designated character set is not tracked
                self.charset_select = false;
                i += 1;
                continue;
            }
            if self.dec_test {
                self.dec_test = false;
                if b == b'8' {
                    state.alignment_test();
                }
                i += 1;
                continue;
            }

            if b == ESC {
                match self.escape(&buf[i..], state, &mut responses) {
                    Step::Advance(n) => i += n,
                    Step::Incomplete => {
                        self.stash_sequence(&buf[i..]);
                        break;
                    }
                }
                continue;
            }

            if b < 0x20 || b == 0x7f {
                self.control(b, state);
                i += 1;
                continue;
            }

            match utf8_len(b) {
                Some(len) if i + len > buf.len() => {
                    if !is_utf8_prefix(&buf[i..]) {
                        state.put_char(char::REPLACEMENT_CHARACTER);
                        i += 1;
                        continue;
                    }
                    self.partial_char = buf[i..].to_vec();
                    break;
                }
                Some(len) => match std::str::from_utf8(&buf[i..i + len]) {
                    Ok(s) => {
                        for ch in s.chars() {
                            state.put_char(ch);
                        }
                        i += len;
                    }
                    Err(_) => {
                        state.put_char(char::REPLACEMENT_CHARACTER);
                        i += 1;
                    }
                },
                None => {
                    state.put_char(char::REPLACEMENT_CHARACTER);
                    i += 1;
                }
            }
        }

        responses
    }

    fn stash_sequence(&mut self, rest: &[u8]) {
        if rest.len() <= MAX_PENDING_SEQUENCE {
            self.partial_seq = rest.to_vec();
            return;
        }
        let kind = match rest.get(1) {
            Some(b'[') => Discard::Csi,
            Some(b']') => Discard::Osc,
            _ => Discard::Dcs,
        };
        warn!("Discarding oversized {:?} sequence ({} bytes so far)", kind, rest.len());
        self.discarding = Some(kind);
        // A trailing ESC may be the start of the terminator
        if kind != Discard::Csi && rest.last() == Some(&ESC) {
            self.partial_seq = vec![ESC];
        }
    }

    fn control(&mut self, b: u8, state: &mut TerminalState) {
        match b {
            b'\r' => state.carriage_return(),
            0x08 => state.backspace(),
            b'\n' | 0x0b | 0x0c => state.linefeed(),
            b'\t' => state.tab(),
            // NUL, BEL, shift out/in
            0x00 | 0x07 | 0x0e | 0x0f => {}
            other => trace!("Ignoring control byte {:#04x}", other),
        }
    }

    /// Handle the escape sequence at the start of `seq`
    fn escape(
        &mut self,
        seq: &[u8],
        state: &mut TerminalState,
        responses: &mut Vec<Response>,
    ) -> Step {
        let Some(&kind) = seq.get(1) else {
            return Step::Incomplete;
        };
        let body = &seq[2..];

        match kind {
            b'[' => {
                let csi = Csi::parse(body);
                if !csi.complete {
                    return self.unfinished("CSI", csi.len, body);
                }
                trace!("CSI {:?} {:?} {}", csi.mode, csi.args, csi.command as char);
                responses.extend(state.execute_csi(&csi));
                Step::Advance(2 + csi.len)
            }
            b']' => {
                let osc = Osc::parse(body);
                if !osc.complete {
                    return self.unfinished("OSC", osc.len, body);
                }
                responses.extend(state.execute_osc(&osc));
                Step::Advance(2 + osc.len)
            }
            b'P' | b'k' => {
                let dcs = Dcs::parse(body);
                if !dcs.complete {
                    return self.unfinished("DCS", dcs.len, body);
                }
                debug!("Ignoring DCS payload of {} bytes", dcs.payload.len());
                Step::Advance(2 + dcs.len)
            }
            // String terminator, keypad modes, bell
            b'\\' | b'=' | b'>' | b'g' => Step::Advance(2),
            b'#' => {
                self.dec_test = true;
                Step::Advance(2)
            }
            b'(' => {
                self.charset_select = true;
                Step::Advance(2)
            }
            b'7' => {
                state.save_cursor();
                Step::Advance(2)
            }
            b'8' => {
                state.restore_cursor();
                Step::Advance(2)
            }
            b'D' => {
                state.linefeed();
                Step::Advance(2)
            }
            b'E' => {
                state.newline();
                Step::Advance(2)
            }
            b'M' => {
                state.reverse_linefeed();
                Step::Advance(2)
            }
            b'c' => {
                state.full_reset();
                Step::Advance(2)
            }
            other => {
                debug!("Unhandled escape: ESC {:?}", other as char);
                Step::Advance(2)
            }
        }
    }

    /// An unfinished sequence waits for more input if it reached the end of
    /// the buffer, otherwise it is skipped.
    fn unfinished(&self, kind: &str, len: usize, body: &[u8]) -> Step {
        if len >= body.len() {
            Step::Incomplete
        } else {
            warn!("Malformed {} sequence: {:?}", kind, String::from_utf8_lossy(&body[..len]));
            Step::Advance(2 + len)
        }
    }
}

/// How many bytes of `rest` belong to a discarded sequence, and whether the
/// sequence ends within them
fn discard_len(kind: Discard, rest: &[u8]) -> (usize, bool) {
    if kind == Discard::Csi {
        return match rest.iter().position(|b| !(0x20..=0x3f).contains(b)) {
            Some(pos) if rest[pos] == ESC => (pos, true),
            Some(pos) => (pos + 1, true),
            None => (rest.len(), false),
        };
    }
    for (j, &b) in rest.iter().enumerate() {
        match b {
            BEL if kind == Discard::Osc => return (j + 1, true),
            ESC => match rest.get(j + 1) {
                Some(b'\\') => return (j + 2, true),
                None => return (j, false),
                Some(_) if kind == Discard::Dcs => return (j, true),
                Some(_) => {}
            },
            _ => {}
        }
    }
    (rest.len(), false)
}

/// Whether `bytes` could still become valid UTF-8 with more input
fn is_utf8_prefix(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::display::{DisplayBuffer, MemoryBuffer};
    use crate::core::term::cell::{AttrFlags, CellAttrs, Color};

    fn decode(state: &mut TerminalState, decoder: &mut Decoder, input: &[u8]) -> Vec<Response> {
        decoder.feed(input, state)
    }

    #[test]
    fn test_clear_home_and_print() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"junk\x1b[2J\x1b[Hhi");
        assert_eq!(state.screen().row_text(1), "hi");
        assert_eq!((state.row(), state.col()), (1, 3));

        let mut buffer = MemoryBuffer::new();
        state.flush(&mut buffer);
        assert_eq!(buffer.line(1), Some("hi"));
        assert_eq!(buffer.line_count(), 24);
    }

    #[test]
    fn test_csi_split_across_chunks() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"\x1b[5;");
        assert!(decoder.has_pending());
        assert_eq!((state.row(), state.col()), (1, 1));
        decode(&mut state, &mut decoder, b"10Hx");
        assert!(!decoder.has_pending());
        assert_eq!(state.screen().cell(5, 10).map(|c| c.grapheme.as_str()), Some("x"));
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        let heart = "\u{2764}\u{fe0f}".as_bytes();
        assert_eq!(heart.len(), 6);
        decode(&mut state, &mut decoder, &heart[..2]);
        assert!(decoder.has_pending());
        decode(&mut state, &mut decoder, &heart[2..]);
        assert_eq!(
            state.screen().cell(1, 1).map(|c| c.grapheme.as_str()),
            Some("\u{2764}\u{fe0f}")
        );
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"a\xffb");
        assert_eq!(state.screen().row_text(1), "a\u{fffd}b");
    }

    #[test]
    fn test_sgr_then_reset() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"\x1b[1;31mR\x1b[0mN");
        let red = state.screen().cell(1, 1).map(|c| c.attrs);
        assert_eq!(
            red,
            Some(CellAttrs {
                fg: Color::Ansi { code: 31, light: false },
                bg: Color::Default,
                flags: AttrFlags::BOLD,
            })
        );
        assert_eq!(state.screen().cell(1, 2).map(|c| c.attrs), Some(CellAttrs::default()));
    }

    #[test]
    fn test_alt_screen_round_trip() {
        let mut state = TerminalState::new(20, 5, 10);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"shell$ ");
        decode(&mut state, &mut decoder, b"\x1b[?1049h\x1b[3;3Hvim");
        assert!(state.is_alternate());
        assert_eq!(state.screen().row_text(3), "  vim");
        decode(&mut state, &mut decoder, b"\x1b[?1049l");
        assert!(!state.is_alternate());
        assert_eq!(state.screen().row_text(1), "shell$ ");
    }

    #[test]
    fn test_lone_esc_at_chunk_end() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"ab\x1b");
        assert!(decoder.has_pending());
        assert_eq!(state.screen().row_text(1), "ab");
        decode(&mut state, &mut decoder, b"[Hc");
        assert_eq!(state.screen().row_text(1), "cb");
    }

    #[test]
    fn test_device_status_replies() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        let replies = decode(&mut state, &mut decoder, b"\x1b[4;6H\x1b[6n\x1b[5n\x1b[c\x1b[>c");
        let bytes: Vec<Vec<u8>> = replies.iter().map(Response::to_bytes).collect();
        assert_eq!(
            bytes,
            vec![
                b"\x1b[4;6R".to_vec(),
                b"\x1b[0n".to_vec(),
                b"\x1b[?6c".to_vec(),
                b"\x1b[>0;0;0c".to_vec(),
            ]
        );
        assert!(replies.iter().all(|r| !r.is_for_host()));
    }

    #[test]
    fn test_osc_title_and_clipboard() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"\x1b]0;my ti");
        assert!(state.title.is_empty());
        let replies = decode(&mut state, &mut decoder, b"tle\x07\x1b]52;c;Zm9v\x1b\\");
        assert_eq!(state.title, "my title");
        assert_eq!(replies, vec![Response::Clipboard("c;Zm9v".into())]);
        assert!(replies[0].is_for_host());
        assert_eq!(replies[0].to_bytes(), b"\x1b]52;c;Zm9v\x07".to_vec());
    }

    #[test]
    fn test_color_query_reply() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        let replies = decode(&mut state, &mut decoder, b"\x1b]11;?\x07");
        assert_eq!(replies[0].to_bytes(), b"\x1b]11;rgb:ffff/ffff/ffff\x07".to_vec());
    }

    #[test]
    fn test_malformed_csi_is_skipped() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"\x1b[1\x01xy");
        assert!(!decoder.has_pending());
        assert_eq!(state.screen().row_text(1), "xy");
    }

    #[test]
    fn test_dcs_is_consumed() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"\x1bP1$r0m");
        assert!(decoder.has_pending());
        decode(&mut state, &mut decoder, b"\x1b\\ok");
        assert_eq!(state.screen().row_text(1), "ok");
    }

    #[test]
    fn test_charset_and_alignment_escapes() {
        let mut state = TerminalState::new(3, 2, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"\x1b(Bz");
        assert_eq!(state.screen().row_text(1), "z");
        decode(&mut state, &mut decoder, b"\x1b#");
        decode(&mut state, &mut decoder, b"8");
        assert_eq!(state.screen().row_text(1), "EEE");
        assert_eq!(state.screen().row_text(2), "EEE");
    }

    #[test]
    fn test_controls() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"ab\x08c\r\nx\ty\x07\x7f");
        assert_eq!(state.screen().row_text(1), "ac");
        assert_eq!(state.screen().row_text(2), "x       y");
    }

    #[test]
    fn test_esc_save_restore_and_index() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        decode(&mut state, &mut decoder, b"\x1b[3;4H\x1b7\x1b[H\x1b8");
        assert_eq!((state.row(), state.col()), (3, 4));
        decode(&mut state, &mut decoder, b"\x1bD\x1bE\x1bM");
        assert_eq!((state.row(), state.col()), (4, 1));
    }

    #[test]
    fn test_oversized_osc_split_across_chunks() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        let mut chunk = b"\x1b]52;c;".to_vec();
        chunk.extend(std::iter::repeat(b'a').take(MAX_PENDING_SEQUENCE + 10));
        decode(&mut state, &mut decoder, &chunk);
        assert!(decoder.has_pending());

        decode(&mut state, &mut decoder, b"aaaa\x1b");
        decode(&mut state, &mut decoder, b"\\ok");
        assert!(!decoder.has_pending());
        assert_eq!(state.screen().row_text(1), "ok");
    }

    #[test]
    fn test_oversized_osc_ends_at_bel() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        let mut chunk = b"\x1b]0;".to_vec();
        chunk.extend(std::iter::repeat(b'a').take(70_000));
        decode(&mut state, &mut decoder, &chunk);
        decode(&mut state, &mut decoder, b"bbb\x07x");
        assert_eq!(state.screen().row_text(1), "x");
        assert!(state.title.is_empty());
    }

    #[test]
    fn test_oversized_dcs_aborted_by_escape() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        let mut chunk = b"\x1bP".to_vec();
        chunk.extend(std::iter::repeat(b'q').take(MAX_PENDING_SEQUENCE + 1));
        decode(&mut state, &mut decoder, &chunk);
        decode(&mut state, &mut decoder, b"qq\x1b[2;3Hx");
        assert_eq!(state.screen().row_text(1), "");
        assert_eq!(state.screen().cell(2, 3).map(|c| c.grapheme.as_str()), Some("x"));
    }

    #[test]
    fn test_oversized_csi_is_dropped() {
        let mut state = TerminalState::new(80, 24, 0);
        let mut decoder = Decoder::new();
        let mut chunk = b"\x1b[".to_vec();
        chunk.extend(std::iter::repeat(b'1').take(MAX_PENDING_SEQUENCE + 1));
        decode(&mut state, &mut decoder, &chunk);
        decode(&mut state, &mut decoder, b"22Hx");
        assert_eq!(state.screen().row_text(1), "x");
        assert!(!decoder.has_pending());
    }
}
