//! Tokenizers for CSI, OSC and DCS sequences.
//!
//! Each parser takes the bytes immediately following the introducer
//! (`ESC [`, `ESC ]`, `ESC P`) and reports how many of them it consumed and
//! whether a complete sequence was found. `len` always points just past what
//! was logically consumed, so the decoder can skip a malformed sequence or
//! stash an incomplete one for the next chunk.

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Qualifier preceding the CSI parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CsiMode {
    #[default]
    None,
    /// `!`
    Reset,
    /// `?`
    Private,
    /// `>`
    Xterm,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Csi {
    pub args: Vec<i64>,
    pub command: u8,
    pub mode: CsiMode,
    pub complete: bool,
    pub len: usize,
}

fn is_delim(b: u8) -> bool {
    matches!(b, b';' | b':' | b'?' | b' ' | b'>' | b'!' | b'%')
}

fn is_final(b: u8) -> bool {
    (0x40..=0x7e).contains(&b)
}

impl Csi {
    pub fn parse(input: &[u8]) -> Self {
        let mut csi = Csi::default();
        let mut iter = input.iter().copied().peekable();

        let mut field: Option<i64> = None;
        let mut after_sep = false;

        // Leading qualifiers; each bare separator stands for an omitted zero
        while let Some(&b) = iter.peek() {
            if !is_delim(b) {
                break;
            }
            match b {
                b'!' => csi.mode = CsiMode::Reset,
                b'?' => csi.mode = CsiMode::Private,
                b'>' => csi.mode = CsiMode::Xterm,
                b';' | b':' => {
                    csi.args.push(0);
                    after_sep = true;
                }
                _ => {}
            }
            iter.next();
            csi.len += 1;
        }

        for b in iter {
            match b {
                b'0'..=b'9' => {
                    let digit = (b - b'0') as i64;
                    field = Some(field.unwrap_or(0).saturating_mul(10).saturating_add(digit));
                }
                b';' | b':' => {
                    csi.args.push(field.take().unwrap_or(0));
                    after_sep = true;
                }
                ESC => return csi,
                b if is_delim(b) => {}
                b if is_final(b) => {
                    if field.is_some() || after_sep {
                        csi.args.push(field.unwrap_or(0));
                    }
                    csi.command = b;
                    csi.complete = true;
                    csi.len += 1;
                    return csi;
                }
                _ => {
                    // Not part of any CSI: consume it and give up
                    csi.len += 1;
                    return csi;
                }
            }
            csi.len += 1;
        }

        csi
    }

    /// Argument `idx`, or `default` when absent
    pub fn arg(&self, idx: usize, default: i64) -> i64 {
        self.args.get(idx).copied().unwrap_or(default)
    }

    /// Count-style argument: absent or zero means 1
    pub fn count(&self, idx: usize) -> usize {
        match self.args.get(idx).copied() {
            None | Some(0) => 1,
            Some(n) => n.clamp(1, u16::MAX as i64) as usize,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Osc {
    pub command: i64,
    pub arg: String,
    pub complete: bool,
    pub len: usize,
}

impl Osc {
    pub fn parse(input: &[u8]) -> Self {
        let mut osc = Osc::default();

        let digits = input.iter().take_while(|b| b.is_ascii_digit()).count();
        osc.command = input[..digits].iter().fold(0i64, |acc, b| {
            acc.saturating_mul(10).saturating_add((b - b'0') as i64)
        });
        osc.len = digits;

        match input.get(digits) {
            None => return osc,
            Some(&BEL) => {
                osc.len += 1;
                osc.complete = true;
                return osc;
            }
            Some(&b';') => osc.len += 1,
            Some(_) => {
                osc.len += 1;
                return osc;
            }
        }

        let body = &input[osc.len..];
        let mut i = 0;
        let mut end = None;
        while i < body.len() {
            match body[i] {
                BEL => {
                    end = Some((i, 1));
                    break;
                }
                ESC if body.get(i + 1) == Some(&b'\\') => {
                    end = Some((i, 2));
                    break;
                }
                ESC if i + 1 == body.len() => break,
                _ => i += 1,
            }
        }

        match end {
            Some((data_len, term_len)) => {
                osc.arg = String::from_utf8_lossy(&body[..data_len]).into_owned();
                osc.len += data_len + term_len;
                osc.complete = true;
            }
            None => osc.len = input.len(),
        }
        osc
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dcs {
    pub payload: Vec<u8>,
    pub complete: bool,
    pub len: usize,
}

impl Dcs {
    pub fn parse(input: &[u8]) -> Self {
        let mut dcs = Dcs::default();

        match input.iter().position(|&b| b == ESC) {
            None => dcs.len = input.len(),
            Some(pos) => {
                dcs.payload = input[..pos].to_vec();
                match input.get(pos + 1) {
                    Some(b'\\') => {
                        dcs.len = pos + 2;
                        dcs.complete = true;
                    }
                    // The stray ESC is left for the caller to re-read
                    Some(_) => dcs.len = pos,
                    None => dcs.len = input.len(),
                }
            }
        }
        dcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_csi_simple() {
        let csi = Csi::parse(b"1;31mrest");
        assert!(csi.complete);
        assert_eq!(csi.args, vec![1, 31]);
        assert_eq!(csi.command, b'm');
        assert_eq!(csi.mode, CsiMode::None);
        assert_eq!(csi.len, 5);
    }

    #[test]
    fn test_csi_modes() {
        let csi = Csi::parse(b"?1049h");
        assert_eq!(csi.mode, CsiMode::Private);
        assert_eq!(csi.args, vec![1049]);
        assert_eq!(Csi::parse(b">c").mode, CsiMode::Xterm);
        let reset = Csi::parse(b"!p");
        assert_eq!(reset.mode, CsiMode::Reset);
        assert!(reset.args.is_empty());
        assert_eq!(reset.len, 2);
    }

    #[test]
    fn test_csi_implicit_zeros() {
        assert_eq!(Csi::parse(b";5H").args, vec![0, 5]);
        assert_eq!(Csi::parse(b";;5H").args, vec![0, 0, 5]);
        assert_eq!(Csi::parse(b"1;;2H").args, vec![1, 0, 2]);
        assert_eq!(Csi::parse(b"H").args, Vec::<i64>::new());
    }

    #[test]
    fn test_csi_truncated() {
        let csi = Csi::parse(b"12;3");
        assert!(!csi.complete);
        assert_eq!(csi.len, 4);

        let csi = Csi::parse(b"");
        assert!(!csi.complete);
        assert_eq!(csi.len, 0);
    }

    #[test]
    fn test_csi_embedded_esc() {
        let csi = Csi::parse(b"12\x1b[H");
        assert!(!csi.complete);
        assert_eq!(csi.len, 2);
    }

    #[test]
    fn test_csi_invalid_byte() {
        let csi = Csi::parse(b"1\x01m");
        assert!(!csi.complete);
        assert_eq!(csi.len, 2);
    }

    #[test]
    fn test_osc_title_bel() {
        let osc = Osc::parse(b"0;my title\x07tail");
        assert!(osc.complete);
        assert_eq!(osc.command, 0);
        assert_eq!(osc.arg, "my title");
        assert_eq!(osc.len, 11);
    }

    #[test]
    fn test_osc_string_terminator() {
        let osc = Osc::parse(b"2;a\x1b\\");
        assert!(osc.complete);
        assert_eq!(osc.arg, "a");
        assert_eq!(osc.len, 5);
    }

    #[test]
    fn test_osc_bare_esc_is_data() {
        let osc = Osc::parse(b"0;a\x1bb\x07");
        assert!(osc.complete);
        assert_eq!(osc.arg, "a\x1bb");
    }

    #[test]
    fn test_osc_incomplete() {
        let osc = Osc::parse(b"0;partial");
        assert!(!osc.complete);
        assert_eq!(osc.len, 9);

        let osc = Osc::parse(b"0;partial\x1b");
        assert!(!osc.complete);
        assert_eq!(osc.len, 10);

        let osc = Osc::parse(b"11");
        assert!(!osc.complete);
        assert_eq!(osc.len, 2);
    }

    #[test]
    fn test_osc_bad_separator() {
        let osc = Osc::parse(b"4x");
        assert!(!osc.complete);
        assert_eq!(osc.len, 2);
    }

    #[test]
    fn test_dcs() {
        let dcs = Dcs::parse(b"1$r0m\x1b\\after");
        assert!(dcs.complete);
        assert_eq!(dcs.payload, b"1$r0m");
        assert_eq!(dcs.len, 7);

        let dcs = Dcs::parse(b"payload");
        assert!(!dcs.complete);
        assert_eq!(dcs.len, 7);

        let dcs = Dcs::parse(b"ab\x1b[");
        assert!(!dcs.complete);
        assert_eq!(dcs.len, 2);
    }

    fn params() -> impl Strategy<Value = Vec<Option<u16>>> {
        prop::collection::vec(prop::option::of(0u16..10000), 1..6)
    }

    proptest! {
        #[test]
        fn prop_csi_complete(fields in params(), fin in 0x40u8..=0x7e, tail in prop::collection::vec(any::<u8>(), 0..8)) {
            let body: Vec<String> = fields
                .iter()
                .map(|f| f.map(|n| n.to_string()).unwrap_or_default())
                .collect();
            let params = body.join(";");
            let mut input = params.clone().into_bytes();
            input.push(fin);
            input.extend(&tail);

            let csi = Csi::parse(&input);
            prop_assert!(csi.complete);
            prop_assert_eq!(csi.len, params.len() + 1);
            prop_assert_eq!(csi.command, fin);

            let expected: Vec<i64> = if params.is_empty() {
                Vec::new()
            } else {
                params
                    .split([';', ':'])
                    .map(|s| s.parse::<i64>().unwrap_or(0))
                    .collect()
            };
            prop_assert_eq!(csi.args, expected);
        }

        #[test]
        fn prop_csi_truncated(fields in params()) {
            let params: Vec<String> = fields
                .iter()
                .map(|f| f.map(|n| n.to_string()).unwrap_or_default())
                .collect();
            let input = params.join(";").into_bytes();
            let csi = Csi::parse(&input);
            prop_assert!(!csi.complete);
            prop_assert_eq!(csi.len, input.len());
        }
    }
}
