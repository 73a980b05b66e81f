//! A streaming UTF-8 decoder and encoder over the code-point range
//! `0..=0x10FFFF`
//!
//! Both directions are incremental: the encoder collects bytes rune by rune,
//! the decoder collects runes byte by byte. Malformed input yields the
//! replacement rune [`ERROR_RUNE`] and a sticky error flag which is reported
//! when the stream is finished. Overlong encodings are rejected by enforcing
//! the minimal code point of each sequence length.

use std::io::{Read, Write};

/// A Unicode code point, decoded but not validated beyond `0..=0x10FFFF`
pub type Rune = u32;

/// The replacement character, emitted for malformed input
pub const ERROR_RUNE: Rune = 0xfffd;

const MAX_RUNE: Rune = 0x10ffff;

/// Incremental UTF-8 encoder
pub struct Encoder {
    bytes: Vec<u8>,
    ok: bool,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder { bytes: Vec::new(), ok: true }
    }

    /// Encode a single rune; returns false for runes beyond `0x10FFFF`
    pub fn encode(&mut self, rune: Rune) -> bool {
        if rune <= 0x7f {
            self.bytes.push(rune as u8);
        } else if rune <= 0x07ff {
            self.bytes.push(0b110_00000 | ((rune >> 6) & 0b000_11111) as u8);
            self.bytes.push(0b10_000000 | (rune & 0b00_111111) as u8);
        } else if rune <= 0xffff {
            self.bytes.push(0b1110_0000 | ((rune >> 12) & 0b0000_1111) as u8);
            self.bytes.push(0b10_000000 | ((rune >> 6) & 0b00_111111) as u8);
            self.bytes.push(0b10_000000 | (rune & 0b00_111111) as u8);
        } else if rune <= MAX_RUNE {
            self.bytes.push(0b11110_000 | ((rune >> 18) & 0b00000_111) as u8);
            self.bytes.push(0b10_000000 | ((rune >> 12) & 0b00_111111) as u8);
            self.bytes.push(0b10_000000 | ((rune >> 6) & 0b00_111111) as u8);
            self.bytes.push(0b10_000000 | (rune & 0b00_111111) as u8);
        } else {
            self.ok = false;
            return false;
        }
        true
    }

    /// Yield the collected bytes and the error-free flag, resetting the stream
    pub fn finish(&mut self) -> (Vec<u8>, bool) {
        let result = (std::mem::take(&mut self.bytes), self.ok);
        self.ok = true;
        result
    }
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}

/// Incremental UTF-8 decoder
pub struct Decoder {
    runes: Vec<Rune>,
    buf: Vec<u8>,
    ok: bool,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder { runes: Vec::new(), buf: Vec::with_capacity(4), ok: true }
    }

    /// Consume one byte; the return value signals that more bytes are
    /// required to complete the current rune
    pub fn decode(&mut self, b: u8) -> bool {
        if self.buf.iter().skip(1).any(|&c| c & 0b11_000000 != 0b10_000000) {
            return self.err();
        }

        self.buf.push(b);

        let head = self.buf[0];
        let (len, min, max): (usize, Rune, Rune) = if head & 0b1_0000000 == 0 {
            (1, 0x00, 0x7f)
        } else if head & 0b111_00000 == 0b110_00000 {
            (2, 0x80, 0x07ff)
        } else if head & 0b1111_0000 == 0b1110_0000 {
            (3, 0x0800, 0xffff)
        } else if head & 0b11111_000 == 0b11110_000 {
            (4, 0x10000, MAX_RUNE)
        } else {
            return self.err();
        };

        if self.buf.len() < len {
            return true;
        }
        if self.buf.iter().skip(1).any(|&c| c & 0b11_000000 != 0b10_000000) {
            return self.err();
        }

        let mut rune: Rune = match len {
            1 => (head & 0b0_1111111) as Rune,
            2 => (head & 0b000_11111) as Rune,
            3 => (head & 0b0000_1111) as Rune,
            _ => (head & 0b00000_111) as Rune,
        };
        for &c in self.buf.iter().skip(1) {
            rune = rune << 6 | (c & 0b00_111111) as Rune;
        }
        self.buf.clear();

        // an out-of-range rune here is an overlong or too-large encoding
        if rune < min || rune > max {
            return self.err();
        }
        self.runes.push(rune);
        false
    }

    /// Yield the collected runes and the error-free flag, resetting the
    /// stream; a dangling partial sequence counts as an error
    pub fn finish(&mut self) -> (Vec<Rune>, bool) {
        if !self.buf.is_empty() {
            self.err();
        }
        let result = (std::mem::take(&mut self.runes), self.ok);
        self.buf.clear();
        self.ok = true;
        result
    }

    fn err(&mut self) -> bool {
        self.runes.push(ERROR_RUNE);
        self.buf.clear();
        self.ok = false;
        false
    }
}

impl Default for Decoder {
    fn default() -> Decoder {
        Decoder::new()
    }
}

/// Decode an entire string into runes; `None` on any malformed sequence
pub fn decode_str(s: &str) -> Option<Vec<Rune>> {
    let mut decoder = Decoder::new();
    for b in s.bytes() {
        decoder.decode(b);
    }
    let (runes, ok) = decoder.finish();
    ok.then_some(runes)
}

/// Re-encode a rune vector as a `String`; `None` if any rune is no valid
/// code point
pub fn runes_to_string(runes: &[Rune]) -> Option<String> {
    runes.iter().map(|&r| char::from_u32(r)).collect()
}

/// Encode one rune to a writer; silently drops invalid runes
pub fn put_rune(out: &mut impl Write, rune: Rune) {
    let mut encoder = Encoder::new();
    encoder.encode(rune);
    let (bytes, ok) = encoder.finish();
    if ok {
        let _ = out.write_all(&bytes);
    }
}

/// Decode one rune from a reader; [`ERROR_RUNE`] on malformed input or EOF
pub fn get_rune(inp: &mut impl Read) -> Rune {
    let mut decoder = Decoder::new();
    loop {
        let mut byte = [0u8; 1];
        if inp.read_exact(&mut byte).is_err() {
            return ERROR_RUNE;
        }
        if !decoder.decode(byte[0]) {
            break;
        }
    }
    let (runes, ok) = decoder.finish();
    if !ok || runes.len() != 1 {
        return ERROR_RUNE;
    }
    runes[0]
}
