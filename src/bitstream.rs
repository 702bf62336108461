// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-level plumbing for parameter set parsing: emulation prevention byte
//! stripping and exp-Golomb reading on top of `bitreader`.

use std::borrow::Cow;

use bitreader::BitReader;

use crate::Error;

/// Removes emulation prevention bytes (`00 00 03`) from a NAL unit payload.
///
/// Returns the input unchanged when no escape sequence is present, which is
/// the common case for the short parameter sets we parse.
pub(crate) fn strip_emulation_prevention(data: &[u8]) -> Cow<'_, [u8]> {
    if !data.windows(3).any(|w| w == [0x00, 0x00, 0x03]) {
        return Cow::Borrowed(data);
    }

    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    Cow::Owned(out)
}

/// Reader over an RBSP (emulation prevention already stripped).
pub(crate) struct RbspReader<'a> {
    inner: BitReader<'a>,
}

impl<'a> RbspReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            inner: BitReader::new(data),
        }
    }

    fn short(e: bitreader::BitReaderError) -> Error {
        Error::NonCompliantBitstream(format!("truncated parameter set: {}", e))
    }

    /// Fixed-width read of up to 32 bits.
    pub fn f(&mut self, bits: u8) -> Result<u32, Error> {
        self.inner.read_u32(bits).map_err(Self::short)
    }

    pub fn flag(&mut self) -> Result<bool, Error> {
        self.inner.read_bool().map_err(Self::short)
    }

    pub fn skip(&mut self, bits: u64) -> Result<(), Error> {
        self.inner.skip(bits).map_err(Self::short)
    }

    /// ue(v): unsigned exp-Golomb.
    pub fn ue(&mut self) -> Result<u32, Error> {
        let mut leading_zeros = 0u8;
        while !self.flag()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(Error::NonCompliantBitstream(
                    "oversized exp-Golomb code".into(),
                ));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let rest = self.f(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + rest)
    }

    /// se(v): signed exp-Golomb.
    pub fn se(&mut self) -> Result<i32, Error> {
        let code = self.ue()?;
        let abs = code.div_ceil(2) as i32;
        if code % 2 == 1 {
            Ok(abs)
        } else {
            Ok(-abs)
        }
    }

    /// Skip to the next byte boundary.
    pub fn byte_align(&mut self) -> Result<(), Error> {
        let rem = self.inner.position() % 8;
        if rem != 0 {
            self.skip(8 - rem)?;
        }
        Ok(())
    }
}

/// MSB-first bit writer, used to assemble test bitstreams that the parameter
/// set readers can consume.
#[cfg(test)]
pub(crate) struct BitWriter {
    out: Vec<u8>,
    curr: u8,
    nbits: u8,
}

#[cfg(test)]
impl BitWriter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            curr: 0,
            nbits: 0,
        }
    }

    pub fn f(&mut self, bits: u8, value: u64) {
        assert!(bits <= 64);
        for i in (0..bits).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.curr = (self.curr << 1) | bit;
            self.nbits += 1;
            if self.nbits == 8 {
                self.out.push(self.curr);
                self.curr = 0;
                self.nbits = 0;
            }
        }
    }

    pub fn flag(&mut self, value: bool) {
        self.f(1, value as u64);
    }

    pub fn ue(&mut self, value: u32) {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros() as u8;
        self.f(len - 1, 0);
        self.f(len, code);
    }

    pub fn byte_align(&mut self) {
        while self.nbits != 0 {
            self.flag(false);
        }
    }

    /// Flushes the pending partial byte (zero padded) and returns the stream.
    pub fn finish(mut self) -> Vec<u8> {
        self.byte_align();
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_removes_escapes() {
        let data = [0x00, 0x00, 0x03, 0x01, 0xff, 0x00, 0x00, 0x03, 0x00];
        let out = strip_emulation_prevention(&data);
        assert_eq!(out.as_ref(), &[0x00, 0x00, 0x01, 0xff, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn strip_borrows_when_clean() {
        let data = [0x12, 0x00, 0x00, 0x01, 0x34];
        assert!(matches!(
            strip_emulation_prevention(&data),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn exp_golomb_round_trip() {
        let mut w = BitWriter::new();
        for v in [0u32, 1, 2, 3, 7, 255, 1920] {
            w.ue(v);
        }
        let bytes = w.finish();
        let mut r = RbspReader::new(&bytes);
        for v in [0u32, 1, 2, 3, 7, 255, 1920] {
            assert_eq!(r.ue().unwrap(), v);
        }
    }

    #[test]
    fn signed_exp_golomb() {
        // Code words 0..=4 map to 0, 1, -1, 2, -2.
        let mut w = BitWriter::new();
        for code in 0u32..5 {
            w.ue(code);
        }
        let bytes = w.finish();
        let mut r = RbspReader::new(&bytes);
        assert_eq!(r.se().unwrap(), 0);
        assert_eq!(r.se().unwrap(), 1);
        assert_eq!(r.se().unwrap(), -1);
        assert_eq!(r.se().unwrap(), 2);
        assert_eq!(r.se().unwrap(), -2);
    }

    #[test]
    fn fixed_reads_and_alignment() {
        let mut w = BitWriter::new();
        w.f(4, 0xa);
        w.byte_align();
        w.f(8, 0x5c);
        let bytes = w.finish();
        let mut r = RbspReader::new(&bytes);
        assert_eq!(r.f(4).unwrap(), 0xa);
        r.byte_align().unwrap();
        assert_eq!(r.f(8).unwrap(), 0x5c);
    }
}
