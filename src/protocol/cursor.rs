//! Byte cursor shared by the frame parsers.
//!
//! Every structural read goes through here so the offset arithmetic lives in
//! one place. All operations are bounds-checked and report the offset they
//! failed at.

use super::parser::FrameError;
use memchr::memmem;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed bytes.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn starts_with(&self, token: &[u8]) -> bool {
        self.rest().starts_with(token)
    }

    /// Absolute offset of the next occurrence of `needle` at or after the
    /// cursor. Does not move.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        memmem::find(self.rest(), needle).map(|at| self.pos + at)
    }

    /// Move to an absolute offset within the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<(), FrameError> {
        if pos > self.buf.len() {
            return Err(FrameError::Truncated {
                offset: self.buf.len(),
                needed: pos - self.buf.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn advance(&mut self, n: usize) -> Result<(), FrameError> {
        self.take(n).map(|_| ())
    }

    /// Consume `token` or fail without moving.
    pub fn expect(&mut self, token: &'static str) -> Result<(), FrameError> {
        if self.starts_with(token.as_bytes()) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(FrameError::MissingSentinel {
                token,
                offset: self.pos,
            })
        }
    }

    /// Consume exactly one `byte` or fail without moving.
    pub fn expect_byte(&mut self, byte: u8) -> Result<(), FrameError> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(FrameError::UnexpectedByte {
                expected: byte,
                offset: self.pos,
            }),
            None => Err(FrameError::Truncated {
                offset: self.pos,
                needed: 1,
            }),
        }
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let available = self.remaining();
        if n > available {
            return Err(FrameError::Truncated {
                offset: self.pos,
                needed: n - available,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consume a non-empty run of bytes up to (not including) `delim`. The
    /// delimiter is left in place.
    pub fn take_until(&mut self, delim: u8) -> Result<&'a [u8], FrameError> {
        let start = self.pos;
        let len = memchr::memchr(delim, self.rest()).ok_or(FrameError::MissingDelimiter {
            delimiter: delim,
            offset: start,
        })?;
        if len == 0 {
            return Err(FrameError::EmptyField { offset: start });
        }
        self.pos += len;
        Ok(&self.buf[start..start + len])
    }
}
