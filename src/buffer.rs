//! Cursor-style readers/writers over replication protocol byte buffers.
//! Big-endian ("network byte order") throughout, per spec.

use crate::errors::{ReplicationError, Result};

pub struct BufferReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(ReplicationError::buffer("seek past end of buffer"));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn has_bytes(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if !self.has_bytes(n) {
            return Err(ReplicationError::truncated(format!(
                "needed {} bytes, {} remaining",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Skips and returns the one-byte message-kind tag that leads every frame.
    pub fn skip_message_type(&mut self) -> Result<char> {
        Ok(self.read_u8()? as char)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_null_terminated_string(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.buf.len() && self.buf[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.buf.len() {
            return Err(ReplicationError::truncated("unterminated string"));
        }
        let s = String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned();
        self.pos += 1; // skip nul
        Ok(s)
    }

    /// Remaining unconsumed bytes, without advancing the cursor.
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_length_prefixed_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ReplicationError::parse("negative length prefix"));
        }
        self.take(len as usize)
    }
}

pub struct BufferWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn bytes_written(&self) -> usize {
        self.pos
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        if self.pos + bytes.len() > self.buf.len() {
            return Err(ReplicationError::buffer("write past end of buffer"));
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub fn write_u8(&mut self, val: u8) -> Result<()> {
        self.put(&[val])
    }

    pub fn write_i64(&mut self, val: i64) -> Result<()> {
        self.put(&val.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_integers() {
        let buf = [0x00, 0x00, 0x00, 0x01, 0xff, 0xff, 0xff, 0xff];
        let mut r = BufferReader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_i32().unwrap(), -1);
    }

    #[test]
    fn reads_null_terminated_strings() {
        let buf = b"public\0t\0";
        let mut r = BufferReader::new(buf);
        assert_eq!(r.read_null_terminated_string().unwrap(), "public");
        assert_eq!(r.read_null_terminated_string().unwrap(), "t");
    }

    #[test]
    fn truncated_read_is_an_error() {
        let buf = [0x00, 0x01];
        let mut r = BufferReader::new(&buf);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut bytes = [0u8; 16];
        {
            let mut w = BufferWriter::new(&mut bytes);
            w.write_u8(b'r').unwrap();
            w.write_i64(42).unwrap();
            assert_eq!(w.bytes_written(), 9);
        }
        let mut r = BufferReader::new(&bytes[..9]);
        assert_eq!(r.read_u8().unwrap(), b'r');
        assert_eq!(r.read_i64().unwrap(), 42);
    }
}
