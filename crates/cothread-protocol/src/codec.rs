//! Turning stream bytes into messages

use crate::error::ProtocolError;

/// Incremental message decoder
///
/// `decode` is handed the bytes received so far. It removes the bytes of
/// one complete message from the front of `buf` and returns the message,
/// or returns `Ok(None)` and leaves `buf` alone when more input is needed.
pub trait Decoder {
    type Item;

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Self::Item>, ProtocolError>;

    /// Called once at end of input with whatever is left over
    fn decode_eof(&mut self, buf: &mut Vec<u8>) -> Result<Option<Self::Item>, ProtocolError> {
        match self.decode(buf)? {
            Some(item) => Ok(Some(item)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::new("bytes remaining at end of input")),
        }
    }
}

/// Newline-delimited UTF-8 lines
///
/// The line terminator (`\n` or `\r\n`) is stripped. A final line without
/// terminator is still delivered at end of input.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    max_length: usize,
    /// Bytes of `buf` already scanned for a newline
    scanned: usize,
}

impl LineDecoder {
    pub const DEFAULT_MAX_LENGTH: usize = 64 * 1024;

    pub fn new() -> Self {
        Self::with_max_length(Self::DEFAULT_MAX_LENGTH)
    }

    /// Reject lines longer than `max_length` bytes (terminator excluded)
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length, scanned: 0 }
    }

    fn take_line(&mut self, buf: &mut Vec<u8>, end: usize, consumed: usize) -> Result<String, ProtocolError> {
        let mut line: Vec<u8> = buf.drain(..consumed).collect();
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        self.scanned = 0;
        String::from_utf8(line).map_err(|_| ProtocolError::new("line is not valid UTF-8"))
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineDecoder {
    type Item = String;

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<String>, ProtocolError> {
        let start = self.scanned.min(buf.len());
        match buf[start..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = start + offset;
                let len = if end > 0 && buf[end - 1] == b'\r' { end - 1 } else { end };
                if len > self.max_length {
                    return Err(ProtocolError::new("line too long"));
                }
                self.take_line(buf, end, end + 1).map(Some)
            }
            None if buf.len() > self.max_length + 1 => Err(ProtocolError::new("line too long")),
            None => {
                self.scanned = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut Vec<u8>) -> Result<Option<String>, ProtocolError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        self.take_line(buf, len, len).map(Some)
    }
}
