use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use crate::error::{Error, Result};

// Chunk size lines and trailer lines are tiny in practice; anything past
// this without a CRLF is a framing violation, not a short read.
const MAX_LINE: usize = 4096;

/// Incremental response-body decoder.
///
/// Operates on whatever bytes have been buffered so far; `decode` never
/// blocks and returns `NeedMore` when the buffer is exhausted mid-frame, so
/// arbitrarily fragmented reads are handled uniformly.
#[derive(Debug)]
pub(crate) enum Decoder {
    /// No body at all (HEAD, 204, 304).
    Empty,
    /// An exact number of bytes remaining.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked(ChunkedState),
    /// Everything until the server closes the connection.
    CloseDelimited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChunkedState {
    Size,
    Data(u64),
    DataCrlf,
    Trailer,
    Done,
}

pub(crate) enum Decoded {
    Data(Bytes),
    Complete,
    NeedMore,
}

impl Decoder {
    pub(crate) fn chunked() -> Decoder {
        Decoder::Chunked(ChunkedState::Size)
    }

    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded> {
        match self {
            Decoder::Empty => Ok(Decoded::Complete),
            Decoder::Length(remaining) => {
                if *remaining == 0 {
                    return Ok(Decoded::Complete);
                }
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = std::cmp::min(*remaining, buf.len() as u64) as usize;
                *remaining -= n as u64;
                Ok(Decoded::Data(buf.split_to(n).freeze()))
            }
            Decoder::Chunked(state) => decode_chunked(state, buf),
            Decoder::CloseDelimited => {
                if buf.is_empty() {
                    Ok(Decoded::NeedMore)
                } else {
                    let len = buf.len();
                    Ok(Decoded::Data(buf.split_to(len).freeze()))
                }
            }
        }
    }

    /// Called when the stream reports EOF while the body is still being
    /// decoded. Only a close-delimited body may end that way.
    pub(crate) fn on_eof(&self) -> Result<()> {
        match self {
            Decoder::Empty | Decoder::Length(0) | Decoder::CloseDelimited => Ok(()),
            Decoder::Chunked(ChunkedState::Done) => Ok(()),
            Decoder::Length(_) => Err(Error::protocol(
                "response body ended before the advertised Content-Length",
            )),
            Decoder::Chunked(_) => Err(Error::protocol(
                "connection closed inside a chunked body",
            )),
        }
    }
}

fn decode_chunked(state: &mut ChunkedState, buf: &mut BytesMut) -> Result<Decoded> {
    loop {
        match *state {
            ChunkedState::Size => {
                let line = match split_line(buf, "chunk size")? {
                    Some(line) => line,
                    None => return Ok(Decoded::NeedMore),
                };
                let size = parse_chunk_size(&line)?;
                *state = if size == 0 {
                    ChunkedState::Trailer
                } else {
                    ChunkedState::Data(size)
                };
            }
            ChunkedState::Data(remaining) => {
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = std::cmp::min(remaining, buf.len() as u64) as usize;
                let data = buf.split_to(n).freeze();
                let left = remaining - n as u64;
                *state = if left == 0 {
                    ChunkedState::DataCrlf
                } else {
                    ChunkedState::Data(left)
                };
                return Ok(Decoded::Data(data));
            }
            ChunkedState::DataCrlf => {
                if buf.len() < 2 {
                    return Ok(Decoded::NeedMore);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(Error::protocol("chunk data not terminated by CRLF"));
                }
                buf.advance(2);
                *state = ChunkedState::Size;
            }
            ChunkedState::Trailer => {
                let line = match split_line(buf, "trailer")? {
                    Some(line) => line,
                    None => return Ok(Decoded::NeedMore),
                };
                if line.is_empty() {
                    *state = ChunkedState::Done;
                    return Ok(Decoded::Complete);
                }
                // Trailers are tolerated but not surfaced.
                trace!("discarding trailer line ({} bytes)", line.len());
            }
            ChunkedState::Done => return Ok(Decoded::Complete),
        }
    }
}

/// Split one CRLF-terminated line off the front of `buf`, without the CRLF.
fn split_line(buf: &mut BytesMut, what: &str) -> Result<Option<Bytes>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            if pos == 0 || buf[pos - 1] != b'\r' {
                return Err(Error::protocol(format!("malformed {what} line")));
            }
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos - 1);
            Ok(Some(line.freeze()))
        }
        None if buf.len() > MAX_LINE => {
            Err(Error::protocol(format!("{what} line exceeds {MAX_LINE} bytes")))
        }
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let digits = crate::request::trim_ascii(digits);
    if digits.is_empty() || digits.len() > 16 {
        return Err(Error::protocol("invalid chunk size"));
    }

    let mut size: u64 = 0;
    for &b in digits {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(Error::protocol("invalid chunk size")),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or_else(|| Error::protocol("chunk size overflow"))?;
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(decoder: &mut Decoder, input: &[&[u8]]) -> Result<(Vec<u8>, bool)> {
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for part in input {
            buf.extend_from_slice(part);
            loop {
                match decoder.decode(&mut buf)? {
                    Decoded::Data(data) => out.extend_from_slice(&data),
                    Decoded::Complete => return Ok((out, true)),
                    Decoded::NeedMore => break,
                }
            }
        }
        Ok((out, false))
    }

    #[test]
    fn length_body() {
        let mut decoder = Decoder::Length(13);
        let (out, done) = collect(&mut decoder, &[b"Hello, ", b"world!"]).unwrap();
        assert_eq!(out, b"Hello, world!");
        assert!(done);
    }

    #[test]
    fn chunked_body_in_one_piece() {
        let mut decoder = Decoder::chunked();
        let (out, done) =
            collect(&mut decoder, &[b"5\r\nHello\r\n8\r\n, world!\r\n0\r\n\r\n"]).unwrap();
        assert_eq!(out, b"Hello, world!");
        assert!(done);
    }

    #[test]
    fn chunked_body_fragmented_anywhere() {
        // Split mid size line, mid data, and mid terminator.
        let mut decoder = Decoder::chunked();
        let (out, done) = collect(
            &mut decoder,
            &[b"5", b"\r", b"\nHel", b"lo\r", b"\n0\r\n", b"\r\n"],
        )
        .unwrap();
        assert_eq!(out, b"Hello");
        assert!(done);
    }

    #[test]
    fn chunked_body_with_extension_and_trailers() {
        let mut decoder = Decoder::chunked();
        let (out, done) = collect(
            &mut decoder,
            &[b"5;name=value\r\nHello\r\n0\r\nExpires: never\r\n\r\n"],
        )
        .unwrap();
        assert_eq!(out, b"Hello");
        assert!(done);
    }

    #[test]
    fn invalid_chunk_size_is_a_protocol_error() {
        let mut decoder = Decoder::chunked();
        let err = collect(&mut decoder, &[b"xyz\r\n"]).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn missing_chunk_crlf_is_a_protocol_error() {
        let mut decoder = Decoder::chunked();
        let err = collect(&mut decoder, &[b"5\r\nHelloXX0\r\n\r\n"]).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn close_delimited_yields_until_eof() {
        let mut decoder = Decoder::CloseDelimited;
        let (out, done) = collect(&mut decoder, &[b"some ", b"bytes"]).unwrap();
        assert_eq!(out, b"some bytes");
        assert!(!done);
        assert!(decoder.on_eof().is_ok());
    }

    #[test]
    fn short_length_body_fails_on_eof() {
        let mut decoder = Decoder::Length(100);
        let (_, done) = collect(&mut decoder, &[b"partial"]).unwrap();
        assert!(!done);
        assert!(decoder.on_eof().unwrap_err().is_protocol());
    }
}
