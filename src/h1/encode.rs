use bytes::Bytes;

use crate::error::{Error, Result};

/// How the request body is framed on the wire, decided by the headers the
/// caller set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyMode {
    /// No framing headers: the body must be empty.
    None,
    /// `Content-Length: N`: exactly N bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// Frames request-body chunks according to a [`BodyMode`], enforcing the
/// byte accounting the headers promised.
#[derive(Debug)]
pub(crate) struct Encoder {
    mode: BodyMode,
    sent: u64,
}

impl Encoder {
    pub(crate) fn new(mode: BodyMode) -> Encoder {
        Encoder { mode, sent: 0 }
    }

    /// Frame one non-empty chunk, returning the segments to write in order.
    pub(crate) fn frame(&mut self, data: Bytes) -> Result<Vec<Bytes>> {
        debug_assert!(!data.is_empty());
        match self.mode {
            BodyMode::None => Err(Error::body(
                "request has a body but neither Content-Length nor Transfer-Encoding: chunked",
            )),
            BodyMode::Length(expected) => {
                self.sent += data.len() as u64;
                if self.sent > expected {
                    return Err(Error::body(format!(
                        "request body exceeds the declared Content-Length of {expected}"
                    )));
                }
                Ok(vec![data])
            }
            BodyMode::Chunked => {
                self.sent += data.len() as u64;
                let prefix = Bytes::from(format!("{:x}\r\n", data.len()));
                Ok(vec![prefix, data, Bytes::from_static(b"\r\n")])
            }
        }
    }

    /// Finish the body, returning a final segment if the framing needs one.
    pub(crate) fn finish(self) -> Result<Option<Bytes>> {
        match self.mode {
            BodyMode::None => Ok(None),
            BodyMode::Length(expected) => {
                if self.sent != expected {
                    return Err(Error::body(format!(
                        "request body was {} bytes but Content-Length declared {expected}",
                        self.sent
                    )));
                }
                Ok(None)
            }
            BodyMode::Chunked => Ok(Some(Bytes::from_static(b"0\r\n\r\n"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mode_counts_exactly() {
        let mut encoder = Encoder::new(BodyMode::Length(5));
        let segments = encoder.frame(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(encoder.finish().unwrap().is_none());
    }

    #[test]
    fn short_length_body_is_an_error() {
        let mut encoder = Encoder::new(BodyMode::Length(10));
        encoder.frame(Bytes::from_static(b"hello")).unwrap();
        assert!(encoder.finish().unwrap_err().is_body());
    }

    #[test]
    fn oversized_length_body_is_an_error() {
        let mut encoder = Encoder::new(BodyMode::Length(3));
        let err = encoder.frame(Bytes::from_static(b"hello")).unwrap_err();
        assert!(err.is_body());
    }

    #[test]
    fn chunked_mode_frames_each_chunk() {
        let mut encoder = Encoder::new(BodyMode::Chunked);
        let segments = encoder.frame(Bytes::from_static(b"Hello, world!")).unwrap();
        let joined: Vec<u8> = segments.iter().flat_map(|s| s.iter().copied()).collect();
        assert_eq!(joined, b"d\r\nHello, world!\r\n");
        assert_eq!(
            encoder.finish().unwrap().unwrap().as_ref(),
            b"0\r\n\r\n"
        );
    }

    #[test]
    fn body_without_framing_headers_is_rejected() {
        let mut encoder = Encoder::new(BodyMode::None);
        let err = encoder.frame(Bytes::from_static(b"oops")).unwrap_err();
        assert!(err.is_body());
    }
}
