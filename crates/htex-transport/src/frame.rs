use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// Streaming counterpart of `htex_protocol::framing`'s `<decimal-len>\n<raw
/// bytes>` frame shape, plugged directly into `tokio_util::codec::Framed` so
/// every transport connection speaks the same frame format the Codec uses
/// for its own buffer packing. One `LineFramedCodec` item is one message.
pub struct LineFramedCodec {
    state: DecodeState,
}

enum DecodeState {
    Header,
    Body(usize),
}

impl Default for LineFramedCodec {
    fn default() -> Self {
        Self {
            state: DecodeState::Header,
        }
    }
}

impl Decoder for LineFramedCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    let Some(nl) = src.iter().position(|&b| b == b'\n') else {
                        if src.len() > 32 {
                            return Err(TransportError::Framing(
                                "length prefix exceeded 32 bytes without a newline".into(),
                            ));
                        }
                        return Ok(None);
                    };
                    let header = src.split_to(nl);
                    src.advance(1); // the newline itself
                    let len_str = std::str::from_utf8(&header).map_err(|e| {
                        TransportError::Framing(format!("non-utf8 length prefix: {e}"))
                    })?;
                    let len: usize = len_str.parse().map_err(|e| {
                        TransportError::Framing(format!("invalid length prefix {len_str:?}: {e}"))
                    })?;
                    self.state = DecodeState::Body(len);
                }
                DecodeState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(len).freeze();
                    self.state = DecodeState::Header;
                    return Ok(Some(body));
                }
            }
        }
    }
}

impl Encoder<Bytes> for LineFramedCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.len().to_string().as_bytes());
        dst.extend_from_slice(b"\n");
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn encodes_and_decodes_across_partial_reads() {
        let mut codec = LineFramedCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"hello"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b""), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"world"), &mut buf).unwrap();

        // Feed the decoder one byte at a time to exercise the partial-frame path.
        let mut decoder = LineFramedCodec::default();
        let mut fed = BytesMut::new();
        let mut out = Vec::new();
        for byte in buf {
            fed.extend_from_slice(&[byte]);
            while let Some(item) = decoder.decode(&mut fed).unwrap() {
                out.push(item);
            }
        }
        assert_eq!(out, vec![Bytes::from_static(b"hello"), Bytes::from_static(b""), Bytes::from_static(b"world")]);
    }
}
