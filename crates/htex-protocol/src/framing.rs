use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Packs a list of buffers into one, each prefixed by its decimal length in
/// ASCII followed by a single `\n`, with no trailing separator.
///
/// This is the exact frame shape used at every layer of this protocol: the
/// callable/args/kwargs triple packed by [`crate::codec::Codec::pack_apply`],
/// and every message the transport layer puts on the wire
/// (`htex_transport::frame`) reuses this same function.
pub fn pack_buffers<I, B>(buffers: I) -> Bytes
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for buf in buffers {
        let buf = buf.as_ref();
        out.put_slice(buf.len().to_string().as_bytes());
        out.put_u8(b'\n');
        out.put_slice(buf);
    }
    out.freeze()
}

/// Reverses [`pack_buffers`]. Fails with [`CodecError::FramingError`] if the
/// input is not a clean sequence of `<decimal-len>\n<len bytes>` frames.
pub fn unpack_buffers(mut data: &[u8]) -> Result<Vec<Bytes>, CodecError> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let nl = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| CodecError::FramingError("missing length prefix newline".into()))?;
        let (len_digits, rest) = data.split_at(nl);
        let len_str = std::str::from_utf8(len_digits)
            .map_err(|e| CodecError::FramingError(format!("non-utf8 length prefix: {e}")))?;
        let len: usize = len_str
            .parse()
            .map_err(|e| CodecError::FramingError(format!("invalid length prefix {len_str:?}: {e}")))?;

        let rest = &rest[1..]; // skip '\n'
        if rest.len() < len {
            return Err(CodecError::FramingError(format!(
                "declared length {len} exceeds remaining {} bytes",
                rest.len()
            )));
        }
        let (frame, remainder) = rest.split_at(len);
        out.push(Bytes::copy_from_slice(frame));
        data = remainder;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_buffers() {
        let bufs: Vec<Vec<u8>> = vec![b"hello".to_vec(), b"".to_vec(), vec![0u8, 1, 2, 255]];
        let packed = pack_buffers(bufs.clone());
        let unpacked = unpack_buffers(&packed).unwrap();
        assert_eq!(unpacked, bufs);
    }

    #[test]
    fn round_trips_empty_list() {
        let packed = pack_buffers(Vec::<Vec<u8>>::new());
        assert!(packed.is_empty());
        assert_eq!(unpack_buffers(&packed).unwrap(), Vec::<Bytes>::new());
    }

    #[test]
    fn rejects_truncated_frame() {
        let err = unpack_buffers(b"10\nshort").unwrap_err();
        assert!(matches!(err, CodecError::FramingError(_)));
    }

    #[test]
    fn rejects_missing_newline() {
        let err = unpack_buffers(b"abc").unwrap_err();
        assert!(matches!(err, CodecError::FramingError(_)));
    }
}
