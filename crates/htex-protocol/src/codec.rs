use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::framing::{pack_buffers, unpack_buffers};

const HEADER_LEN: usize = 8;
const BINCODE_HEADER: &[u8; HEADER_LEN] = b"bincd000";
const JSON_HEADER: &[u8; HEADER_LEN] = b"json0000";
const FNREF_HEADER: &[u8; HEADER_LEN] = b"fnref000";

/// Default cap on a single serialized frame, matching `BUFFER_THRESHOLD`.
pub const DEFAULT_BUFFER_THRESHOLD: usize = 1024 * 1024;

fn with_header(header: &[u8; HEADER_LEN], body: Vec<u8>) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_slice(header);
    out.put_slice(&body);
    out.freeze()
}

fn split_header(frame: &[u8]) -> Result<(&[u8; HEADER_LEN], &[u8]), CodecError> {
    if frame.len() < HEADER_LEN {
        return Err(CodecError::DeserializationError(format!(
            "frame of {} bytes is shorter than the {HEADER_LEN}-byte method header",
            frame.len()
        )));
    }
    let (header, body) = frame.split_at(HEADER_LEN);
    Ok((header.try_into().expect("split_at(HEADER_LEN) guarantees length"), body))
}

/// Data serialization methods tried in order. `Bincode` is tried first for
/// compactness; it cannot round-trip a [`serde_json::Value`] (bincode has no
/// `deserialize_any`, and `Value`'s `Deserialize` impl requires it), so the
/// self-check below always falls through to `Json` for the values this codec
/// actually carries. Both are kept — and kept in this order — because the
/// fallback is what exercises the "try methods in order until one succeeds"
/// behavior rather than merely asserting it.
const DATA_METHODS: &[DataMethod] = &[DataMethod::Bincode, DataMethod::Json];

#[derive(Clone, Copy)]
enum DataMethod {
    Bincode,
    Json,
}

impl DataMethod {
    fn header(self) -> &'static [u8; HEADER_LEN] {
        match self {
            DataMethod::Bincode => BINCODE_HEADER,
            DataMethod::Json => JSON_HEADER,
        }
    }

    fn encode(self, value: &serde_json::Value) -> Option<Vec<u8>> {
        match self {
            DataMethod::Bincode => bincode::serialize(value).ok(),
            DataMethod::Json => serde_json::to_vec(value).ok(),
        }
    }

    fn decode(self, body: &[u8]) -> Option<serde_json::Value> {
        match self {
            DataMethod::Bincode => bincode::deserialize(body).ok(),
            DataMethod::Json => serde_json::from_slice(body).ok(),
        }
    }

    fn from_header(header: &[u8; HEADER_LEN]) -> Option<Self> {
        if header == BINCODE_HEADER {
            Some(DataMethod::Bincode)
        } else if header == JSON_HEADER {
            Some(DataMethod::Json)
        } else {
            None
        }
    }
}

/// Packs and unpacks the opaque callable/argument payload a `Task` carries,
/// and serializes/deserializes individual values (task results, exceptions).
///
/// `func` is a registered function *name*, not a closure: see the
/// `FunctionTable` in `htex-worker` for how a name is turned back into a
/// runnable. Rust has no runtime equivalent of a pickled closure, so the
/// "opaque callable" half of the original protocol is represented here as
/// plain data (a string) using the same data-method registry as everything
/// else.
#[derive(Debug, Clone)]
pub struct Codec {
    buffer_threshold: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
        }
    }
}

impl Codec {
    pub fn new(buffer_threshold: usize) -> Self {
        Self { buffer_threshold }
    }

    fn check_threshold(&self, size: usize) -> Result<(), CodecError> {
        if size > self.buffer_threshold {
            return Err(CodecError::PayloadTooLarge {
                size,
                limit: self.buffer_threshold,
            });
        }
        Ok(())
    }

    /// Serializes a data value, self-checking each method (encode, then
    /// decode, then compare) before accepting it.
    pub fn serialize(&self, value: &serde_json::Value) -> Result<Bytes, CodecError> {
        for method in DATA_METHODS {
            let Some(body) = method.encode(value) else {
                continue;
            };
            match method.decode(&body) {
                Some(roundtrip) if &roundtrip == value => {
                    self.check_threshold(HEADER_LEN + body.len())?;
                    return Ok(with_header(method.header(), body));
                }
                _ => continue,
            }
        }
        Err(CodecError::SerializationFailed)
    }

    pub fn deserialize(&self, frame: &[u8]) -> Result<serde_json::Value, CodecError> {
        let (header, body) = split_header(frame)?;
        let method = DataMethod::from_header(header).ok_or_else(|| {
            CodecError::DeserializationError(format!("unrecognized method header {header:?}"))
        })?;
        method
            .decode(body)
            .ok_or_else(|| CodecError::DeserializationError("method-specific decode failed".into()))
    }

    fn serialize_callable(&self, func: &str) -> Result<Bytes, CodecError> {
        let body = bincode::serialize(func).map_err(|_| CodecError::SerializationFailed)?;
        self.check_threshold(HEADER_LEN + body.len())?;
        Ok(with_header(FNREF_HEADER, body))
    }

    fn deserialize_callable(&self, frame: &[u8]) -> Result<String, CodecError> {
        let (header, body) = split_header(frame)?;
        if header != FNREF_HEADER {
            return Err(CodecError::DeserializationError(format!(
                "unrecognized callable method header {header:?}"
            )));
        }
        bincode::deserialize(body)
            .map_err(|e| CodecError::DeserializationError(format!("callable name decode failed: {e}")))
    }

    /// Packs `(func, args, kwargs)` into the opaque `Task.payload`.
    pub fn pack_apply(
        &self,
        func: &str,
        args: &serde_json::Value,
        kwargs: &serde_json::Value,
    ) -> Result<Bytes, CodecError> {
        let frames = [
            self.serialize_callable(func)?,
            self.serialize(args)?,
            self.serialize(kwargs)?,
        ];
        Ok(pack_buffers(frames))
    }

    /// Reverses [`Self::pack_apply`]. Fails with [`CodecError::FramingError`]
    /// unless exactly three frames are present.
    pub fn unpack_apply(
        &self,
        payload: &[u8],
    ) -> Result<(String, serde_json::Value, serde_json::Value), CodecError> {
        let frames = unpack_buffers(payload)?;
        let [func, args, kwargs]: [Bytes; 3] = frames.try_into().map_err(|frames: Vec<Bytes>| {
            CodecError::FramingError(format!("expected exactly 3 frames, got {}", frames.len()))
        })?;
        Ok((
            self.deserialize_callable(&func)?,
            self.deserialize(&args)?,
            self.deserialize(&kwargs)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_pack_apply() {
        let codec = Codec::default();
        let args = json!([1, 2, 3]);
        let kwargs = json!({"scale": 2});
        let packed = codec.pack_apply("double", &args, &kwargs).unwrap();
        let (func, got_args, got_kwargs) = codec.unpack_apply(&packed).unwrap();
        assert_eq!(func, "double");
        assert_eq!(got_args, args);
        assert_eq!(got_kwargs, kwargs);
    }

    #[test]
    fn falls_back_from_bincode_to_json_for_values() {
        let codec = Codec::default();
        let value = json!({"nested": {"a": [true, null, 1.5]}});
        let framed = codec.serialize(&value).unwrap();
        assert_eq!(&framed[..HEADER_LEN], JSON_HEADER);
        assert_eq!(codec.deserialize(&framed).unwrap(), value);
    }

    #[test]
    fn unpack_apply_requires_exactly_three_frames() {
        let codec = Codec::default();
        let packed = pack_buffers(["a", "b"]);
        let err = codec.unpack_apply(&packed).unwrap_err();
        assert!(matches!(err, CodecError::FramingError(_)));
    }

    #[test]
    fn rejects_oversized_payload() {
        let codec = Codec::new(8);
        let value = json!("this value is definitely longer than eight bytes");
        let err = codec.serialize(&value).unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge { .. }));
    }

    #[test]
    fn deserialize_rejects_unknown_header() {
        let codec = Codec::default();
        let mut frame = b"zzzzzzzz".to_vec();
        frame.extend_from_slice(b"whatever");
        let err = codec.deserialize(&frame).unwrap_err();
        assert!(matches!(err, CodecError::DeserializationError(_)));
    }
}
