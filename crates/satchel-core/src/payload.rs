//! OP_RETURN data payloads.
//!
//! A payload is an ordered list of segments. Each segment is explicitly
//! tagged as UTF-8 text or hex bytes and becomes exactly one push in the
//! data output script, in order. The JSON form is
//! `[{"type": "string", "value": "hello"}, {"type": "hex", "value": "00ff"}]`.

use bitcoin::opcodes::all::{OP_PUSHBYTES_0, OP_RETURN};
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Script, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::constants::STANDARD_DATA_CARRIER_SIZE;
use crate::error::PayloadError;

/// One push of a data output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DataSegment {
    /// Pushed as its UTF-8 bytes.
    #[serde(rename = "string")]
    Text(String),
    /// Hex digits, pushed decoded.
    #[serde(rename = "hex")]
    Hex(String),
}

impl DataSegment {
    pub fn text(s: impl Into<String>) -> Self {
        DataSegment::Text(s.into())
    }

    pub fn bytes(data: &[u8]) -> Self {
        DataSegment::Hex(hex::encode(data))
    }

    /// The bytes this segment pushes. `index` only labels errors.
    pub fn to_bytes(&self, index: usize) -> Result<Vec<u8>, PayloadError> {
        match self {
            DataSegment::Text(s) => Ok(s.as_bytes().to_vec()),
            DataSegment::Hex(h) => hex::decode(h.trim()).map_err(|e| PayloadError::InvalidHex {
                index,
                reason: e.to_string(),
            }),
        }
    }
}

/// How the data output script opens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMarker {
    /// `OP_RETURN <pushes>`.
    #[default]
    OpReturn,
    /// `OP_FALSE OP_RETURN <pushes>`, provably unspendable on chains where a
    /// bare `OP_RETURN` no longer terminates script evaluation.
    SafeOpReturn,
}

/// Ordered data segments for a zero-value output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpReturnPayload {
    segments: Vec<DataSegment>,
}

impl OpReturnPayload {
    pub fn new(segments: Vec<DataSegment>) -> Self {
        Self { segments }
    }

    pub fn push(&mut self, segment: DataSegment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    pub fn segments(&self) -> &[DataSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Decoded bytes of every segment, in order.
    pub fn to_pushes(&self) -> Result<Vec<Vec<u8>>, PayloadError> {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, s)| s.to_bytes(i))
            .collect()
    }

    /// Total bytes pushed, excluding opcodes.
    pub fn data_len(&self) -> Result<usize, PayloadError> {
        Ok(self.to_pushes()?.iter().map(Vec::len).sum())
    }

    /// Whether relays with default policy would refuse this payload.
    pub fn exceeds_standard_size(&self) -> Result<bool, PayloadError> {
        Ok(self.data_len()? > STANDARD_DATA_CARRIER_SIZE)
    }

    /// Build the output script: the marker, then one push per segment.
    pub fn to_script(&self, marker: DataMarker) -> Result<ScriptBuf, PayloadError> {
        let mut builder = Builder::new();
        if marker == DataMarker::SafeOpReturn {
            builder = builder.push_opcode(OP_PUSHBYTES_0);
        }
        builder = builder.push_opcode(OP_RETURN);
        for (index, bytes) in self.to_pushes()?.into_iter().enumerate() {
            let len = bytes.len();
            let push = PushBytesBuf::try_from(bytes)
                .map_err(|_| PayloadError::PushTooLarge { index, len })?;
            builder = builder.push_slice(push);
        }
        Ok(builder.into_script())
    }
}

impl From<Vec<DataSegment>> for OpReturnPayload {
    fn from(segments: Vec<DataSegment>) -> Self {
        Self::new(segments)
    }
}

/// Split a data output script back into its marker and pushes.
pub fn decode_data_script(script: &Script) -> Result<(DataMarker, Vec<Vec<u8>>), PayloadError> {
    let mut instructions = script.instructions();
    let marker = match instructions.next() {
        Some(Ok(Instruction::Op(op))) if op == OP_RETURN => DataMarker::OpReturn,
        Some(Ok(Instruction::PushBytes(p))) if p.is_empty() => match instructions.next() {
            Some(Ok(Instruction::Op(op))) if op == OP_RETURN => DataMarker::SafeOpReturn,
            _ => return Err(PayloadError::NotDataScript),
        },
        _ => return Err(PayloadError::NotDataScript),
    };

    let mut pushes = Vec::new();
    for instruction in instructions {
        match instruction.map_err(|e| PayloadError::Malformed(e.to_string()))? {
            Instruction::PushBytes(p) => pushes.push(p.as_bytes().to_vec()),
            Instruction::Op(op) => {
                return Err(PayloadError::Malformed(format!("unexpected opcode {op}")));
            }
        }
    }
    Ok((marker, pushes))
}
