//! Narrow deserializer for the archive's self-describing index serialization.
//!
//! The index is stored as a tagged binary object graph in the pickle wire
//! format. Only a restricted subset of the protocol ever appears in real
//! archives: mappings, sequences (lists and tuples), non-negative integers
//! and byte/text strings, plus the memo and framing plumbing that binary
//! picklers emit around them. Anything outside that subset is treated as a
//! malformed index rather than silently skipped.

use std::collections::HashMap;

use renarc_common::BinaryReader;

use crate::{Error, Result};

/// A value in the decoded object graph.
///
/// Tuples and lists collapse into [`Value::List`]; text and byte strings
/// collapse into [`Value::Bytes`]. The index decoder does not care about the
/// distinction in either case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A non-negative integer.
    Int(u64),
    /// A byte string or text string.
    Bytes(Vec<u8>),
    /// A list or tuple.
    List(Vec<Value>),
    /// A mapping, in insertion order. Duplicate keys are kept as-is; the
    /// index builder applies last-write-wins.
    Dict(Vec<(Value, Value)>),
}

/// Wire opcodes. Names follow the protocol's own nomenclature.
mod op {
    pub const PROTO: u8 = 0x80;
    pub const FRAME: u8 = 0x95;
    pub const STOP: u8 = b'.';
    pub const MARK: u8 = b'(';

    pub const EMPTY_DICT: u8 = b'}';
    pub const DICT: u8 = b'd';
    pub const SETITEM: u8 = b's';
    pub const SETITEMS: u8 = b'u';

    pub const EMPTY_LIST: u8 = b']';
    pub const LIST: u8 = b'l';
    pub const APPEND: u8 = b'a';
    pub const APPENDS: u8 = b'e';

    pub const EMPTY_TUPLE: u8 = b')';
    pub const TUPLE: u8 = b't';
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;

    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    pub const SHORT_BINSTRING: u8 = b'U';
    pub const BINSTRING: u8 = b'T';
    pub const BINUNICODE: u8 = b'X';
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const BINBYTES8: u8 = 0x8e;

    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const MEMOIZE: u8 = 0x94;
}

/// Deserialize a tagged object graph from `data`.
///
/// Returns the single value left on the stack when STOP is reached.
pub fn parse(data: &[u8]) -> Result<Value> {
    Parser::new(data).run()
}

/// Stack slot: either a live value or the marker pushed by MARK.
enum Slot {
    Mark,
    Val(Value),
}

struct Parser<'a> {
    reader: BinaryReader<'a>,
    stack: Vec<Slot>,
    memo: HashMap<u32, Value>,
}

fn malformed(detail: impl Into<String>) -> Error {
    Error::MalformedIndex(detail.into())
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BinaryReader::new(data),
            stack: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value> {
        loop {
            let position = self.reader.position();
            let opcode = self
                .reader
                .read_u8()
                .map_err(|_| malformed("stream ended without STOP"))?;

            match opcode {
                op::PROTO => {
                    self.reader.read_u8()?;
                }
                op::FRAME => {
                    // Frame length is advisory; we parse the stream linearly.
                    self.reader.read_u64()?;
                }
                op::STOP => {
                    let value = self.pop()?;
                    return if self.stack.is_empty() {
                        Ok(value)
                    } else {
                        Err(malformed("values left on stack after STOP"))
                    };
                }
                op::MARK => self.stack.push(Slot::Mark),

                op::EMPTY_DICT => self.stack.push(Slot::Val(Value::Dict(Vec::new()))),
                op::EMPTY_LIST | op::EMPTY_TUPLE => {
                    self.stack.push(Slot::Val(Value::List(Vec::new())))
                }

                op::BININT => {
                    let value = self.reader.read_i32()?;
                    self.push_int(i64::from(value))?;
                }
                op::BININT1 => {
                    let value = self.reader.read_u8()?;
                    self.stack.push(Slot::Val(Value::Int(u64::from(value))));
                }
                op::BININT2 => {
                    let value = self.reader.read_u16()?;
                    self.stack.push(Slot::Val(Value::Int(u64::from(value))));
                }
                op::LONG1 => {
                    let count = self.reader.read_u8()? as usize;
                    let bytes = self.reader.read_bytes(count)?;
                    let value = decode_long(bytes)?;
                    self.stack.push(Slot::Val(Value::Int(value)));
                }
                op::LONG4 => {
                    let count = self.reader.read_u32()? as usize;
                    let bytes = self.reader.read_bytes(count)?;
                    let value = decode_long(bytes)?;
                    self.stack.push(Slot::Val(Value::Int(value)));
                }

                op::SHORT_BINSTRING | op::SHORT_BINBYTES | op::SHORT_BINUNICODE => {
                    let count = self.reader.read_u8()? as usize;
                    let bytes = self.reader.read_bytes(count)?.to_vec();
                    self.stack.push(Slot::Val(Value::Bytes(bytes)));
                }
                op::BINSTRING | op::BINUNICODE | op::BINBYTES => {
                    let count = self.reader.read_u32()? as usize;
                    let bytes = self.reader.read_bytes(count)?.to_vec();
                    self.stack.push(Slot::Val(Value::Bytes(bytes)));
                }
                op::BINBYTES8 => {
                    let count = self.reader.read_u64()? as usize;
                    let bytes = self.reader.read_bytes(count)?.to_vec();
                    self.stack.push(Slot::Val(Value::Bytes(bytes)));
                }

                op::TUPLE1 => {
                    let a = self.pop()?;
                    self.stack.push(Slot::Val(Value::List(vec![a])));
                }
                op::TUPLE2 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Slot::Val(Value::List(vec![a, b])));
                }
                op::TUPLE3 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Slot::Val(Value::List(vec![a, b, c])));
                }
                op::TUPLE | op::LIST => {
                    let items = self.pop_to_mark()?;
                    self.stack.push(Slot::Val(Value::List(items)));
                }
                op::DICT => {
                    let items = self.pop_to_mark()?;
                    let pairs = into_pairs(items)?;
                    self.stack.push(Slot::Val(Value::Dict(pairs)));
                }

                op::APPEND => {
                    let item = self.pop()?;
                    self.top_list()?.push(item);
                }
                op::APPENDS => {
                    let items = self.pop_to_mark()?;
                    self.top_list()?.extend(items);
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.top_dict()?.push((key, value));
                }
                op::SETITEMS => {
                    let items = self.pop_to_mark()?;
                    let pairs = into_pairs(items)?;
                    self.top_dict()?.extend(pairs);
                }

                op::BINPUT => {
                    let id = u32::from(self.reader.read_u8()?);
                    self.memo_put(id)?;
                }
                op::LONG_BINPUT => {
                    let id = self.reader.read_u32()?;
                    self.memo_put(id)?;
                }
                op::MEMOIZE => {
                    let id = self.memo.len() as u32;
                    self.memo_put(id)?;
                }
                op::BINGET => {
                    let id = u32::from(self.reader.read_u8()?);
                    self.memo_get(id)?;
                }
                op::LONG_BINGET => {
                    let id = self.reader.read_u32()?;
                    self.memo_get(id)?;
                }

                other => {
                    return Err(malformed(format!(
                        "unsupported opcode {other:#04x} at offset {position}"
                    )))
                }
            }
        }
    }

    fn push_int(&mut self, value: i64) -> Result<()> {
        if value < 0 {
            return Err(malformed(format!("negative integer {value} in index")));
        }
        self.stack.push(Slot::Val(Value::Int(value as u64)));
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        match self.stack.pop() {
            Some(Slot::Val(value)) => Ok(value),
            Some(Slot::Mark) => Err(malformed("unexpected mark on stack")),
            None => Err(malformed("stack underflow")),
        }
    }

    /// Pop values down to (and including) the nearest mark, in push order.
    fn pop_to_mark(&mut self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            match self.stack.pop() {
                Some(Slot::Mark) => {
                    items.reverse();
                    return Ok(items);
                }
                Some(Slot::Val(value)) => items.push(value),
                None => return Err(malformed("no mark on stack")),
            }
        }
    }

    fn top_list(&mut self) -> Result<&mut Vec<Value>> {
        match self.stack.last_mut() {
            Some(Slot::Val(Value::List(items))) => Ok(items),
            _ => Err(malformed("append target is not a sequence")),
        }
    }

    fn top_dict(&mut self) -> Result<&mut Vec<(Value, Value)>> {
        match self.stack.last_mut() {
            Some(Slot::Val(Value::Dict(pairs))) => Ok(pairs),
            _ => Err(malformed("setitem target is not a mapping")),
        }
    }

    fn memo_put(&mut self, id: u32) -> Result<()> {
        match self.stack.last() {
            Some(Slot::Val(value)) => {
                self.memo.insert(id, value.clone());
                Ok(())
            }
            _ => Err(malformed("memo put with no value on stack")),
        }
    }

    fn memo_get(&mut self, id: u32) -> Result<()> {
        let value = self
            .memo
            .get(&id)
            .cloned()
            .ok_or_else(|| malformed(format!("memo get of unknown slot {id}")))?;
        self.stack.push(Slot::Val(value));
        Ok(())
    }
}

fn into_pairs(items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        return Err(malformed("odd number of mapping items"));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Decode a little-endian two's-complement integer (LONG1/LONG4 payload).
///
/// The index never stores negative numbers or numbers beyond 64 bits, so
/// both are rejected as malformed.
fn decode_long(bytes: &[u8]) -> Result<u64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.last().is_some_and(|&b| b & 0x80 != 0) {
        return Err(malformed("negative integer in index"));
    }
    if bytes.len() > 8 && bytes[8..].iter().any(|&b| b != 0) {
        return Err(malformed("integer in index exceeds 64 bits"));
    }

    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().take(8).enumerate() {
        value |= u64::from(byte) << (8 * i);
    }
    Ok(value)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &[u8]) -> Value {
        Value::Bytes(s.to_vec())
    }

    #[test]
    fn test_parse_integers() {
        // PROTO 2, BININT1 7, STOP
        assert_eq!(
            parse(&[op::PROTO, 2, op::BININT1, 7, op::STOP]).unwrap(),
            Value::Int(7)
        );
        // BININT2 0x1234
        assert_eq!(
            parse(&[op::BININT2, 0x34, 0x12, op::STOP]).unwrap(),
            Value::Int(0x1234)
        );
        // BININT 0x0100_0000
        assert_eq!(
            parse(&[op::BININT, 0x00, 0x00, 0x00, 0x01, op::STOP]).unwrap(),
            Value::Int(0x0100_0000)
        );
        // LONG1, 5 bytes: 0x01_0000_0000
        assert_eq!(
            parse(&[op::LONG1, 5, 0, 0, 0, 0, 1, op::STOP]).unwrap(),
            Value::Int(0x01_0000_0000)
        );
        // LONG1 empty payload is zero
        assert_eq!(parse(&[op::LONG1, 0, op::STOP]).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_negative_integers_rejected() {
        let negative = (-1i32).to_le_bytes();
        let stream = [
            op::BININT,
            negative[0],
            negative[1],
            negative[2],
            negative[3],
            op::STOP,
        ];
        assert!(matches!(
            parse(&stream).unwrap_err(),
            Error::MalformedIndex(_)
        ));
    }

    #[test]
    fn test_parse_strings() {
        let stream = [op::SHORT_BINSTRING, 3, b'a', b'b', b'c', op::STOP];
        assert_eq!(parse(&stream).unwrap(), bytes(b"abc"));

        let mut stream = vec![op::BINUNICODE];
        stream.extend_from_slice(&3u32.to_le_bytes());
        stream.extend_from_slice(b"xyz");
        stream.push(op::STOP);
        assert_eq!(parse(&stream).unwrap(), bytes(b"xyz"));
    }

    #[test]
    fn test_parse_list_and_tuples() {
        // [] with MARK/APPENDS: [1, 2]
        let stream = [
            op::EMPTY_LIST,
            op::MARK,
            op::BININT1,
            1,
            op::BININT1,
            2,
            op::APPENDS,
            op::STOP,
        ];
        assert_eq!(
            parse(&stream).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );

        // TUPLE2 collapses into a list value
        let stream = [op::BININT1, 1, op::BININT1, 2, op::TUPLE2, op::STOP];
        assert_eq!(
            parse(&stream).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );

        // TUPLE3 with a string prefix element
        let stream = [
            op::BININT1,
            1,
            op::BININT1,
            2,
            op::SHORT_BINSTRING,
            1,
            b'x',
            op::TUPLE3,
            op::STOP,
        ];
        assert_eq!(
            parse(&stream).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), bytes(b"x")])
        );

        // MARK ... TUPLE
        let stream = [op::MARK, op::BININT1, 9, op::TUPLE, op::STOP];
        assert_eq!(parse(&stream).unwrap(), Value::List(vec![Value::Int(9)]));
    }

    #[test]
    fn test_parse_dict() {
        // {b"k": 1} via SETITEM
        let stream = [
            op::EMPTY_DICT,
            op::SHORT_BINSTRING,
            1,
            b'k',
            op::BININT1,
            1,
            op::SETITEM,
            op::STOP,
        ];
        assert_eq!(
            parse(&stream).unwrap(),
            Value::Dict(vec![(bytes(b"k"), Value::Int(1))])
        );

        // MARK-batched SETITEMS
        let stream = [
            op::EMPTY_DICT,
            op::MARK,
            op::SHORT_BINSTRING,
            1,
            b'a',
            op::BININT1,
            1,
            op::SHORT_BINSTRING,
            1,
            b'b',
            op::BININT1,
            2,
            op::SETITEMS,
            op::STOP,
        ];
        assert_eq!(
            parse(&stream).unwrap(),
            Value::Dict(vec![
                (bytes(b"a"), Value::Int(1)),
                (bytes(b"b"), Value::Int(2)),
            ])
        );
    }

    #[test]
    fn test_memo_roundtrip() {
        // Put a string in memo slot 0, fetch it back into a tuple.
        let stream = [
            op::SHORT_BINSTRING,
            1,
            b'm',
            op::BINPUT,
            0,
            op::BINGET,
            0,
            op::TUPLE2,
            op::STOP,
        ];
        assert_eq!(
            parse(&stream).unwrap(),
            Value::List(vec![bytes(b"m"), bytes(b"m")])
        );
    }

    #[test]
    fn test_unknown_opcode_is_malformed() {
        assert!(matches!(
            parse(&[0xFF, op::STOP]).unwrap_err(),
            Error::MalformedIndex(_)
        ));
    }

    #[test]
    fn test_truncated_stream_is_malformed() {
        assert!(matches!(
            parse(&[op::SHORT_BINSTRING, 10, b'a']).unwrap_err(),
            Error::MalformedIndex(_)
        ));
        assert!(matches!(
            parse(&[op::BININT1, 1]).unwrap_err(),
            Error::MalformedIndex(_)
        ));
    }

    #[test]
    fn test_encoder_roundtrip() {
        let graph = Value::Dict(vec![
            (
                bytes(b"script.rpy"),
                Value::List(vec![Value::List(vec![
                    Value::Int(100),
                    Value::Int(0x1_0000_0000),
                    bytes(b"RP"),
                ])]),
            ),
            (
                bytes(b"images/bg.png"),
                Value::List(vec![Value::List(vec![Value::Int(64), Value::Int(128)])]),
            ),
        ]);

        let encoded = testenc::encode(&graph);
        assert_eq!(parse(&encoded).unwrap(), graph);
    }
}
