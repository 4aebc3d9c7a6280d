//! # Frames
//!
//! A frame is a `Call` or `Reply` variant wrapping a header map. Readers
//! skip header keys they do not know, so peers may add fields freely.
//! Malformed input is always an `Err`.

use rillpack::Decoder;
use rillpack::Encoder;
use rillpack::ListIter;
use rillpack::Pack;
use rillpack::Tag;
use rillpack::Unpack;

use crate::error::Error;
use crate::error::FailureReason;
use crate::error::Result;

const CALL: &str = "Call";
const REPLY: &str = "Reply";

/// A request: `method(args...)` tagged with the caller's `seq`.
pub struct CallEncoder<'a> {
    pub seq: u64,
    pub method: &'a str,
    pub args: &'a [&'a dyn Pack],
}

impl<'a> CallEncoder<'a> {
    pub fn new(seq: u64, method: &'a str, args: &'a [&'a dyn Pack]) -> Self {
        Self { seq, method, args }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin(CALL)?;
        enc.map_begin()?;

        enc.field("seq", &self.seq)?;
        enc.field("method", self.method)?;

        enc.variant_begin("args")?;
        encode_list(enc, self.args)?;
        enc.variant_end()?;

        enc.map_end()?;
        enc.variant_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }
}

/// A borrowed view of a received request.
pub struct CallDecoder<'a> {
    pub seq: u64,
    pub method: &'a str,
    /// Positional arguments, in call order.
    pub args: Values<'a>,
}

impl<'a> CallDecoder<'a> {
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut seq = None;
        let mut method = None;
        let mut args = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "method" => method = Some(val.str()?),
                "args" => args = Some(Values::new(val.list()?)),
                _ => val.skip()?,
            }
        }

        Ok(Self {
            seq: seq.ok_or_else(|| missing("seq"))?,
            method: method.ok_or_else(|| missing("method"))?,
            args: args.ok_or_else(|| missing("args"))?,
        })
    }
}

/// A successful answer carrying the callee's results.
pub struct ReplyOkEncoder<'a> {
    pub seq: u64,
    pub results: &'a [&'a dyn Pack],
}

impl<'a> ReplyOkEncoder<'a> {
    pub fn new(seq: u64, results: &'a [&'a dyn Pack]) -> Self {
        Self { seq, results }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin(REPLY)?;
        enc.result_ok_begin()?;
        enc.map_begin()?;

        enc.field("seq", &self.seq)?;

        enc.variant_begin("results")?;
        encode_list(enc, self.results)?;
        enc.variant_end()?;

        enc.map_end()?;
        enc.result_ok_end()?;
        enc.variant_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }
}

/// A refusal carrying the reason the call was not served.
pub struct ReplyErrEncoder {
    pub seq: u64,
    pub reason: FailureReason,
}

impl ReplyErrEncoder {
    pub fn new(seq: u64, reason: FailureReason) -> Self {
        Self { seq, reason }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin(REPLY)?;
        enc.result_err_begin()?;
        enc.map_begin()?;

        enc.field("seq", &self.seq)?;

        enc.variant_begin("reason")?;
        enc.variant_begin(self.reason.as_tag())?;
        match self.reason.detail() {
            Some(detail) => enc.str(detail)?,
            None => enc.unit()?,
        }
        enc.variant_end()?;
        enc.variant_end()?;

        enc.map_end()?;
        enc.result_err_end()?;
        enc.variant_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }
}

/// A borrowed view of a received answer.
pub struct ReplyDecoder<'a> {
    pub seq: u64,
    /// - `Ok(Values)`: success, the returned values in order.
    /// - `Err(FailureReason)`: the callee refused the call.
    pub status: std::result::Result<Values<'a>, FailureReason>,
}

impl<'a> ReplyDecoder<'a> {
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        match dec.result()? {
            Ok(body) => Self::answered(body),
            Err(body) => Self::refused(body),
        }
    }

    fn answered(mut body: Decoder<'a>) -> Result<Self> {
        let mut map = body.map()?;
        let mut seq = None;
        let mut results = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "results" => results = Some(Values::new(val.list()?)),
                _ => val.skip()?,
            }
        }

        Ok(Self {
            seq: seq.ok_or_else(|| missing("seq"))?,
            status: Ok(results.ok_or_else(|| missing("results"))?),
        })
    }

    fn refused(mut body: Decoder<'a>) -> Result<Self> {
        let mut map = body.map()?;
        let mut seq = None;
        let mut reason = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "reason" => {
                    let (tag, mut body) = val.variant()?;
                    let detail = match body.peek_tag()? {
                        Tag::String => Some(body.str()?.to_owned()),
                        _ => {
                            body.unit()?;
                            None
                        }
                    };
                    reason = Some(FailureReason::from_tag(tag, detail)?);
                }
                _ => val.skip()?,
            }
        }

        Ok(Self {
            seq: seq.ok_or_else(|| missing("seq"))?,
            status: Err(reason.ok_or_else(|| missing("reason"))?),
        })
    }
}

/// Any frame, told apart by its outer variant tag.
pub enum RpcFrame<'a> {
    Call(CallDecoder<'a>),
    Reply(ReplyDecoder<'a>),
}

impl<'a> RpcFrame<'a> {
    pub fn decode(dec: &mut Decoder<'a>) -> Result<Self> {
        let (kind, body) = dec.variant()?;
        Ok(match kind {
            CALL => Self::Call(CallDecoder::decode(body)?),
            REPLY => Self::Reply(ReplyDecoder::decode(body)?),
            other => return Err(unknown_frame(other)),
        })
    }

    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        Self::decode(&mut dec)
    }
}

/// Positional values of a Call (arguments) or Reply (results).
///
/// Values are read front to back with `next`; `finish` checks that the
/// sender did not supply more than the reader consumed.
#[derive(Debug)]
pub struct Values<'a> {
    items: ListIter<'a>,
    read: usize,
}

impl<'a> Values<'a> {
    fn new(items: ListIter<'a>) -> Self {
        Self { items, read: 0 }
    }

    /// Reads the next value as `T`.
    pub fn next<T: Unpack>(&mut self) -> Result<T> {
        let mut item = self.items.next()?.ok_or_else(|| {
            Error::ProtocolViolation(format!("Expected more than {} values", self.read))
        })?;
        self.read += 1;
        Ok(T::unpack(&mut item)?)
    }

    /// Asserts that every value has been consumed.
    pub fn finish(mut self) -> Result<()> {
        if self.items.next()?.is_some() {
            return Err(Error::ProtocolViolation(format!("More than {} values", self.read)));
        }
        Ok(())
    }
}

/// Recovers the `seq` header of a frame whose body may not decode, so a
/// refusal can still be addressed.
pub fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let (kind, mut body) = dec.variant()?;
    let mut header = match kind {
        CALL => body,
        REPLY => match body.result()? {
            Ok(inner) | Err(inner) => inner,
        },
        other => return Err(unknown_frame(other)),
    };

    let mut fields = header.map()?;
    while let Some((key, mut val)) = fields.next()? {
        match key {
            "seq" => return Ok(val.u64()?),
            _ => val.skip()?,
        }
    }
    Err(missing("seq"))
}

fn missing(field: &str) -> Error {
    Error::ProtocolViolation(format!("frame header has no `{}`", field))
}

fn unknown_frame(kind: &str) -> Error {
    Error::UnknownVariant(format!("frame kind `{}`", kind))
}

fn encode_list(enc: &mut Encoder, items: &[&dyn Pack]) -> Result<()> {
    enc.list_begin()?;
    for item in items {
        item.pack(enc)?;
    }
    enc.list_end()?;
    Ok(())
}
