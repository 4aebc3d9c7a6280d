//! # Rillpack
//!
//! A small, bounded TLV codec for the messages exchanged between a
//! computation and its proxy.
//!
//! Every value starts with a one-byte tag. Fixed-width scalars follow it
//! directly; strings, bytes and containers follow it with a `u32` byte
//! length and then the body. Integers are little-endian. Because each
//! container states its length, readers can step over fields they do not
//! understand.

mod traits;

pub use traits::Pack;
pub use traits::Unpack;
pub use traits::required;


/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// A string payload was not UTF-8.
    InvalidUtf8,
    /// Closing a scope that does not match the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when none is open.
    ScopeUnderflow,
    /// `into_bytes` was called with a scope still open.
    ScopeStillOpen,
    /// Ran off the end of the input.
    UnexpectedEnd,
    /// A body longer than `u32::MAX` bytes.
    BlobTooLarge(usize),
    /// Wrote more than one item into an Option/Result/Variant.
    TooManyItems(Scope),
    /// Closed an Option/Result/Variant without its payload.
    EmptyAdt(Scope),
    /// Wrote a non-Variant directly into a Map.
    InvalidMapEntry,
    /// A map was missing a required field.
    MissingField(&'static str),
    /// A variant name is not one the reader knows.
    UnknownVariant(String),
    /// A decoded integer does not fit the field it is read into.
    OutOfRange(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::TooManyItems(s) => write!(f, "too many items in scope {:?}; expected exactly 1", s),
            Error::EmptyAdt(s) => write!(f, "empty scope {:?}; expected exactly 1 item", s),
            Error::BlobTooLarge(n) => write!(f, "blob of {} bytes exceeds u32 length", n),
            Error::MissingField(name) => write!(f, "missing field '{}'", name),
            Error::UnknownVariant(name) => write!(f, "unknown variant '{}'", name),
            Error::OutOfRange(name) => write!(f, "value of '{}' is out of range", name),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Leading byte of every encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    U32 = 0x05,
    U64 = 0x06,
    S64 = 0x0A,

    Unit = 0x0E,
    OptionNone = 0x0F,

    // length-prefixed bytes
    String = 0x10,
    Bytes = 0x11,

    // length-prefixed bodies holding further values
    List = 0x20,
    Map = 0x21,

    // single-payload wrappers
    OptionSome = 0x30,
    ResultOk = 0x31,
    ResultErr = 0x32,
    Variant = 0x33,
}

impl Tag {
    /// Returns the Tag for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::BoolTrue),
            0x02 => Some(Tag::BoolFalse),
            0x05 => Some(Tag::U32),
            0x06 => Some(Tag::U64),
            0x0A => Some(Tag::S64),
            0x0E => Some(Tag::Unit),
            0x0F => Some(Tag::OptionNone),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x30 => Some(Tag::OptionSome),
            0x31 => Some(Tag::ResultOk),
            0x32 => Some(Tag::ResultErr),
            0x33 => Some(Tag::Variant),
            _ => None,
        }
    }

    /// Width of the fixed payload that follows the tag, for scalars.
    fn scalar_width(self) -> Option<usize> {
        match self {
            Tag::BoolTrue | Tag::BoolFalse | Tag::Unit | Tag::OptionNone => Some(0),
            Tag::U32 => Some(4),
            Tag::U64 | Tag::S64 => Some(8),
            _ => None,
        }
    }
}

/// Kind of scope open on the `Encoder` stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Zero or more items.
    List,
    /// Key-Value container; only `Tag::Variant` items.
    Map,
    /// Exactly one item.
    Option,
    /// Exactly one item.
    Result,
    /// Exactly one item (the payload) after the name.
    Variant,
}

impl Scope {
    fn is_strict(self) -> bool {
        matches!(self, Scope::Option | Scope::Result | Scope::Variant)
    }
}

struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// A state-machine driven encoder.
///
/// Keeps a stack of open scopes and back-patches container lengths when a
/// scope is closed. Every write is validated against the innermost scope:
///
/// 1.  **Map**: only variants (key/value pairs) may be written.
/// 2.  **Option, Result, Variant**: exactly one item must be written.
/// 3.  All scopes must be closed before the bytes can be taken.
pub struct Encoder {
    buf: Vec<u8>,
    root_count: usize,
    stack: Vec<Frame>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            root_count: 0,
            stack: Vec::with_capacity(8),
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if any scope is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.stack.is_empty() {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    /// Number of items written at the root.
    pub fn root_items(&self) -> usize {
        self.root_count
    }

    fn check_write(&self, tag: Tag) -> Result<()> {
        let Some(frame) = self.stack.last() else {
            return Ok(());
        };
        match frame.scope {
            Scope::List => Ok(()),
            Scope::Map if tag != Tag::Variant => Err(Error::InvalidMapEntry),
            Scope::Map => Ok(()),
            scope if frame.count >= 1 => Err(Error::TooManyItems(scope)),
            _ => Ok(()),
        }
    }

    fn on_item_written(&mut self) {
        match self.stack.last_mut() {
            Some(frame) => frame.count += 1,
            None => self.root_count += 1,
        }
    }

    fn write_scalar(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(data);
        self.on_item_written();
        Ok(())
    }

    fn write_blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.on_item_written();
        Ok(())
    }

    fn begin_scope(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end_scope(&mut self, expected: Scope) -> Result<()> {
        let frame = self.stack.pop().ok_or(Error::ScopeUnderflow)?;
        if frame.scope != expected {
            let actual = frame.scope;
            self.stack.push(frame);
            return Err(Error::ScopeMismatch { expected, actual });
        }
        if frame.scope.is_strict() && frame.count == 0 {
            let scope = frame.scope;
            self.stack.push(frame);
            return Err(Error::EmptyAdt(scope));
        }

        let body_len = self.buf.len() - frame.start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[frame.start - 4..frame.start].copy_from_slice(&len.to_le_bytes());

        self.on_item_written();
        Ok(())
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.write_scalar(if v { Tag::BoolTrue } else { Tag::BoolFalse }, &[])
    }

    pub fn u32(&mut self, v: u32) -> Result<()> { self.write_scalar(Tag::U32, &v.to_le_bytes()) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.write_scalar(Tag::U64, &v.to_le_bytes()) }
    pub fn s64(&mut self, v: i64) -> Result<()> { self.write_scalar(Tag::S64, &v.to_le_bytes()) }

    pub fn unit(&mut self) -> Result<()> { self.write_scalar(Tag::Unit, &[]) }
    pub fn option_none(&mut self) -> Result<()> { self.write_scalar(Tag::OptionNone, &[]) }

    pub fn str(&mut self, v: &str) -> Result<()> { self.write_blob(Tag::String, v.as_bytes()) }
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.write_blob(Tag::Bytes, v) }

    pub fn list_begin(&mut self) -> Result<()> { self.begin_scope(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end_scope(Scope::List) }

    /// Begins a Map. Only `variant_begin()` is allowed as a direct child.
    pub fn map_begin(&mut self) -> Result<()> { self.begin_scope(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end_scope(Scope::Map) }

    pub fn option_some_begin(&mut self) -> Result<()> { self.begin_scope(Tag::OptionSome, Scope::Option) }
    pub fn option_some_end(&mut self) -> Result<()> { self.end_scope(Scope::Option) }

    pub fn result_ok_begin(&mut self) -> Result<()> { self.begin_scope(Tag::ResultOk, Scope::Result) }
    pub fn result_ok_end(&mut self) -> Result<()> { self.end_scope(Scope::Result) }

    pub fn result_err_begin(&mut self) -> Result<()> { self.begin_scope(Tag::ResultErr, Scope::Result) }
    pub fn result_err_end(&mut self) -> Result<()> { self.end_scope(Scope::Result) }

    /// Begins a Variant (named payload) and writes its name.
    ///
    /// Exactly one payload item must follow before `variant_end()`.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.begin_scope(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        if let Some(frame) = self.stack.last_mut() {
            frame.count = 0;
        }
        Ok(())
    }
    pub fn variant_end(&mut self) -> Result<()> { self.end_scope(Scope::Variant) }

    /// Writes `name -> value` into the enclosing map.
    pub fn field<T: Pack + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        self.variant_begin(name)?;
        value.pack(self)?;
        self.variant_end()
    }

    /// Writes a variant whose payload is unit.
    pub fn unit_variant(&mut self, name: &str) -> Result<()> {
        self.variant_begin(name)?;
        self.unit()?;
        self.variant_end()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads values out of a borrowed buffer without copying.
///
/// Container reads return new `Decoder`s restricted to the container body.
/// All reads return `Error::UnexpectedEnd` when the buffer runs out.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Unread input.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.read_array()?) as usize)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let tag = self.peek_tag()?;
        if tag != expected {
            return Err(Error::InvalidTag(tag as u8));
        }
        self.read_bytes(1)?;
        Ok(())
    }

    /// Steps over one whole value, children included.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.read_bytes(1)?;
        match tag.scalar_width() {
            Some(width) => { self.read_bytes(width)?; },
            None => {
                let len = self.read_len()?;
                self.read_bytes(len)?;
            }
        }
        Ok(())
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => { self.read_bytes(1)?; Ok(true) },
            Tag::BoolFalse => { self.read_bytes(1)?; Ok(false) },
            tag => Err(Error::InvalidTag(tag as u8)),
        }
    }

    pub fn u32(&mut self) -> Result<u32> { self.expect_tag(Tag::U32)?; Ok(u32::from_le_bytes(self.read_array()?)) }
    pub fn u64(&mut self) -> Result<u64> { self.expect_tag(Tag::U64)?; Ok(u64::from_le_bytes(self.read_array()?)) }
    pub fn s64(&mut self) -> Result<i64> { self.expect_tag(Tag::S64)?; Ok(i64::from_le_bytes(self.read_array()?)) }

    pub fn unit(&mut self) -> Result<()> { self.expect_tag(Tag::Unit) }
    pub fn option_none(&mut self) -> Result<()> { self.expect_tag(Tag::OptionNone) }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect_tag(Tag::String)?;
        let len = self.read_len()?;
        std::str::from_utf8(self.read_bytes(len)?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect_tag(Tag::Bytes)?;
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    fn enter_container(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect_tag(expected)?;
        let len = self.read_len()?;
        Ok(Decoder::new(self.read_bytes(len)?))
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter_container(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter_container(Tag::Map)? })
    }

    pub fn option(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::OptionNone => { self.read_bytes(1)?; Ok(None) },
            Tag::OptionSome => Ok(Some(self.enter_container(Tag::OptionSome)?)),
            tag => Err(Error::InvalidTag(tag as u8)),
        }
    }

    /// The payload decoder, on the side the tag says.
    pub fn result(&mut self) -> Result<std::result::Result<Decoder<'a>, Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::ResultOk => Ok(Ok(self.enter_container(Tag::ResultOk)?)),
            Tag::ResultErr => Ok(Err(self.enter_container(Tag::ResultErr)?)),
            tag => Err(Error::InvalidTag(tag as u8)),
        }
    }

    /// Splits a variant into its name and payload.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter_container(Tag::Variant)?;
        let name = inner.str()?;
        Ok((name, inner))
    }

    /// Decodes a variant with a unit payload and returns its name.
    pub fn unit_variant(&mut self) -> Result<&'a str> {
        let (name, mut body) = self.variant()?;
        body.unit()?;
        Ok(name)
    }
}

/// Iterator over the items of a List.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a Decoder for the next item, `Ok(None)` at the end of the list.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut lookahead = self.dec.clone();
        lookahead.skip()?;
        let len = self.dec.remaining() - lookahead.remaining();
        Ok(Some(Decoder::new(self.dec.read_bytes(len)?)))
    }
}

/// Iterator over the key/value pairs of a Map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(Key, ValueDecoder)` for the next entry, or `None`.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let tag = self.dec.peek_tag()?;
        if tag != Tag::Variant {
            return Err(Error::InvalidTag(tag as u8));
        }
        Ok(Some(self.dec.variant()?))
    }
}
