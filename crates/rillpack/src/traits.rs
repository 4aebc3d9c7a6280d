//! Typed entry points onto the `Encoder` and `Decoder`.
//!
//! Message types implement `Pack` and `Unpack` by hand; the impls here cover
//! the scalars and containers those messages are built from.

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::Result;

/// A value that can write itself into an `Encoder` as exactly one item.
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// A value that can read itself back from a `Decoder`.
pub trait Unpack: Sized {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self>;
}

impl Pack for bool {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.bool(*self) }
}

impl Unpack for bool {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.bool() }
}

impl Pack for u32 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.u32(*self) }
}

impl Unpack for u32 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.u32() }
}

impl Pack for u64 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.u64(*self) }
}

impl Unpack for u64 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.u64() }
}

impl Pack for i64 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.s64(*self) }
}

impl Unpack for i64 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.s64() }
}

impl Pack for () {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.unit() }
}

impl Unpack for () {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.unit() }
}

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Unpack for String {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { Ok(dec.str()?.to_owned()) }
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.list_begin()?;
        for item in self {
            item.pack(enc)?;
        }
        enc.list_end()
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { self.as_slice().pack(enc) }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut iter = dec.list()?;
        let mut out = Vec::new();
        while let Some(mut item) = iter.next()? {
            out.push(T::unpack(&mut item)?);
        }
        Ok(out)
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Some(v) => {
                enc.option_some_begin()?;
                v.pack(enc)?;
                enc.option_some_end()
            }
            None => enc.option_none(),
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        match dec.option()? {
            Some(mut inner) => Ok(Some(T::unpack(&mut inner)?)),
            None => Ok(None),
        }
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { (**self).pack(enc) }
}

/// Unwraps a field collected while walking a map.
pub fn required<T>(value: Option<T>, name: &'static str) -> Result<T> {
    value.ok_or(Error::MissingField(name))
}
