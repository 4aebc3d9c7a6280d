//! Wire encoding of the data model.
//!
//! Every struct travels as a map of named fields so either side can add
//! fields without breaking the other; unknown fields are skipped.

use rillpack::Decoder;
use rillpack::Encoder;
use rillpack::Error;
use rillpack::Pack;
use rillpack::Result;
use rillpack::Unpack;
use rillpack::required;

use crate::model::ComputationMetadata;
use crate::model::Endpoint;
use crate::model::Record;
use crate::model::StreamGrouping;
use crate::model::StreamMetadata;
use crate::model::Transaction;

impl Pack for Record {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.field("key", &BlobRef(&self.key))?;
        enc.field("data", &BlobRef(&self.data))?;
        enc.field("stream", &self.stream)?;
        enc.map_end()
    }
}

impl Unpack for Record {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut key = None;
        let mut data = None;
        let mut stream = None;
        while let Some((name, mut val)) = map.next()? {
            match name {
                "key" => key = Some(val.bytes()?.to_vec()),
                "data" => data = Some(val.bytes()?.to_vec()),
                "stream" => stream = Some(String::unpack(&mut val)?),
                _ => val.skip()?,
            }
        }
        Ok(Record {
            key: required(key, "key")?,
            data: required(data, "data")?,
            stream: required(stream, "stream")?,
        })
    }
}

/// One `set_timer` entry.
struct Timer<'a> {
    key: &'a str,
    time: i64,
}

impl Pack for Timer<'_> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.field("key", self.key)?;
        enc.field("time", &self.time)?;
        enc.map_end()
    }
}

impl Pack for Transaction {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        let timers: Vec<Timer<'_>> = self
            .timers
            .iter()
            .map(|(key, time)| Timer { key, time: *time })
            .collect();

        enc.map_begin()?;
        enc.field("records", &self.records)?;
        enc.field("timers", &timers)?;
        enc.map_end()
    }
}

impl Unpack for Transaction {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut tx = Transaction::new();
        let mut map = dec.map()?;
        while let Some((name, mut val)) = map.next()? {
            match name {
                "records" => tx.records = Vec::unpack(&mut val)?,
                "timers" => {
                    let mut list = val.list()?;
                    while let Some(mut item) = list.next()? {
                        let (key, time) = unpack_timer(&mut item)?;
                        tx.timers.insert(key, time);
                    }
                }
                _ => val.skip()?,
            }
        }
        Ok(tx)
    }
}

fn unpack_timer(dec: &mut Decoder<'_>) -> Result<(String, i64)> {
    let mut map = dec.map()?;
    let mut key = None;
    let mut time = None;
    while let Some((name, mut val)) = map.next()? {
        match name {
            "key" => key = Some(String::unpack(&mut val)?),
            "time" => time = Some(val.s64()?),
            _ => val.skip()?,
        }
    }
    Ok((required(key, "key")?, required(time, "time")?))
}

impl Pack for StreamGrouping {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.unit_variant(self.as_tag())
    }
}

impl Unpack for StreamGrouping {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let tag = dec.unit_variant()?;
        StreamGrouping::from_tag(tag).ok_or_else(|| Error::UnknownVariant(tag.to_owned()))
    }
}

impl Pack for StreamMetadata {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.field("name", &self.name)?;
        enc.field("grouping", &self.grouping)?;
        enc.map_end()
    }
}

impl Unpack for StreamMetadata {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut name = None;
        let mut grouping = None;
        while let Some((field, mut val)) = map.next()? {
            match field {
                "name" => name = Some(String::unpack(&mut val)?),
                "grouping" => grouping = Some(StreamGrouping::unpack(&mut val)?),
                _ => val.skip()?,
            }
        }
        Ok(StreamMetadata {
            name: required(name, "name")?,
            grouping: grouping.unwrap_or_default(),
        })
    }
}

impl Pack for Endpoint {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.field("ip", &self.ip)?;
        enc.field("port", &u32::from(self.port))?;
        enc.map_end()
    }
}

impl Unpack for Endpoint {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut ip = None;
        let mut port = None;
        while let Some((field, mut val)) = map.next()? {
            match field {
                "ip" => ip = Some(String::unpack(&mut val)?),
                "port" => port = Some(val.u32()?),
                _ => val.skip()?,
            }
        }
        let port = u16::try_from(required(port, "port")?).map_err(|_| Error::OutOfRange("port"))?;
        Ok(Endpoint { ip: required(ip, "ip")?, port })
    }
}

impl Pack for ComputationMetadata {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.field("name", &self.name)?;
        enc.field("istreams", &self.istreams)?;
        enc.field("ostreams", &self.ostreams)?;
        enc.field("endpoint", &self.endpoint)?;
        enc.map_end()
    }
}

impl Unpack for ComputationMetadata {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut name = None;
        let mut istreams = Vec::new();
        let mut ostreams = Vec::new();
        let mut endpoint = None;
        while let Some((field, mut val)) = map.next()? {
            match field {
                "name" => name = Some(String::unpack(&mut val)?),
                "istreams" => istreams = Vec::unpack(&mut val)?,
                "ostreams" => ostreams = Vec::unpack(&mut val)?,
                "endpoint" => endpoint = Option::unpack(&mut val)?,
                _ => val.skip()?,
            }
        }
        Ok(ComputationMetadata {
            name: required(name, "name")?,
            istreams,
            ostreams,
            endpoint,
        })
    }
}

/// An opaque byte value, written with the `bytes` tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob(pub Vec<u8>);

/// A borrowed `Blob`, for encoding without a copy.
pub struct BlobRef<'a>(pub &'a [u8]);

impl Pack for Blob {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.bytes(&self.0) }
}

impl Pack for BlobRef<'_> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.bytes(self.0) }
}

impl Unpack for Blob {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { Ok(Blob(dec.bytes()?.to_vec())) }
}
