//! The `river` object-graph codec.
//!
//! A codec stream starts with a two-byte header (magic, stream version) and
//! carries a sequence of objects, interleaved with raw bytes and packed
//! integers where the protocol calls for them. Well-known composite classes
//! resolve through a per-version class table and well-known singletons
//! through a per-version object table; both tables are out-of-band
//! agreements with the peer that shorten common references.
//!
//! Strings, byte arrays, containers, and composites are cached in written
//! order. Writing an equal object again emits a back-reference to the cache
//! index instead of re-serializing the payload; the decoder mirrors the
//! cache so references resolve by index. Encoder and decoder instances are
//! single-use.

use bytes::Bytes;

use crate::error::Error;
use crate::locator::{Locator, MethodLocator};
use crate::value::{Affinity, RemoteThrowable, Value};
use crate::wire::{self, ByteCursor};

const STREAM_MAGIC: u8 = 0x72;

const STREAM_VERSION_LEGACY: u8 = 2;
const STREAM_VERSION_CURRENT: u8 = 4;

const CLASS_LOCATOR: &str = "ejb.locator";
const CLASS_METHOD_LOCATOR: &str = "ejb.method-locator";
const CLASS_THROWABLE: &str = "ejb.throwable";
const CLASS_AFFINITY_NODE: &str = "affinity.node";
const CLASS_AFFINITY_CLUSTER: &str = "affinity.cluster";
const CLASS_AFFINITY_URI: &str = "affinity.uri";

const V1_CLASS_TABLE: &[&str] = &[
    CLASS_LOCATOR,
    CLASS_THROWABLE,
    CLASS_AFFINITY_NODE,
    CLASS_AFFINITY_CLUSTER,
    CLASS_AFFINITY_URI,
];

const V3_CLASS_TABLE: &[&str] = &[
    CLASS_LOCATOR,
    CLASS_THROWABLE,
    CLASS_AFFINITY_NODE,
    CLASS_AFFINITY_CLUSTER,
    CLASS_AFFINITY_URI,
    CLASS_METHOD_LOCATOR,
];

mod tag {
    pub const NULL: u8 = 0x00;
    pub const BOOL_FALSE: u8 = 0x01;
    pub const BOOL_TRUE: u8 = 0x02;
    pub const INT: u8 = 0x03;
    pub const FLOAT: u8 = 0x04;
    pub const STRING: u8 = 0x05;
    pub const BYTES: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x07;
    pub const MAP: u8 = 0x08;
    pub const CLASS_IDX: u8 = 0x09;
    pub const CLASS_NAME: u8 = 0x0A;
    pub const OBJECT_IDX: u8 = 0x0B;
    pub const BACKREF: u8 = 0x0C;
}

/// Per-version codec configuration.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    protocol_version: u8,
    stream_version: u8,
    class_table: &'static [&'static str],
    object_table: Vec<Value>,
}

impl CodecConfig {
    /// Select tables and stream version for a negotiated protocol version.
    pub fn for_version(protocol_version: u8) -> Self {
        if protocol_version >= 3 {
            CodecConfig {
                protocol_version,
                stream_version: STREAM_VERSION_CURRENT,
                class_table: V3_CLASS_TABLE,
                object_table: vec![
                    Value::Affinity(Affinity::None),
                    Value::String(String::new()),
                ],
            }
        } else {
            CodecConfig {
                protocol_version,
                stream_version: STREAM_VERSION_LEGACY,
                class_table: V1_CLASS_TABLE,
                object_table: vec![Value::Affinity(Affinity::None)],
            }
        }
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    pub fn stream_version(&self) -> u8 {
        self.stream_version
    }

    /// Start an encoder writing into `sink`.
    pub fn marshaller<'c, 'o>(&'c self, sink: &'o mut Vec<u8>) -> Marshaller<'c, 'o> {
        sink.push(STREAM_MAGIC);
        sink.push(self.stream_version);
        Marshaller {
            config: self,
            out: sink,
            cache: Vec::new(),
        }
    }

    /// Start a decoder over `source`, validating the stream header.
    pub fn unmarshaller(&self, source: Bytes) -> Result<Unmarshaller<'_>, Error> {
        let mut cur = ByteCursor::new(source);
        let magic = cur.read_u8()?;
        if magic != STREAM_MAGIC {
            return Err(Error::protocol(format!(
                "codec: bad stream magic 0x{:02x}",
                magic
            )));
        }
        let version = cur.read_u8()?;
        if version != self.stream_version {
            return Err(Error::protocol(format!(
                "codec: stream version {} does not match configured {}",
                version, self.stream_version
            )));
        }
        Ok(Unmarshaller {
            config: self,
            cur,
            cache: Vec::new(),
        })
    }
}

/// Single-use object-graph encoder.
pub struct Marshaller<'c, 'o> {
    config: &'c CodecConfig,
    out: &'o mut Vec<u8>,
    cache: Vec<Value>,
}

impl Marshaller<'_, '_> {
    pub fn write_object(&mut self, value: &Value) -> Result<(), Error> {
        self.write_value(value)
    }

    /// Write a `u16`-prefixed modified-UTF-8 string, outside the object
    /// graph.
    pub fn write_utf(&mut self, s: &str) -> Result<(), Error> {
        wire::write_modified_utf8(self.out, s)
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.out.push(byte);
    }

    pub fn write_packed_uint(&mut self, value: u64) {
        wire::write_packed_uint(self.out, value);
    }

    pub fn finish(self) -> Result<(), Error> {
        Ok(())
    }

    fn write_value(&mut self, value: &Value) -> Result<(), Error> {
        match value {
            Value::Null => {
                self.out.push(tag::NULL);
                return Ok(());
            }
            Value::Bool(false) => {
                self.out.push(tag::BOOL_FALSE);
                return Ok(());
            }
            Value::Bool(true) => {
                self.out.push(tag::BOOL_TRUE);
                return Ok(());
            }
            Value::Int(v) => {
                self.out.push(tag::INT);
                wire::write_packed_uint(self.out, zigzag(*v));
                return Ok(());
            }
            Value::Float(v) => {
                self.out.push(tag::FLOAT);
                self.out.extend_from_slice(&v.to_bits().to_be_bytes());
                return Ok(());
            }
            _ => {}
        }

        if let Some(idx) = self.config.object_table.iter().position(|o| o == value) {
            self.out.push(tag::OBJECT_IDX);
            wire::write_packed_uint(self.out, idx as u64);
            return Ok(());
        }

        if let Some(idx) = self.cache.iter().position(|c| c == value) {
            self.out.push(tag::BACKREF);
            wire::write_packed_uint(self.out, idx as u64);
            return Ok(());
        }

        // Cache index is assigned before any of the object's bytes so the
        // decoder can mirror the ordering.
        self.cache.push(value.clone());

        match value {
            Value::String(s) => {
                self.out.push(tag::STRING);
                self.write_str(s);
            }
            Value::Bytes(b) => {
                self.out.push(tag::BYTES);
                wire::write_packed_uint(self.out, b.len() as u64);
                self.out.extend_from_slice(b);
            }
            Value::Sequence(items) => {
                self.out.push(tag::SEQUENCE);
                wire::write_packed_uint(self.out, items.len() as u64);
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Map(entries) => {
                self.out.push(tag::MAP);
                wire::write_packed_uint(self.out, entries.len() as u64);
                for (key, val) in entries {
                    self.write_value(key)?;
                    self.write_value(val)?;
                }
            }
            Value::Locator(loc) => {
                self.write_class(CLASS_LOCATOR);
                self.write_str(&loc.app_name);
                self.write_str(&loc.module_name);
                self.write_str(&loc.bean_name);
                self.write_str(&loc.distinct_name);
            }
            Value::MethodLocator(m) => {
                self.write_class(CLASS_METHOD_LOCATOR);
                self.write_str(&m.method_name);
                wire::write_packed_uint(self.out, m.param_types.len() as u64);
                for ty in &m.param_types {
                    self.write_str(ty);
                }
            }
            Value::Affinity(affinity) => match affinity {
                Affinity::Node(name) => {
                    self.write_class(CLASS_AFFINITY_NODE);
                    self.write_str(name);
                }
                Affinity::Cluster(name) => {
                    self.write_class(CLASS_AFFINITY_CLUSTER);
                    self.write_str(name);
                }
                Affinity::Uri(uri) => {
                    self.write_class(CLASS_AFFINITY_URI);
                    self.write_str(uri);
                }
                // Affinity::None is always in the object table.
                Affinity::None => {
                    return Err(Error::protocol("codec: affinity none missing from object table"));
                }
            },
            Value::Throwable(t) => {
                self.write_class(CLASS_THROWABLE);
                self.write_str(&t.class_name);
                match &t.message {
                    Some(msg) => {
                        self.out.push(1);
                        self.write_str(msg);
                    }
                    None => self.out.push(0),
                }
                match &t.cause {
                    Some(cause) => {
                        self.out.push(1);
                        self.write_value(&Value::Throwable(cause.clone()))?;
                    }
                    None => self.out.push(0),
                }
            }
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => unreachable!(),
        }

        Ok(())
    }

    fn write_class(&mut self, name: &str) {
        match self.config.class_table.iter().position(|&n| n == name) {
            Some(idx) => {
                self.out.push(tag::CLASS_IDX);
                wire::write_packed_uint(self.out, idx as u64);
            }
            None => {
                self.out.push(tag::CLASS_NAME);
                self.write_str(name);
            }
        }
    }

    fn write_str(&mut self, s: &str) {
        wire::write_packed_uint(self.out, s.len() as u64);
        self.out.extend_from_slice(s.as_bytes());
    }
}

/// Single-use object-graph decoder.
pub struct Unmarshaller<'c> {
    config: &'c CodecConfig,
    cur: ByteCursor,
    cache: Vec<Option<Value>>,
}

impl Unmarshaller<'_> {
    pub fn read_object(&mut self) -> Result<Value, Error> {
        self.read_value()
    }

    pub fn read_utf(&mut self) -> Result<String, Error> {
        wire::read_modified_utf8(&mut self.cur)
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        self.cur.read_u8()
    }

    pub fn read_packed_uint(&mut self) -> Result<u64, Error> {
        wire::read_packed_uint(&mut self.cur)
    }

    /// Bytes left in the stream.
    pub fn remaining(&self) -> usize {
        self.cur.remaining()
    }

    pub fn finish(self) -> Result<(), Error> {
        Ok(())
    }

    fn read_value(&mut self) -> Result<Value, Error> {
        let t = self.cur.read_u8()?;
        match t {
            tag::NULL => Ok(Value::Null),
            tag::BOOL_FALSE => Ok(Value::Bool(false)),
            tag::BOOL_TRUE => Ok(Value::Bool(true)),
            tag::INT => Ok(Value::Int(unzigzag(wire::read_packed_uint(&mut self.cur)?))),
            tag::FLOAT => {
                let bytes = self.cur.read_bytes(8)?;
                let mut bits = [0u8; 8];
                bits.copy_from_slice(&bytes);
                Ok(Value::Float(f64::from_bits(u64::from_be_bytes(bits))))
            }
            tag::OBJECT_IDX => {
                let idx = wire::read_packed_uint(&mut self.cur)? as usize;
                self.config
                    .object_table
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| {
                        Error::protocol(format!("codec: object table index {} out of range", idx))
                    })
            }
            tag::BACKREF => {
                let idx = wire::read_packed_uint(&mut self.cur)? as usize;
                match self.cache.get(idx) {
                    Some(Some(value)) => Ok(value.clone()),
                    _ => Err(Error::protocol(format!(
                        "codec: unresolved back-reference {}",
                        idx
                    ))),
                }
            }
            tag::STRING => {
                let slot = self.reserve();
                let value = Value::String(self.read_str()?);
                self.resolve(slot, &value);
                Ok(value)
            }
            tag::BYTES => {
                let slot = self.reserve();
                let len = wire::read_packed_uint(&mut self.cur)? as usize;
                let value = Value::Bytes(self.cur.read_bytes(len)?.to_vec());
                self.resolve(slot, &value);
                Ok(value)
            }
            tag::SEQUENCE => {
                let slot = self.reserve();
                let len = wire::read_packed_uint(&mut self.cur)? as usize;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                let value = Value::Sequence(items);
                self.resolve(slot, &value);
                Ok(value)
            }
            tag::MAP => {
                let slot = self.reserve();
                let len = wire::read_packed_uint(&mut self.cur)? as usize;
                let mut entries = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key = self.read_value()?;
                    let val = self.read_value()?;
                    entries.push((key, val));
                }
                let value = Value::Map(entries);
                self.resolve(slot, &value);
                Ok(value)
            }
            tag::CLASS_IDX => {
                let slot = self.reserve();
                let idx = wire::read_packed_uint(&mut self.cur)? as usize;
                let name = *self.config.class_table.get(idx).ok_or_else(|| {
                    Error::protocol(format!("codec: class table index {} out of range", idx))
                })?;
                let value = self.read_composite(name)?;
                self.resolve(slot, &value);
                Ok(value)
            }
            tag::CLASS_NAME => {
                let slot = self.reserve();
                let name = self.read_str()?;
                let value = self.read_composite(&name)?;
                self.resolve(slot, &value);
                Ok(value)
            }
            other => Err(Error::protocol(format!(
                "codec: unknown object tag 0x{:02x}",
                other
            ))),
        }
    }

    fn read_composite(&mut self, class_name: &str) -> Result<Value, Error> {
        match class_name {
            CLASS_LOCATOR => {
                let app_name = self.read_str()?;
                let module_name = self.read_str()?;
                let bean_name = self.read_str()?;
                let distinct_name = self.read_str()?;
                Ok(Value::Locator(Locator {
                    app_name,
                    module_name,
                    bean_name,
                    distinct_name,
                }))
            }
            CLASS_METHOD_LOCATOR => {
                let method_name = self.read_str()?;
                let count = wire::read_packed_uint(&mut self.cur)? as usize;
                let mut param_types = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    param_types.push(self.read_str()?);
                }
                Ok(Value::MethodLocator(MethodLocator {
                    method_name,
                    param_types,
                }))
            }
            CLASS_AFFINITY_NODE => Ok(Value::Affinity(Affinity::Node(self.read_str()?))),
            CLASS_AFFINITY_CLUSTER => Ok(Value::Affinity(Affinity::Cluster(self.read_str()?))),
            CLASS_AFFINITY_URI => Ok(Value::Affinity(Affinity::Uri(self.read_str()?))),
            CLASS_THROWABLE => {
                let class_name = self.read_str()?;
                let message = match self.cur.read_u8()? {
                    0 => None,
                    _ => Some(self.read_str()?),
                };
                let cause = match self.cur.read_u8()? {
                    0 => None,
                    _ => match self.read_value()? {
                        Value::Throwable(t) => Some(t),
                        other => {
                            return Err(Error::protocol(format!(
                                "codec: throwable cause is a {}",
                                other.kind()
                            )));
                        }
                    },
                };
                Ok(Value::Throwable(Box::new(RemoteThrowable {
                    class_name,
                    message,
                    cause,
                })))
            }
            other => Err(Error::protocol(format!("codec: unknown class \"{}\"", other))),
        }
    }

    fn reserve(&mut self) -> usize {
        self.cache.push(None);
        self.cache.len() - 1
    }

    fn resolve(&mut self, slot: usize, value: &Value) {
        self.cache[slot] = Some(value.clone());
    }

    fn read_str(&mut self) -> Result<String, Error> {
        let len = wire::read_packed_uint(&mut self.cur)? as usize;
        let bytes = self.cur.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::protocol("codec: string is not valid utf-8"))
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}
