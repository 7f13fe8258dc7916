//! Field model: leaf kinds and the field specifications generators yield
//!
//! A format generator describes each child with a [`FieldSpec`]. The tree
//! engine resolves its size (dynamic for strings), assigns its address and
//! turns it into a node. Leaves decode lazily through [`Leaf::decode`].

use std::fmt;

use binspect_core::charset::{escape_text, guess_bytes_charset, make_printable};
use binspect_core::text_handler::{self, human_duration};
use binspect_core::{config, Charset, DisplayFn, Endian, Error, Result, Value};
use binspect_stream::{InputStream, StreamTag};

use crate::tree::{FieldRef, FieldSetCursor};

/// Largest padding prefix checked for a bit pattern
const MAX_PADDING_CHECK_BITS: u64 = 128;

/// Largest padding prefix checked for a byte pattern
const MAX_PADDING_CHECK_BYTES: usize = 4096;

/// Enum lookup table: raw value to display name
pub type EnumTable = &'static [(u64, &'static str)];

/// How a string field stores its length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    /// Declared length
    Fixed,
    /// Terminated by a nul character
    C,
    /// Prefixed by an 8-bit length
    Pascal8,
    /// Prefixed by a 16-bit length
    Pascal16,
    /// Prefixed by a 32-bit length
    Pascal32,
    /// Terminated by `\n`
    UnixLine,
}

impl StringFormat {
    /// Size of the length prefix in bytes
    pub fn prefix_size(&self) -> usize {
        match self {
            StringFormat::Pascal8 => 1,
            StringFormat::Pascal16 => 2,
            StringFormat::Pascal32 => 4,
            _ => 0,
        }
    }
}

/// Flavour of a byte-array leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BytesKind {
    /// Opaque data
    Raw,
    /// Data displayed as a quoted string (signatures, tags)
    Text,
    /// Expected to be all zeros
    Null,
    /// Expected to repeat a pattern
    Padding(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    /// Seconds since 1970-01-01
    Unix32,
    /// Seconds since 1904-01-01
    Mac32,
    /// 100 ns units since 1601-01-01
    Win64,
    /// MS-DOS packed date and time
    Msdos32,
}

/// Kind of a leaf field
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    Bit,
    Bits,
    RawBits,
    NullBits,
    PaddingBits,
    Integer { signed: bool },
    Float,
    Bytes(BytesKind),
    String {
        format: StringFormat,
        charset: Option<Charset>,
        strip: Option<String>,
    },
    Character,
    Timestamp(TimestampKind),
    TimedeltaWin64,
    Enum { inner: Box<Leaf>, table: EnumTable },
}

impl Leaf {
    /// Type name shown by listings, e.g. `UInt16` or `CString`
    pub fn type_name(&self, size: u64) -> String {
        match self {
            Leaf::Bit => "Bit".to_string(),
            Leaf::Bits => "Bits".to_string(),
            Leaf::RawBits => "RawBits".to_string(),
            Leaf::NullBits => "NullBits".to_string(),
            Leaf::PaddingBits => "PaddingBits".to_string(),
            Leaf::Integer { signed: true } => format!("Int{}", size),
            Leaf::Integer { signed: false } => format!("UInt{}", size),
            Leaf::Float => format!("Float{}", size),
            Leaf::Bytes(BytesKind::Raw) => "RawBytes".to_string(),
            Leaf::Bytes(BytesKind::Text) => "Bytes".to_string(),
            Leaf::Bytes(BytesKind::Null) => "NullBytes".to_string(),
            Leaf::Bytes(BytesKind::Padding(_)) => "PaddingBytes".to_string(),
            Leaf::String { format, .. } => match format {
                StringFormat::Fixed => "String",
                StringFormat::C => "CString",
                StringFormat::Pascal8 => "PascalString8",
                StringFormat::Pascal16 => "PascalString16",
                StringFormat::Pascal32 => "PascalString32",
                StringFormat::UnixLine => "UnixLine",
            }
            .to_string(),
            Leaf::Character => "Character".to_string(),
            Leaf::Timestamp(kind) => match kind {
                TimestampKind::Unix32 => "TimestampUnix32",
                TimestampKind::Mac32 => "TimestampMac32",
                TimestampKind::Win64 => "TimestampWin64",
                TimestampKind::Msdos32 => "TimestampMSDOS32",
            }
            .to_string(),
            Leaf::TimedeltaWin64 => "TimedeltaWin64".to_string(),
            Leaf::Enum { inner, .. } => format!("Enum<{}>", inner.type_name(size)),
        }
    }

    /// `true` for text leaves (the default targets of grep)
    pub fn is_text(&self) -> bool {
        matches!(self, Leaf::String { .. } | Leaf::Character)
    }

    /// `true` for padding and null leaves, whose content is checked
    pub fn has_pattern(&self) -> bool {
        matches!(
            self,
            Leaf::NullBits | Leaf::PaddingBits | Leaf::Bytes(BytesKind::Null | BytesKind::Padding(_))
        )
    }

    /// Decode the value of a leaf of `size` bits at absolute address `address`
    pub fn decode(&self, stream: &dyn InputStream, address: u64, size: u64, endian: Endian) -> Result<Value> {
        match self {
            Leaf::Bit => Ok(Value::Bool(stream.read_bits(address, 1, endian)? != 0)),
            Leaf::Bits | Leaf::RawBits | Leaf::NullBits | Leaf::PaddingBits => {
                if size <= 64 {
                    Ok(Value::UInt(stream.read_bits(address, size as u32, endian)?))
                } else {
                    Ok(Value::Bytes(wide_bits(stream, address, size, endian)?))
                }
            }
            Leaf::Integer { signed } => {
                let raw = stream.read_bits(address, bit_width(size)?, endian)?;
                Ok(if *signed {
                    Value::Int(binspect_core::bits::sign_extend(raw, size as u32))
                } else {
                    Value::UInt(raw)
                })
            }
            Leaf::Float => {
                let raw = stream.read_bytes(address, (size / 8) as usize)?;
                let value = match size {
                    32 => f64::from(binspect_core::bits::float32(&raw, endian)?),
                    64 => binspect_core::bits::float64(&raw, endian)?,
                    80 => binspect_core::bits::float80(&raw, endian)?,
                    other => return Err(Error::internal(format!("no float of {} bits", other))),
                };
                Ok(Value::Float(value))
            }
            Leaf::Bytes(_) => Ok(Value::Bytes(stream.read_bytes(address, (size / 8) as usize)?)),
            Leaf::String { format, charset, strip } => {
                let raw = stream.read_bytes(address, (size / 8) as usize)?;
                let unit = charset.map_or(1, |c| c.unit_size());
                let content = match format {
                    StringFormat::Fixed => &raw[..],
                    StringFormat::C => &raw[..raw.len().saturating_sub(unit)],
                    StringFormat::UnixLine => &raw[..raw.len().saturating_sub(1)],
                    StringFormat::Pascal8 | StringFormat::Pascal16 | StringFormat::Pascal32 => {
                        &raw[format.prefix_size().min(raw.len())..]
                    }
                };
                let charset = charset
                    .or_else(|| stream.charset())
                    .unwrap_or_else(|| guess_bytes_charset(content, Charset::Iso8859_1));
                let text = charset.decode(content);
                Ok(Value::Text(match strip {
                    Some(chars) => text.trim_matches(|c| chars.contains(c)).to_string(),
                    None => text,
                }))
            }
            Leaf::Character => {
                let raw = stream.read_bytes(address, 1)?;
                Ok(Value::Text(Charset::Iso8859_1.decode(&raw)))
            }
            Leaf::Timestamp(kind) => {
                let raw = stream.read_bits(address, bit_width(size)?, endian)?;
                let datetime = match kind {
                    TimestampKind::Unix32 => text_handler::unix_to_datetime(raw as i64),
                    TimestampKind::Mac32 => text_handler::mac32_to_datetime(raw),
                    TimestampKind::Win64 if raw == 0 => return Ok(Value::UInt(0)),
                    TimestampKind::Win64 => text_handler::win64_to_datetime(raw),
                    TimestampKind::Msdos32 => text_handler::msdos_to_datetime(raw as u32),
                };
                // Invalid dates keep their raw value; the display explains
                Ok(datetime.map_or(Value::UInt(raw), Value::DateTime))
            }
            Leaf::TimedeltaWin64 => {
                let raw = stream.read_bits(address, bit_width(size)?, endian)?;
                Ok(Value::Duration(text_handler::win64_to_duration(raw)))
            }
            Leaf::Enum { inner, .. } => inner.decode(stream, address, size, endian),
        }
    }

    /// Short human rendering of a decoded value
    pub fn display(&self, value: &Value, size: u64, pattern_ok: bool) -> String {
        let config = config::get();
        match self {
            Leaf::NullBits | Leaf::Bytes(BytesKind::Null) if pattern_ok => "<null>".to_string(),
            Leaf::PaddingBits if pattern_ok => "<padding pattern=0>".to_string(),
            Leaf::Bytes(BytesKind::Padding(pattern)) if pattern_ok => format!(
                "<padding pattern={}>",
                escape_text(&Charset::Iso8859_1.decode(pattern), Some('\''))
            ),
            Leaf::Bytes(_) => match value.as_bytes() {
                Some(data) => quoted_bytes(data, Some(config.max_byte_length)),
                None => value.to_string(),
            },
            Leaf::String { .. } => match value.as_str() {
                Some(text) => {
                    let max = config.max_string_length;
                    if text.chars().count() > max {
                        let head: String = text.chars().take(max).collect();
                        escape_text(&format!("{}(...)", head), Some('"'))
                    } else {
                        escape_text(text, Some('"'))
                    }
                }
                None => value.to_string(),
            },
            Leaf::Character => escape_text(&value.to_string(), Some('\'')),
            Leaf::Timestamp(kind) => match kind {
                TimestampKind::Unix32 => text_handler::timestamp_unix(value, size),
                TimestampKind::Mac32 => text_handler::timestamp_mac32(value, size),
                TimestampKind::Win64 => text_handler::timestamp_win64(value, size),
                TimestampKind::Msdos32 => text_handler::timestamp_msdos(value, size),
            },
            Leaf::TimedeltaWin64 => match value {
                Value::Duration(delta) => human_duration(delta),
                other => other.to_string(),
            },
            Leaf::Enum { inner, table } => {
                let key = value.as_u64().or_else(|| value.as_i64().map(|v| v as u64));
                match key.and_then(|k| lookup(table, k)) {
                    Some(name) => name.to_string(),
                    None => inner.display(value, size, pattern_ok),
                }
            }
            _ => value.to_string(),
        }
    }

    /// Minimally interpreted rendering, for debugging
    pub fn raw_display(&self, value: &Value) -> String {
        match value {
            Value::Bytes(data) => quoted_bytes(data, None),
            Value::Text(text) => escape_text(text, Some('"')),
            other => other.to_string(),
        }
    }

    /// Check the content of a padding or null leaf
    ///
    /// Only a prefix is checked: 128 bits for bit leaves, 4096 bytes for
    /// byte leaves. Non-pattern leaves always pass.
    pub fn check_pattern(&self, stream: &dyn InputStream, address: u64, size: u64, endian: Endian) -> Result<bool> {
        match self {
            Leaf::NullBits | Leaf::PaddingBits => {
                let mut offset = 0;
                let end = size.min(MAX_PADDING_CHECK_BITS);
                while offset < end {
                    let count = (end - offset).min(64) as u32;
                    if stream.read_bits(address + offset, count, endian)? != 0 {
                        return Ok(false);
                    }
                    offset += u64::from(count);
                }
                Ok(true)
            }
            Leaf::Bytes(BytesKind::Null) => {
                let count = ((size / 8) as usize).min(MAX_PADDING_CHECK_BYTES);
                Ok(stream.read_bytes(address, count)?.iter().all(|&b| b == 0))
            }
            Leaf::Bytes(BytesKind::Padding(pattern)) if !pattern.is_empty() => {
                let count = ((size / 8) as usize).min(MAX_PADDING_CHECK_BYTES);
                let data = stream.read_bytes(address, count)?;
                Ok(data.iter().zip(pattern.iter().cycle()).all(|(a, b)| a == b))
            }
            _ => Ok(true),
        }
    }
}

/// Bytes of a bit field too wide for an integer
///
/// The bits of a trailing partial byte keep their place in the byte: high
/// bits for MSB-first streams, low bits for little endian. Others are zero.
fn wide_bits(stream: &dyn InputStream, address: u64, size: u64, endian: Endian) -> Result<Vec<u8>> {
    let whole = (size / 8) as usize;
    let rest = (size % 8) as u32;
    let mut bytes = stream.read_bytes(address, whole)?;
    if rest > 0 {
        let tail_address = address + whole as u64 * 8;
        bytes.push(match endian {
            Endian::Little => stream.read_bits(tail_address, rest, Endian::Little)? as u8,
            _ => (stream.read_bits(tail_address, rest, Endian::Big)? as u8) << (8 - rest),
        });
    }
    Ok(bytes)
}

fn bit_width(size: u64) -> Result<u32> {
    if size > u64::from(binspect_core::bits::MAX_BITS) {
        return Err(Error::internal(format!("integer field of {} bits", size)));
    }
    Ok(size as u32)
}

fn lookup(table: EnumTable, key: u64) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, name)| *name)
}

/// Quote bytes as printable text, truncating after `max` bytes
fn quoted_bytes(data: &[u8], max: Option<usize>) -> String {
    match max {
        Some(max) if data.len() > max => format!(
            "\"{}(...)\"",
            make_printable(&data[..max], Charset::Ascii, false)
        ),
        _ => format!("\"{}\"", make_printable(data, Charset::Ascii, false)),
    }
}

/// Producer of the children of a field set
///
/// The engine calls [`FieldGenerator::next_field`] each time it needs one
/// more child; the generator keeps its own position between calls. An
/// `Err` truncates the set at its current size.
pub trait FieldGenerator {
    /// Next child, or `None` when the set is complete
    fn next_field(&mut self, set: &FieldSetCursor<'_>) -> Result<Option<FieldSpec>>;

    /// Description of the complete set
    fn describe(&self, _set: FieldRef<'_>) -> Result<Option<String>> {
        Ok(None)
    }

    /// Value computed from the complete set
    fn value(&self, _set: FieldRef<'_>) -> Result<Option<Value>> {
        Ok(None)
    }
}

impl<F> FieldGenerator for F
where
    F: FnMut(&FieldSetCursor<'_>) -> Result<Option<FieldSpec>>,
{
    fn next_field(&mut self, set: &FieldSetCursor<'_>) -> Result<Option<FieldSpec>> {
        self(set)
    }
}

/// Yields `count` items built by a factory
struct VectorGenerator {
    remaining: u64,
    item_name: String,
    make: Box<dyn Fn(String) -> FieldSpec>,
}

impl FieldGenerator for VectorGenerator {
    fn next_field(&mut self, _set: &FieldSetCursor<'_>) -> Result<Option<FieldSpec>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some((self.make)(format!("{}[]", self.item_name))))
    }
}

/// How the size of a leaf is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SizeSpec {
    Fixed(u64),
    /// Up to and including the terminator
    Terminated,
    /// Length prefix plus content
    Prefixed,
}

pub(crate) enum SpecBody {
    Leaf {
        leaf: Leaf,
        size: SizeSpec,
    },
    Set {
        generator: Box<dyn FieldGenerator>,
        size: Option<u64>,
        seekable: bool,
    },
}

/// Description of one child, yielded by a [`FieldGenerator`]
pub struct FieldSpec {
    pub(crate) name: String,
    pub(crate) body: SpecBody,
    pub(crate) description: Option<String>,
    pub(crate) display: Option<DisplayFn>,
    pub(crate) address: Option<u64>,
    pub(crate) endian: Option<Endian>,
    pub(crate) stream_tags: Vec<StreamTag>,
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.body {
            SpecBody::Leaf { leaf, .. } => format!("{:?}", leaf),
            SpecBody::Set { .. } => "FieldSet".to_string(),
        };
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("address", &self.address)
            .finish()
    }
}

impl FieldSpec {
    fn leaf(name: impl Into<String>, leaf: Leaf, size: SizeSpec) -> Self {
        Self {
            name: name.into(),
            body: SpecBody::Leaf { leaf, size },
            description: None,
            display: None,
            address: None,
            endian: None,
            stream_tags: Vec::new(),
        }
    }

    fn integer(name: impl Into<String>, bits: u64, signed: bool) -> Self {
        Self::leaf(name, Leaf::Integer { signed }, SizeSpec::Fixed(bits))
    }

    pub fn uint8(name: impl Into<String>) -> Self {
        Self::integer(name, 8, false)
    }

    pub fn uint16(name: impl Into<String>) -> Self {
        Self::integer(name, 16, false)
    }

    pub fn uint24(name: impl Into<String>) -> Self {
        Self::integer(name, 24, false)
    }

    pub fn uint32(name: impl Into<String>) -> Self {
        Self::integer(name, 32, false)
    }

    pub fn uint64(name: impl Into<String>) -> Self {
        Self::integer(name, 64, false)
    }

    pub fn int8(name: impl Into<String>) -> Self {
        Self::integer(name, 8, true)
    }

    pub fn int16(name: impl Into<String>) -> Self {
        Self::integer(name, 16, true)
    }

    pub fn int24(name: impl Into<String>) -> Self {
        Self::integer(name, 24, true)
    }

    pub fn int32(name: impl Into<String>) -> Self {
        Self::integer(name, 32, true)
    }

    pub fn int64(name: impl Into<String>) -> Self {
        Self::integer(name, 64, true)
    }

    /// One bit, decoded as a boolean
    pub fn bit(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Bit, SizeSpec::Fixed(1))
    }

    /// Unsigned integer of `nbits` bits (at most 64)
    pub fn bits(name: impl Into<String>, nbits: u64) -> Self {
        Self::leaf(name, Leaf::Bits, SizeSpec::Fixed(nbits))
    }

    pub fn raw_bits(name: impl Into<String>, nbits: u64) -> Self {
        Self::leaf(name, Leaf::RawBits, SizeSpec::Fixed(nbits))
    }

    pub fn null_bits(name: impl Into<String>, nbits: u64) -> Self {
        Self::leaf(name, Leaf::NullBits, SizeSpec::Fixed(nbits))
    }

    pub fn padding_bits(name: impl Into<String>, nbits: u64) -> Self {
        Self::leaf(name, Leaf::PaddingBits, SizeSpec::Fixed(nbits))
    }

    pub fn float32(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Float, SizeSpec::Fixed(32))
    }

    pub fn float64(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Float, SizeSpec::Fixed(64))
    }

    /// x87 extended precision float
    pub fn float80(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Float, SizeSpec::Fixed(80))
    }

    /// Bytes displayed as a quoted string
    pub fn bytes(name: impl Into<String>, nbytes: u64) -> Self {
        Self::leaf(name, Leaf::Bytes(BytesKind::Text), SizeSpec::Fixed(nbytes * 8))
    }

    pub fn raw_bytes(name: impl Into<String>, nbytes: u64) -> Self {
        Self::leaf(name, Leaf::Bytes(BytesKind::Raw), SizeSpec::Fixed(nbytes * 8))
    }

    pub fn null_bytes(name: impl Into<String>, nbytes: u64) -> Self {
        Self::leaf(name, Leaf::Bytes(BytesKind::Null), SizeSpec::Fixed(nbytes * 8))
    }

    pub fn padding_bytes(name: impl Into<String>, nbytes: u64, pattern: &[u8]) -> Self {
        Self::leaf(
            name,
            Leaf::Bytes(BytesKind::Padding(pattern.to_vec())),
            SizeSpec::Fixed(nbytes * 8),
        )
    }

    fn text(name: impl Into<String>, format: StringFormat, size: SizeSpec) -> Self {
        Self::leaf(
            name,
            Leaf::String {
                format,
                charset: None,
                strip: None,
            },
            size,
        )
    }

    /// String of a declared length in bytes
    pub fn string(name: impl Into<String>, nbytes: u64) -> Self {
        Self::text(name, StringFormat::Fixed, SizeSpec::Fixed(nbytes * 8))
    }

    /// Nul-terminated string
    pub fn cstring(name: impl Into<String>) -> Self {
        Self::text(name, StringFormat::C, SizeSpec::Terminated)
    }

    pub fn pascal8(name: impl Into<String>) -> Self {
        Self::text(name, StringFormat::Pascal8, SizeSpec::Prefixed)
    }

    pub fn pascal16(name: impl Into<String>) -> Self {
        Self::text(name, StringFormat::Pascal16, SizeSpec::Prefixed)
    }

    pub fn pascal32(name: impl Into<String>) -> Self {
        Self::text(name, StringFormat::Pascal32, SizeSpec::Prefixed)
    }

    /// Line terminated by `\n`
    pub fn unix_line(name: impl Into<String>) -> Self {
        Self::text(name, StringFormat::UnixLine, SizeSpec::Terminated)
    }

    /// Single 8-bit character
    pub fn character(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Character, SizeSpec::Fixed(8))
    }

    pub fn timestamp_unix32(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Timestamp(TimestampKind::Unix32), SizeSpec::Fixed(32))
    }

    pub fn timestamp_mac32(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Timestamp(TimestampKind::Mac32), SizeSpec::Fixed(32))
    }

    pub fn timestamp_win64(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Timestamp(TimestampKind::Win64), SizeSpec::Fixed(64))
    }

    pub fn timestamp_msdos32(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::Timestamp(TimestampKind::Msdos32), SizeSpec::Fixed(32))
    }

    pub fn timedelta_win64(name: impl Into<String>) -> Self {
        Self::leaf(name, Leaf::TimedeltaWin64, SizeSpec::Fixed(64))
    }

    /// Field set whose size is known once its generator is exhausted
    pub fn set(name: impl Into<String>, generator: impl FieldGenerator + 'static) -> Self {
        Self::set_body(name, Box::new(generator), None, false)
    }

    /// Field set with a declared size in bits
    pub fn set_sized(name: impl Into<String>, size: u64, generator: impl FieldGenerator + 'static) -> Self {
        Self::set_body(name, Box::new(generator), Some(size), false)
    }

    /// Field set whose children may carry explicit addresses (see [`FieldSpec::at`])
    pub fn seekable(
        name: impl Into<String>,
        size: Option<u64>,
        generator: impl FieldGenerator + 'static,
    ) -> Self {
        Self::set_body(name, Box::new(generator), size, true)
    }

    /// Field set of `count` items named `item_name[0]`, `item_name[1]`, ...
    pub fn vector<F>(name: impl Into<String>, count: u64, item_name: impl Into<String>, make: F) -> Self
    where
        F: Fn(String) -> FieldSpec + 'static,
    {
        let generator = VectorGenerator {
            remaining: count,
            item_name: item_name.into(),
            make: Box::new(make),
        };
        Self::set_body(name, Box::new(generator), None, false)
    }

    fn set_body(name: impl Into<String>, generator: Box<dyn FieldGenerator>, size: Option<u64>, seekable: bool) -> Self {
        Self {
            name: name.into(),
            body: SpecBody::Set {
                generator,
                size,
                seekable,
            },
            description: None,
            display: None,
            address: None,
            endian: None,
            stream_tags: Vec::new(),
        }
    }

    /// Static description of the field
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the display of a leaf
    pub fn with_display(mut self, display: DisplayFn) -> Self {
        self.display = Some(display);
        self
    }

    /// Display an integer leaf through a lookup table
    pub fn with_enum(mut self, table: EnumTable) -> Self {
        if let SpecBody::Leaf { leaf, .. } = &mut self.body {
            let inner = std::mem::replace(leaf, Leaf::Bit);
            *leaf = Leaf::Enum {
                inner: Box::new(inner),
                table,
            };
        }
        self
    }

    /// Charset of a string leaf
    pub fn with_charset(mut self, charset: Charset) -> Self {
        if let SpecBody::Leaf {
            leaf: Leaf::String { charset: slot, .. },
            ..
        } = &mut self.body
        {
            *slot = Some(charset);
        }
        self
    }

    /// Characters stripped from both ends of a string value
    pub fn with_strip(mut self, chars: impl Into<String>) -> Self {
        if let SpecBody::Leaf {
            leaf: Leaf::String { strip, .. },
            ..
        } = &mut self.body
        {
            *strip = Some(chars.into());
        }
        self
    }

    /// Byte order for this field and, for sets, its descendants
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = Some(endian);
        self
    }

    /// Parser hint attached to the field's sub-stream
    pub fn with_stream_tag(mut self, tag: StreamTag) -> Self {
        self.stream_tags.push(tag);
        self
    }

    /// Explicit address relative to the parent (seekable sets)
    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    /// Name as yielded, before auto-indexing
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_field_set(&self) -> bool {
        matches!(self.body, SpecBody::Set { .. })
    }
}

/// Resolve the size of a leaf placed at absolute address `address`
///
/// `limit` is the absolute end of the enclosing set when it is declared.
pub(crate) fn resolve_leaf_size(
    leaf: &Leaf,
    size: SizeSpec,
    stream: &dyn InputStream,
    address: u64,
    endian: Endian,
    limit: Option<u64>,
) -> Result<u64> {
    let (format, charset) = match (size, leaf) {
        (SizeSpec::Fixed(size), _) => return Ok(size),
        (_, Leaf::String { format, charset, .. }) => (*format, *charset),
        _ => return Err(Error::internal("only strings have a dynamic size")),
    };
    match size {
        SizeSpec::Prefixed => {
            let prefix = format.prefix_size();
            let length = stream.read_bits(address, prefix as u32 * 8, endian)?;
            Ok((prefix as u64 + length) * 8)
        }
        _ => {
            let unit = charset.map_or(1, |c| c.unit_size()) as u64;
            let terminator: Vec<u8> = match format {
                StringFormat::UnixLine => b"\n".to_vec(),
                _ => vec![0; unit as usize],
            };
            let step = if format == StringFormat::UnixLine { 1 } else { unit };
            let mut start = address;
            loop {
                let found = stream.search_bytes(&terminator, start, limit)?;
                let Some(position) = found else {
                    return Err(Error::parser(format!(
                        "unable to find the end of the {} string",
                        leaf.type_name(0)
                    )));
                };
                // Wide terminators must sit on a character boundary
                if ((position - address) / 8) % step == 0 {
                    return Ok(position - address + terminator.len() as u64 * 8);
                }
                start = position + 8;
            }
        }
    }
}
