//! Editable leaves
//!
//! An [`EditableLeaf`] shadows one leaf of the parsed tree, or stands alone
//! when it was created with [`NewField`]. Until a value is set, a shadow
//! serializes by copying the bits of its original.

use binspect_core::bits::{self, mask};
use binspect_core::{Charset, Endian, Error, Result, Value};
use binspect_parsers::{FieldRef, Leaf, StringFormat};
use binspect_stream::OutputStream;

use crate::fieldset::EditableField;

/// What an editable leaf accepts as a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Bit,
    /// Unsigned bit field, `0 <= value < 2^nbits`
    Bits { nbits: u32 },
    Integer { signed: bool, nbits: u32 },
    Float { nbits: u32 },
    /// Non-empty byte string; the size follows the value
    Bytes,
    String {
        format: StringFormat,
        charset: Option<Charset>,
        /// Content length of fixed strings, in bytes
        fixed_len: Option<usize>,
    },
    Character,
    /// Always copied from the original
    ReadOnly,
}

impl LeafKind {
    /// Editable kind of a parsed leaf of `size` bits
    pub fn from_leaf(leaf: &Leaf, size: u64) -> Self {
        let nbits = size as u32;
        match leaf {
            Leaf::Bit => LeafKind::Bit,
            Leaf::Bits | Leaf::RawBits | Leaf::NullBits | Leaf::PaddingBits if size <= 64 => {
                LeafKind::Bits { nbits }
            }
            Leaf::Integer { signed } if size <= 64 => LeafKind::Integer { signed: *signed, nbits },
            // timestamps are edited as their raw integer
            Leaf::Timestamp(_) if size <= 64 => LeafKind::Integer { signed: false, nbits },
            Leaf::Float if size == 32 || size == 64 => LeafKind::Float { nbits },
            Leaf::Bytes(_) => LeafKind::Bytes,
            Leaf::String { format, charset, .. } => LeafKind::String {
                format: *format,
                charset: *charset,
                fixed_len: (*format == StringFormat::Fixed).then_some((size / 8) as usize),
            },
            Leaf::Character => LeafKind::Character,
            Leaf::Enum { inner, .. } => LeafKind::from_leaf(inner, size),
            _ => LeafKind::ReadOnly,
        }
    }

    /// Size in bits of the encoding of a value, `None` when it depends on the value
    fn fixed_size(&self) -> Option<u64> {
        match self {
            LeafKind::Bit => Some(1),
            LeafKind::Bits { nbits } | LeafKind::Integer { nbits, .. } | LeafKind::Float { nbits } => {
                Some(u64::from(*nbits))
            }
            LeafKind::Character => Some(8),
            _ => None,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::editor(message)
}

/// Largest content of a Pascal string with a prefix of `prefix` bytes
fn pascal_max(prefix: usize) -> u64 {
    mask(prefix as u32 * 8)
}

/// Editable shadow of a leaf, or a new leaf
#[derive(Debug, Clone)]
pub struct EditableLeaf<'t> {
    name: String,
    kind: LeafKind,
    endian: Option<Endian>,
    original: Option<FieldRef<'t>>,
    /// New value and the size of its encoding in bits
    new: Option<(Value, u64)>,
}

impl<'t> EditableLeaf<'t> {
    /// Shadow of a parsed leaf
    pub fn from_field(field: FieldRef<'t>) -> Self {
        let kind = field
            .leaf()
            .map_or(LeafKind::ReadOnly, |leaf| LeafKind::from_leaf(&leaf, field.size()));
        Self {
            name: field.name(),
            kind,
            endian: Some(field.endian()),
            original: Some(field),
            new: None,
        }
    }

    /// Leaf without original; it takes the byte order of the set it is inserted in
    pub(crate) fn new(name: impl Into<String>, kind: LeafKind, value: Value) -> Result<Self> {
        let mut leaf = Self {
            name: name.into(),
            kind,
            endian: None,
            original: None,
            new: None,
        };
        leaf.set_value(value)?;
        Ok(leaf)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.name = name;
    }

    pub fn kind(&self) -> LeafKind {
        self.kind
    }

    /// Parsed field this leaf shadows, `None` for a new leaf
    pub fn original(&self) -> Option<FieldRef<'t>> {
        self.original
    }

    pub fn endian(&self) -> Endian {
        self.endian.unwrap_or(Endian::Big)
    }

    pub(crate) fn adopt_endian(&mut self, endian: Endian) {
        self.endian.get_or_insert(endian);
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = Some(endian);
        self
    }

    pub fn is_altered(&self) -> bool {
        self.new.is_some()
    }

    /// Current value: the new one if set, else the original's
    pub fn value(&self) -> Result<Value> {
        match (&self.new, &self.original) {
            (Some((value, _)), _) => Ok(value.clone()),
            (None, Some(field)) => field.value(),
            (None, None) => Err(Error::internal(format!("field {} has no value", self.name))),
        }
    }

    /// Size in bits of the serialized leaf
    pub fn size(&self) -> u64 {
        match (&self.new, &self.original) {
            (Some((_, size)), _) => *size,
            (None, Some(field)) => field.size(),
            (None, None) => 0,
        }
    }

    /// Check and store a new value
    ///
    /// Integer-like values are range checked; strings must be encodable in
    /// the field's charset and fit its format.
    pub fn set_value(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = self.check(value.into())?;
        let size = self.encode(&value, Endian::Big)?.size();
        tracing::trace!(field = %self.name, value = %value, bits = size, "Set value");
        self.new = Some((value, size));
        Ok(())
    }

    /// Normalize `value` for this kind, rejecting out-of-range values
    fn check(&self, value: Value) -> Result<Value> {
        match self.kind {
            LeafKind::ReadOnly => Err(invalid(format!("field \"{}\" is read only", self.name))),
            LeafKind::Bit => match value {
                Value::Bool(_) => Ok(value),
                Value::UInt(v @ (0 | 1)) => Ok(Value::Bool(v == 1)),
                other => Err(invalid(format!("invalid bit value: {}", other))),
            },
            LeafKind::Bits { nbits } => {
                let v = value
                    .as_u64()
                    .ok_or_else(|| invalid(format!("invalid value for {} bits: {}", nbits, value)))?;
                if v > mask(nbits) {
                    return Err(invalid(format!(
                        "Invalid value, must be in range 0..{}",
                        mask(nbits)
                    )));
                }
                Ok(Value::UInt(v))
            }
            LeafKind::Integer { signed: false, nbits } => {
                let max = mask(nbits);
                match value.as_u64() {
                    Some(v) if v <= max => Ok(Value::UInt(v)),
                    _ => Err(invalid(format!("Invalid value {}, must be in range 0..{}", value, max))),
                }
            }
            LeafKind::Integer { signed: true, nbits } => {
                let (min, max) = if nbits >= 64 {
                    (i64::MIN, i64::MAX)
                } else {
                    (-(1i64 << (nbits - 1)), (1i64 << (nbits - 1)) - 1)
                };
                match value.as_i64() {
                    Some(v) if (min..=max).contains(&v) => Ok(Value::Int(v)),
                    _ => Err(invalid(format!(
                        "Invalid value {}, must be in range {}..{}",
                        value, min, max
                    ))),
                }
            }
            LeafKind::Float { .. } => value
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| invalid(format!("invalid float value: {}", value))),
            LeafKind::Bytes => match value {
                Value::Bytes(data) if !data.is_empty() => Ok(Value::Bytes(data)),
                Value::Bytes(_) => Err(invalid("Unable to set empty bytes to a bytes field")),
                other => Err(invalid(format!("bytes expected, got {}", other.kind()))),
            },
            LeafKind::String { format, .. } => {
                let Value::Text(text) = value else {
                    return Err(invalid(format!("text expected, got {}", value.kind())));
                };
                match format {
                    StringFormat::C if text.contains('\0') => {
                        Err(invalid("a C string can't contain a nul character"))
                    }
                    StringFormat::UnixLine if text.contains('\n') => {
                        Err(invalid("a line can't contain a newline"))
                    }
                    _ => Ok(Value::Text(text)),
                }
            }
            LeafKind::Character => match value {
                Value::Text(text) if text.chars().count() == 1 => Ok(Value::Text(text)),
                _ => Err(invalid("a character field needs exactly one character")),
            },
        }
    }

    fn encode_text(&self, text: &str, charset: Option<Charset>) -> Result<Vec<u8>> {
        match charset {
            Some(charset) => charset.encode(text),
            None => Charset::Iso8859_1
                .encode(text)
                .or_else(|_| Charset::Utf8.encode(text)),
        }
    }

    /// Serialized form of a checked value
    fn encode(&self, value: &Value, endian: Endian) -> Result<Encoded> {
        if let Some(nbits) = self.kind.fixed_size() {
            if let LeafKind::Float { nbits } = self.kind {
                let v = value.as_f64().unwrap_or_default();
                let raw = if nbits == 32 {
                    bits::float32_to_raw(v as f32, endian)
                } else {
                    bits::float64_to_raw(v, endian)
                };
                return Ok(Encoded::Bytes(raw));
            }
            if let LeafKind::Character = self.kind {
                let text = value.as_str().unwrap_or_default();
                return Ok(Encoded::Bytes(Charset::Iso8859_1.encode(text)?));
            }
            let raw = match value {
                Value::Int(v) => (*v as u64) & mask(nbits as u32),
                other => other.as_u64().unwrap_or_default(),
            };
            let nbits = nbits as u32;
            if endian == Endian::Middle && nbits % 16 == 0 {
                return Ok(Encoded::Bytes(bits::long2raw(raw, endian, nbits as usize / 8)?));
            }
            return Ok(Encoded::Bits { nbits, value: raw });
        }
        match (self.kind, value) {
            (LeafKind::Bytes, Value::Bytes(data)) => Ok(Encoded::Bytes(data.clone())),
            (
                LeafKind::String {
                    format,
                    charset,
                    fixed_len,
                },
                Value::Text(text),
            ) => {
                let content = self.encode_text(text, charset)?;
                let mut raw = Vec::with_capacity(content.len() + 4);
                match format {
                    StringFormat::Fixed => {
                        if let Some(len) = fixed_len {
                            if content.len() != len {
                                return Err(invalid(format!(
                                    "fixed string \"{}\" must keep its length of {} bytes",
                                    self.name, len
                                )));
                            }
                        }
                        raw.extend_from_slice(&content);
                    }
                    StringFormat::C => {
                        raw.extend_from_slice(&content);
                        let unit = charset.map_or(1, |c| c.unit_size());
                        raw.extend(std::iter::repeat_n(0u8, unit));
                    }
                    StringFormat::UnixLine => {
                        raw.extend_from_slice(&content);
                        raw.push(b'\n');
                    }
                    StringFormat::Pascal8 | StringFormat::Pascal16 | StringFormat::Pascal32 => {
                        let prefix = format.prefix_size();
                        let length = content.len() as u64;
                        if length > pascal_max(prefix) {
                            return Err(invalid("String is too big"));
                        }
                        raw.extend(bits::long2raw(length, endian, prefix)?);
                        raw.extend_from_slice(&content);
                    }
                }
                Ok(Encoded::Bytes(raw))
            }
            (kind, value) => Err(Error::internal(format!("can't encode {} as {:?}", value.kind(), kind))),
        }
    }

    /// Serialize the leaf: its new encoding, else a copy of the original bits
    pub fn write_into(&self, output: &mut OutputStream) -> Result<()> {
        match (&self.new, &self.original) {
            (Some((value, _)), _) => match self.encode(value, self.endian())? {
                Encoded::Bits { nbits, value } => output.write_bits(nbits, value, self.endian()),
                Encoded::Bytes(data) => output.write_bytes(&data),
            },
            (None, Some(field)) => {
                let stream = field.tree().stream();
                output.copy_bits_from(stream.as_ref(), field.absolute_address(), field.size(), field.endian())
            }
            (None, None) => Ok(()),
        }
    }
}

/// Serialized form of a value
enum Encoded {
    Bits { nbits: u32, value: u64 },
    Bytes(Vec<u8>),
}

impl Encoded {
    fn size(&self) -> u64 {
        match self {
            Encoded::Bits { nbits, .. } => u64::from(*nbits),
            Encoded::Bytes(data) => data.len() as u64 * 8,
        }
    }
}

/// Constructors of leaves to insert with the editor
///
/// The byte order of a new leaf is the one of the set it is inserted into,
/// unless set with [`EditableLeaf::with_endian`].
pub struct NewField;

impl NewField {
    fn make<'t>(name: &str, kind: LeafKind, value: Value) -> Result<EditableField<'t>> {
        EditableLeaf::new(name, kind, value).map(EditableField::Leaf)
    }

    pub fn uint8<'t>(name: &str, value: u8) -> EditableField<'t> {
        Self::integer(name, false, 8, i64::from(value))
    }

    pub fn uint16<'t>(name: &str, value: u16) -> EditableField<'t> {
        Self::integer(name, false, 16, i64::from(value))
    }

    pub fn uint32<'t>(name: &str, value: u32) -> EditableField<'t> {
        Self::integer(name, false, 32, i64::from(value))
    }

    pub fn int8<'t>(name: &str, value: i8) -> EditableField<'t> {
        Self::integer(name, true, 8, i64::from(value))
    }

    pub fn int16<'t>(name: &str, value: i16) -> EditableField<'t> {
        Self::integer(name, true, 16, i64::from(value))
    }

    pub fn int32<'t>(name: &str, value: i32) -> EditableField<'t> {
        Self::integer(name, true, 32, i64::from(value))
    }

    fn integer<'t>(name: &str, signed: bool, nbits: u32, value: i64) -> EditableField<'t> {
        let value = if signed {
            Value::Int(value)
        } else {
            Value::UInt(value as u64)
        };
        EditableField::Leaf(EditableLeaf {
            name: name.to_string(),
            kind: LeafKind::Integer { signed, nbits },
            endian: None,
            original: None,
            new: Some((value, u64::from(nbits))),
        })
    }

    pub fn bit<'t>(name: &str, value: bool) -> EditableField<'t> {
        EditableField::Leaf(EditableLeaf {
            name: name.to_string(),
            kind: LeafKind::Bit,
            endian: None,
            original: None,
            new: Some((Value::Bool(value), 1)),
        })
    }

    pub fn bits<'t>(name: &str, nbits: u32, value: u64) -> Result<EditableField<'t>> {
        if nbits == 0 || nbits > bits::MAX_BITS {
            return Err(invalid(format!("can't create a field of {} bits", nbits)));
        }
        Self::make(name, LeafKind::Bits { nbits }, Value::UInt(value))
    }

    pub fn bytes<'t>(name: &str, data: &[u8]) -> Result<EditableField<'t>> {
        Self::make(name, LeafKind::Bytes, Value::Bytes(data.to_vec()))
    }

    /// Nul-terminated string, ISO-8859-1 encoded
    pub fn cstring<'t>(name: &str, text: &str) -> Result<EditableField<'t>> {
        let kind = LeafKind::String {
            format: StringFormat::C,
            charset: Some(Charset::Iso8859_1),
            fixed_len: None,
        };
        Self::make(name, kind, Value::Text(text.to_string()))
    }

    /// String without terminator, ISO-8859-1 encoded
    pub fn string<'t>(name: &str, text: &str) -> Result<EditableField<'t>> {
        let kind = LeafKind::String {
            format: StringFormat::Fixed,
            charset: Some(Charset::Iso8859_1),
            fixed_len: None,
        };
        Self::make(name, kind, Value::Text(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(field: EditableField<'_>) -> EditableLeaf<'_> {
        match field {
            EditableField::Leaf(leaf) => leaf,
            EditableField::Set(_) => panic!("not a leaf"),
        }
    }

    fn serialize(leaf: &EditableLeaf<'_>) -> Vec<u8> {
        let mut out = OutputStream::new();
        leaf.write_into(&mut out).unwrap();
        out.into_bytes().unwrap()
    }

    #[test]
    fn test_integer_ranges() {
        let mut field = leaf(NewField::uint8("a", 1));
        assert!(field.set_value(255u64).is_ok());
        assert!(field.set_value(256u64).is_err());
        assert!(field.set_value(-1i64).is_err());

        let mut field = leaf(NewField::int8("b", 0));
        assert!(field.set_value(-128i64).is_ok());
        assert!(field.set_value(127i64).is_ok());
        assert!(field.set_value(128i64).is_err());
        assert!(field.set_value(-129i64).is_err());
    }

    #[test]
    fn test_integer_encoding_follows_endian() {
        let field = leaf(NewField::uint16("a", 0x1234));
        assert_eq!(serialize(&field), vec![0x12, 0x34]);
        let field = field.with_endian(Endian::Little);
        assert_eq!(serialize(&field), vec![0x34, 0x12]);
        let field = leaf(NewField::int16("b", -2)).with_endian(Endian::Little);
        assert_eq!(serialize(&field), vec![0xFE, 0xFF]);
    }

    #[test]
    fn test_bits_range() {
        let mut field = leaf(NewField::bits("flags", 3, 5).unwrap());
        assert_eq!(field.size(), 3);
        assert!(field.set_value(7u64).is_ok());
        assert!(field.set_value(8u64).is_err());
        assert!(NewField::bits("zero", 0, 0).is_err());
    }

    #[test]
    fn test_bit_accepts_bool_and_01() {
        let mut field = leaf(NewField::bit("flag", false));
        field.set_value(1u64).unwrap();
        assert_eq!(field.value().unwrap(), true);
        assert!(field.set_value(2u64).is_err());
        assert!(field.set_value("yes").is_err());
    }

    #[test]
    fn test_strings() {
        let field = leaf(NewField::cstring("name", "abc").unwrap());
        assert_eq!(field.size(), 32);
        assert_eq!(serialize(&field), b"abc\0".to_vec());
        assert!(NewField::cstring("bad", "a\0b").is_err());

        let mut fixed = leaf(NewField::string("tag", "IHDR").unwrap());
        fixed.set_value("é").unwrap();
        assert_eq!(serialize(&fixed), vec![0xE9]);
    }

    #[test]
    fn test_pascal_prefix() {
        let kind = LeafKind::String {
            format: StringFormat::Pascal8,
            charset: Some(Charset::Ascii),
            fixed_len: None,
        };
        let field = EditableLeaf::new("title", kind, Value::from("hey")).unwrap();
        assert_eq!(serialize(&field), b"\x03hey".to_vec());
        assert!(EditableLeaf::new("long", kind, Value::from("x".repeat(256))).is_err());
        // ASCII can't hold é
        assert!(EditableLeaf::new("accent", kind, Value::from("é")).is_err());
    }

    #[test]
    fn test_fixed_string_keeps_length() {
        let kind = LeafKind::String {
            format: StringFormat::Fixed,
            charset: Some(Charset::Ascii),
            fixed_len: Some(4),
        };
        assert!(EditableLeaf::new("tag", kind, Value::from("IEND")).is_ok());
        assert!(EditableLeaf::new("tag", kind, Value::from("END")).is_err());
    }

    #[test]
    fn test_bytes_and_float() {
        assert!(NewField::bytes("empty", &[]).is_err());
        let field = leaf(NewField::bytes("data", b"abcd").unwrap());
        assert_eq!(field.size(), 32);

        let kind = LeafKind::Float { nbits: 32 };
        let field = EditableLeaf::new("ratio", kind, Value::Float(1.5)).unwrap();
        assert_eq!(serialize(&field), vec![0x3F, 0xC0, 0x00, 0x00]);
        assert!(EditableLeaf::new("ratio", kind, Value::from("1.5")).is_err());
    }

    #[test]
    fn test_read_only() {
        assert!(EditableLeaf::new("stamp", LeafKind::ReadOnly, Value::UInt(0)).is_err());
    }

    #[test]
    fn test_kind_from_leaf() {
        assert_eq!(
            LeafKind::from_leaf(&Leaf::Integer { signed: true }, 16),
            LeafKind::Integer { signed: true, nbits: 16 }
        );
        assert_eq!(LeafKind::from_leaf(&Leaf::Float, 80), LeafKind::ReadOnly);
        assert_eq!(LeafKind::from_leaf(&Leaf::TimedeltaWin64, 64), LeafKind::ReadOnly);
    }
}
