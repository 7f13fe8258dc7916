//! PNG picture

use chrono::NaiveDate;

use binspect_core::text_handler::{self, human_filesize_value};
use binspect_core::{Charset, Endian, Error, Result, Value};
use binspect_stream::InputStream;

use crate::field::{EnumTable, FieldGenerator, FieldSpec};
use crate::parser::{FormatParser, Parser};
use crate::registry::{Category, ParserTags};
use crate::tree::{FieldRef, FieldSetCursor};

const MAGIC: &[u8] = b"\x89PNG\r\n\x1A\n";

/// Trailer of every PNG: an empty IEND chunk and its CRC
const IEND_TRAILER: &[u8] = b"\0\0\0\0IEND\xae\x42\x60\x82";

const MAX_CHUNK_SIZE: u64 = 500 * 1024;

const COMPRESSION_NAME: EnumTable = &[(0, "deflate")];

const UNIT_NAME: EnumTable = &[(0, "Unknown"), (1, "Meter")];

/// Kind of chunk, from its four-letter tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Header,
    Time,
    Physical,
    Palette,
    Gamma,
    Text,
    Background,
    Data,
    Utf8Text,
    CompText,
    End,
    Other,
}

impl ChunkKind {
    fn from_tag(tag: &[u8]) -> Self {
        match tag {
            b"IHDR" => ChunkKind::Header,
            b"tIME" => ChunkKind::Time,
            b"pHYs" => ChunkKind::Physical,
            b"PLTE" => ChunkKind::Palette,
            b"gAMA" => ChunkKind::Gamma,
            b"tEXt" => ChunkKind::Text,
            b"bKGD" => ChunkKind::Background,
            b"IDAT" => ChunkKind::Data,
            b"iTXt" => ChunkKind::Utf8Text,
            b"zTXt" => ChunkKind::CompText,
            b"IEND" => ChunkKind::End,
            _ => ChunkKind::Other,
        }
    }

    fn field_name(&self) -> &'static str {
        match self {
            ChunkKind::Header => "header",
            ChunkKind::Time => "time",
            ChunkKind::Physical => "physical",
            ChunkKind::Palette => "palette",
            ChunkKind::Gamma => "gamma",
            ChunkKind::Text => "text[]",
            ChunkKind::Background => "background",
            ChunkKind::Data => "data[]",
            ChunkKind::Utf8Text => "utf8_text[]",
            ChunkKind::CompText => "comp_text[]",
            ChunkKind::End => "end",
            ChunkKind::Other => "chunk[]",
        }
    }

    /// Fixed description, for chunks without computed one
    fn static_description(&self) -> Option<&'static str> {
        match self {
            ChunkKind::Time => Some("Timestamp"),
            ChunkKind::Data => Some("Image data"),
            ChunkKind::Utf8Text => Some("International text (encoded in UTF-8)"),
            ChunkKind::CompText => Some("Compressed text"),
            ChunkKind::End => Some("End"),
            _ => None,
        }
    }
}

fn header_field(index: usize) -> Option<FieldSpec> {
    Some(match index {
        0 => FieldSpec::uint32("width").with_description("Width (pixels)"),
        1 => FieldSpec::uint32("height").with_description("Height (pixels)"),
        2 => FieldSpec::uint8("bpp").with_description("Bits per pixel"),
        3 => FieldSpec::raw_bits("reserved", 5),
        4 => FieldSpec::bit("alpha").with_description("Alpha channel used?"),
        5 => FieldSpec::bit("color").with_description("Color used?"),
        6 => FieldSpec::bit("palette").with_description("Palette used?"),
        7 => FieldSpec::uint8("compression")
            .with_enum(COMPRESSION_NAME)
            .with_description("Compression method"),
        8 => FieldSpec::uint8("filter").with_description("Filter method"),
        9 => FieldSpec::uint8("interlace").with_description("Interlace method"),
        _ => return None,
    })
}

fn time_field(index: usize) -> Option<FieldSpec> {
    Some(match index {
        0 => FieldSpec::uint16("year").with_description("Year"),
        1 => FieldSpec::uint8("month").with_description("Month"),
        2 => FieldSpec::uint8("day").with_description("Day"),
        3 => FieldSpec::uint8("hour").with_description("Hour"),
        4 => FieldSpec::uint8("minute").with_description("Minute"),
        5 => FieldSpec::uint8("second").with_description("Second"),
        _ => return None,
    })
}

fn physical_field(index: usize) -> Option<FieldSpec> {
    Some(match index {
        0 => FieldSpec::uint32("pixel_per_unit_x").with_description("Pixel per unit, X axis"),
        1 => FieldSpec::uint32("pixel_per_unit_y").with_description("Pixel per unit, Y axis"),
        2 => FieldSpec::uint8("unit").with_enum(UNIT_NAME).with_description("Unit type"),
        _ => return None,
    })
}

fn background_field(index: usize) -> Option<FieldSpec> {
    let name = ["red", "green", "blue"].get(index)?;
    Some(FieldSpec::uint16(*name))
}

/// One palette entry
struct Rgb {
    next: usize,
}

impl FieldGenerator for Rgb {
    fn next_field(&mut self, _set: &FieldSetCursor<'_>) -> Result<Option<FieldSpec>> {
        let name = ["red", "green", "blue"].get(self.next);
        self.next += 1;
        Ok(name.map(|name| FieldSpec::uint8(*name)))
    }

    fn describe(&self, set: FieldRef<'_>) -> Result<Option<String>> {
        let component = |name: &str| -> Result<u64> { Ok(set.value_of(name)?.as_u64().unwrap_or(0)) };
        Ok(Some(format!(
            "RGB color: #{:02X}{:02X}{:02X}",
            component("red")?,
            component("green")?,
            component("blue")?
        )))
    }
}

fn u64_of(set: FieldRef<'_>, name: &str) -> Result<u64> {
    set.value_of(name)?
        .as_u64()
        .ok_or_else(|| Error::parser(format!("{} is not an integer", name)))
}

/// Fields of one chunk: size, tag, body, CRC
struct ChunkFields {
    kind: ChunkKind,
    step: usize,
    done: bool,
}

impl ChunkFields {
    fn new(kind: ChunkKind) -> Self {
        Self {
            kind,
            step: 0,
            done: false,
        }
    }

    /// Field `index` of the chunk body, `None` past its end
    fn body_field(&self, set: &FieldSetCursor<'_>, size: u64, index: usize) -> Result<Option<FieldSpec>> {
        Ok(match self.kind {
            ChunkKind::Header => header_field(index),
            ChunkKind::Time => time_field(index),
            ChunkKind::Physical => physical_field(index),
            ChunkKind::Background => background_field(index),
            ChunkKind::Gamma => (index == 0).then(|| FieldSpec::uint32("gamma").with_description("Gamma (x10,000)")),
            ChunkKind::Palette => {
                if size % 3 != 0 {
                    return Err(Error::parser(format!(
                        "Palette have invalid size ({}), should be 3*n!",
                        size
                    )));
                }
                (index < (size / 3) as usize).then(|| FieldSpec::set("color[]", Rgb { next: 0 }))
            }
            ChunkKind::Text => match index {
                0 => Some(
                    FieldSpec::cstring("keyword")
                        .with_charset(Charset::Iso8859_1)
                        .with_description("Keyword"),
                ),
                1 => {
                    let keyword = set.get("keyword")?.size() / 8;
                    let length = size.saturating_sub(keyword);
                    (length > 0).then(|| {
                        FieldSpec::string("text", length)
                            .with_charset(Charset::Iso8859_1)
                            .with_description("Text")
                    })
                }
                _ => None,
            },
            _ => (index == 0).then(|| FieldSpec::raw_bytes("content", size).with_description("Data")),
        })
    }

    fn timestamp(set: FieldRef<'_>) -> Result<Option<Value>> {
        let part = |name: &str| -> Result<u32> { Ok(u64_of(set, name)? as u32) };
        let date = NaiveDate::from_ymd_opt(u64_of(set, "year")? as i32, part("month")?, part("day")?);
        let time = match date {
            Some(date) => date.and_hms_opt(part("hour")?, part("minute")?, part("second")?),
            None => None,
        };
        Ok(time.map(Value::DateTime))
    }
}

impl FieldGenerator for ChunkFields {
    fn next_field(&mut self, set: &FieldSetCursor<'_>) -> Result<Option<FieldSpec>> {
        if self.done {
            return Ok(None);
        }
        let step = self.step;
        self.step += 1;
        match step {
            0 => return Ok(Some(FieldSpec::uint32("size").with_description("Size"))),
            1 => {
                return Ok(Some(
                    FieldSpec::string("tag", 4)
                        .with_charset(Charset::Ascii)
                        .with_description("Tag"),
                ));
            }
            _ => {}
        }
        let size = u64_of(set.field(), "size")?;
        if size != 0 {
            if let Some(field) = self.body_field(set, size, step - 2)? {
                return Ok(Some(field));
            }
        }
        // the CRC closes every chunk
        self.done = true;
        Ok(Some(
            FieldSpec::uint32("crc32")
                .with_display(text_handler::hexadecimal)
                .with_description("CRC32"),
        ))
    }

    fn describe(&self, set: FieldRef<'_>) -> Result<Option<String>> {
        if let Some(text) = self.kind.static_description() {
            return Ok(Some(text.to_string()));
        }
        let text = match self.kind {
            ChunkKind::Header => format!(
                "Header: {}x{} pixels and {} bits/pixel",
                u64_of(set, "width")?,
                u64_of(set, "height")?,
                u64_of(set, "bpp")?
            ),
            ChunkKind::Palette => format!("Palette: {} colors", u64_of(set, "size")? / 3),
            ChunkKind::Gamma => format!("Gamma: {:.3}", u64_of(set, "gamma")? as f64 / 10000.0),
            ChunkKind::Text => match set.get("text") {
                Ok(text) => format!("Text: {}", text.display()),
                Err(_) => "Text".to_string(),
            },
            ChunkKind::Physical => {
                let mut desc = format!(
                    "Physical: {}x{} pixels",
                    u64_of(set, "pixel_per_unit_x")?,
                    u64_of(set, "pixel_per_unit_y")?
                );
                if u64_of(set, "unit")? == 1 {
                    desc.push_str(" per meter");
                }
                desc
            }
            ChunkKind::Background => format!(
                "Background color: #{:02X}{:02X}{:02X}",
                u64_of(set, "red")?,
                u64_of(set, "green")?,
                u64_of(set, "blue")?
            ),
            _ => format!("Chunk: {}", set.get("tag")?.display()),
        };
        Ok(Some(text))
    }

    fn value(&self, set: FieldRef<'_>) -> Result<Option<Value>> {
        match self.kind {
            ChunkKind::Gamma => Ok(Some(Value::Float(u64_of(set, "gamma")? as f64 / 10000.0))),
            ChunkKind::Time => Self::timestamp(set),
            _ => Ok(None),
        }
    }
}

/// Root fields: identifier then chunks until the end of the stream
fn create_root_fields() -> impl FnMut(&FieldSetCursor<'_>) -> Result<Option<FieldSpec>> {
    let mut started = false;
    move |set: &FieldSetCursor<'_>| {
        if !started {
            started = true;
            return Ok(Some(
                FieldSpec::bytes("id", 8).with_description("PNG identifier ('\\x89PNG\\r\\n\\x1A\\n')"),
            ));
        }
        if set.eof() {
            return Ok(None);
        }
        let position = set.current_size();
        let size = set.read_bits(position, 32)?;
        let total = size + 12;
        if total > MAX_CHUNK_SIZE {
            return Err(Error::parser(format!(
                "PNG: Chunk is too big ({})",
                human_filesize_value(total)
            )));
        }
        let tag = set.read_bytes(position + 32, 4)?;
        let kind = ChunkKind::from_tag(&tag);
        Ok(Some(FieldSpec::set_sized(
            kind.field_name(),
            total * 8,
            ChunkFields::new(kind),
        )))
    }
}

/// Portable Network Graphics parser
pub struct PngParser {
    tags: ParserTags,
}

impl PngParser {
    pub fn new() -> Self {
        Self {
            tags: ParserTags::builder("png")
                .description("Portable Network Graphics (PNG) picture")
                .category(Category::Image)
                .extensions(&["png"])
                .mime(&["image/png", "image/x-png"])
                .min_size(8 * 8)
                .magic(MAGIC, 0)
                .build(),
        }
    }
}

impl Default for PngParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for PngParser {
    fn tags(&self) -> &ParserTags {
        &self.tags
    }

    fn endian(&self) -> Endian {
        Endian::Big
    }

    fn create_fields(&self) -> Box<dyn FieldGenerator> {
        Box::new(create_root_fields())
    }

    fn validate(&self, parser: &Parser) -> std::result::Result<(), String> {
        match parser.value("id") {
            Ok(id) if id == MAGIC => {}
            _ => return Err("Invalid signature".to_string()),
        }
        match parser.root().child(1) {
            Some(chunk) if chunk.name() == "header" => Ok(()),
            _ => Err("First chunk is not header".to_string()),
        }
    }

    fn create_description(&self, parser: &Parser) -> Option<String> {
        let header = parser.get("header").ok()?;
        let value = |name: &str| header.value_of(name).ok().and_then(|v| v.as_u64());
        let mut desc = format!(
            "PNG picture: {}x{}x{}",
            value("width")?,
            value("height")?,
            value("bpp")?
        );
        if header.value_of("alpha").ok().and_then(|v| v.as_bool()) == Some(true) {
            desc.push_str(" (alpha layer)");
        }
        Some(desc)
    }

    fn create_content_size(&self, parser: &Parser) -> Option<u64> {
        let header = parser.get("header").ok()?;
        let start = header.absolute_address() + header.size();
        let end = parser.stream().search_bytes(IEND_TRAILER, start, None).ok()??;
        Some(end + 12 * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binspect_stream::MemoryStream;
    use std::sync::Arc;

    fn chunk(tag: &[u8], body: &[u8]) -> Vec<u8> {
        let mut data = (body.len() as u32).to_be_bytes().to_vec();
        data.extend_from_slice(tag);
        data.extend_from_slice(body);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data
    }

    fn sample() -> Vec<u8> {
        let mut data = MAGIC.to_vec();
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&331u32.to_be_bytes());
        ihdr.extend_from_slice(&68u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 0x06, 0, 0, 0]);
        data.extend(chunk(b"IHDR", &ihdr));
        data.extend(chunk(b"gAMA", &45000u32.to_be_bytes()));
        data.extend(chunk(b"tEXt", b"Title\0Hello"));
        data.extend(chunk(b"IDAT", &[0x78, 0x9C, 0x00]));
        data.extend_from_slice(IEND_TRAILER);
        data
    }

    fn parse(data: Vec<u8>) -> Parser {
        let stream = MemoryStream::new(data).into_shared();
        Parser::new(Arc::new(PngParser::new()), stream, true).unwrap()
    }

    #[test]
    fn test_header() {
        let parser = parse(sample());
        assert_eq!(parser.value("/header/width").unwrap(), Value::UInt(331));
        assert_eq!(parser.value("/header/alpha").unwrap(), true);
        assert_eq!(parser.get("/header/compression").unwrap().display(), "deflate");
        assert_eq!(parser.description(), "PNG picture: 331x68x8 (alpha layer)");
        assert_eq!(parser.mime_type(), "image/png");
        assert_eq!(
            parser.get("header").unwrap().description(),
            "Header: 331x68 pixels and 8 bits/pixel"
        );
    }

    #[test]
    fn test_chunk_names_and_values() {
        let parser = parse(sample());
        let names: Vec<String> = parser.root().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["id", "header", "gamma", "text[0]", "data[0]", "end"]);
        assert_eq!(parser.value("gamma").unwrap(), Value::Float(4.5));
        assert_eq!(parser.get("gamma").unwrap().description(), "Gamma: 4.500");
        assert_eq!(parser.value("text[0]/keyword").unwrap(), "Title");
        assert_eq!(parser.value("text[0]/text").unwrap(), "Hello");
        assert_eq!(parser.get("text[0]").unwrap().description(), "Text: \"Hello\"");
        assert_eq!(parser.get("data[0]/content").unwrap().size(), 24);
        assert_eq!(parser.get("end").unwrap().size(), 12 * 8);
    }

    #[test]
    fn test_content_size_with_trailing_garbage() {
        let mut data = sample();
        let png_size = data.len() as u64 * 8;
        data.extend_from_slice(b"trailing");
        let parser = parse(data);
        assert_eq!(parser.content_size(), Some(png_size));
    }

    #[test]
    fn test_reject_missing_header() {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(IEND_TRAILER);
        let stream = MemoryStream::new(data).into_shared();
        let result = Parser::new(Arc::new(PngParser::new()), stream, true);
        assert!(matches!(result, Err(Error::Validate(_))));
    }

    #[test]
    fn test_time_and_palette() {
        let mut data = MAGIC.to_vec();
        let mut ihdr = 2u32.to_be_bytes().to_vec();
        ihdr.extend_from_slice(&2u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 0x01, 0, 0, 0]);
        data.extend(chunk(b"IHDR", &ihdr));
        data.extend(chunk(b"tIME", &[0x07, 0xD6, 11, 21, 10, 30, 46]));
        data.extend(chunk(b"PLTE", &[0xFF, 0x00, 0x80, 0x10, 0x20, 0x30]));
        data.extend(chunk(b"zzZZ", &[1]));
        data.extend_from_slice(IEND_TRAILER);
        let parser = parse(data);

        let expected = NaiveDate::from_ymd_opt(2006, 11, 21)
            .and_then(|d| d.and_hms_opt(10, 30, 46))
            .unwrap();
        assert_eq!(parser.value("time").unwrap(), Value::DateTime(expected));
        assert_eq!(parser.value("time/second").unwrap(), 46u64);
        assert_eq!(parser.get("palette").unwrap().description(), "Palette: 2 colors");
        assert_eq!(
            parser.get("palette/color[0]").unwrap().description(),
            "RGB color: #FF0080"
        );
        assert_eq!(parser.get("chunk[0]").unwrap().description(), "Chunk: \"zzZZ\"");
        assert_eq!(parser.get("header/palette").unwrap().value().unwrap(), true);
        assert_eq!(parser.description(), "PNG picture: 2x2x8");
    }

    #[test]
    fn test_bad_palette_truncates_chunk() {
        let mut data = MAGIC.to_vec();
        let mut ihdr = 1u32.to_be_bytes().to_vec();
        ihdr.extend_from_slice(&1u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 0, 0, 0, 0]);
        data.extend(chunk(b"IHDR", &ihdr));
        data.extend(chunk(b"PLTE", &[1, 2, 3, 4]));
        data.extend_from_slice(IEND_TRAILER);
        let parser = parse(data);
        parser.tree().set_autofix(Some(false));
        let palette = parser.get("palette").unwrap();
        assert_eq!(palette.len(), 2);
        assert!(palette.get("crc32").is_err());
        // the declared chunk size still places the next chunk
        assert_eq!(parser.get("end").unwrap().absolute_address(), (8 + 25 + 16) * 8);
    }

    #[test]
    fn test_oversized_chunk_truncates() {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&0x0100_0000u32.to_be_bytes());
        data.extend_from_slice(b"IDAT");
        let stream = MemoryStream::new(data).into_shared();
        let parser = Parser::new(Arc::new(PngParser::new()), stream, false).unwrap();
        parser.tree().set_autofix(Some(false));
        assert_eq!(parser.root().len(), 1);
        assert!(parser.root().is_done());
    }
}
