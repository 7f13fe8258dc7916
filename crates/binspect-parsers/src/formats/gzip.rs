//! gzip archive (RFC 1952)

use binspect_core::text_handler::{self, human_filesize_value};
use binspect_core::{Endian, Error, Result, Value};
use binspect_stream::StreamTag;

use crate::field::{EnumTable, FieldGenerator, FieldSpec};
use crate::parser::{FormatParser, Parser};
use crate::registry::{Category, ParserTags};
use crate::tree::FieldSetCursor;

const MAGIC: &[u8] = b"\x1F\x8B\x08";

const COMPRESSION_NAME: EnumTable = &[(8, "deflate")];

const OS_NAME: EnumTable = &[
    (0, "FAT filesystem"),
    (1, "Amiga"),
    (2, "VMS (or OpenVMS)"),
    (3, "Unix"),
    (4, "VM/CMS"),
    (5, "Atari TOS"),
    (6, "HPFS filesystem (OS/2, NT)"),
    (7, "Macintosh"),
    (8, "Z-System"),
    (9, "CP/M"),
    (10, "TOPS-20"),
    (11, "NTFS filesystem (NT)"),
    (12, "QDOS"),
    (13, "Acorn RISCOS"),
];

/// Fixed part of the header, up to the OS byte
fn header_field(index: usize) -> Option<FieldSpec> {
    Some(match index {
        0 => FieldSpec::bytes("signature", 2).with_description("GZip file signature (\\x1F\\x8B)"),
        1 => FieldSpec::uint8("compression")
            .with_enum(COMPRESSION_NAME)
            .with_description("Compression method"),
        2 => FieldSpec::bit("is_text").with_description("File content is probably ASCII text"),
        3 => FieldSpec::bit("has_crc16").with_description("Header CRC16"),
        4 => FieldSpec::bit("has_extra").with_description("Extra informations (variable size)"),
        5 => FieldSpec::bit("has_filename").with_description("Contains filename?"),
        6 => FieldSpec::bit("has_comment").with_description("Contains comment?"),
        7 => FieldSpec::null_bits("reserved[]", 3),
        8 => FieldSpec::uint32("mtime")
            .with_display(text_handler::timestamp_unix)
            .with_description("Modification time"),
        9 => FieldSpec::null_bits("reserved[]", 1),
        10 => FieldSpec::bit("slowest").with_description("Compressor used maximum compression (slowest)"),
        11 => FieldSpec::bit("fastest").with_description("Compressor used the fastest compression"),
        12 => FieldSpec::null_bits("reserved[]", 5),
        13 => FieldSpec::uint8("os").with_enum(OS_NAME).with_description("Operating system"),
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Header(usize),
    ExtraLength,
    Extra,
    Filename,
    Comment,
    HeaderCrc,
    File,
    Crc32,
    Size,
    Done,
}

struct GzipFields {
    step: Step,
}

fn flag(set: &FieldSetCursor<'_>, name: &str) -> Result<bool> {
    Ok(set.value(name)?.as_bool().unwrap_or(false))
}

/// Name of the compressed file: the FNAME field, else the stream name minus `.gz`
fn payload_name(set: &FieldSetCursor<'_>) -> Result<Option<String>> {
    if flag(set, "has_filename")? {
        return Ok(set.value("filename")?.as_str().map(str::to_string));
    }
    Ok(set.stream().tags().iter().find_map(|tag| match tag {
        StreamTag::Filename(name) => name.strip_suffix(".gz").map(str::to_string),
        _ => None,
    }))
}

impl FieldGenerator for GzipFields {
    fn next_field(&mut self, set: &FieldSetCursor<'_>) -> Result<Option<FieldSpec>> {
        loop {
            let (next, field) = match self.step {
                Step::Header(index) => match header_field(index) {
                    Some(field) => (Step::Header(index + 1), Some(field)),
                    None => (Step::ExtraLength, None),
                },
                Step::ExtraLength => (
                    Step::Extra,
                    flag(set, "has_extra")?
                        .then(|| FieldSpec::uint16("extra_length").with_description("Extra length")),
                ),
                Step::Extra => {
                    let field = if flag(set, "has_extra")? {
                        let length = set.value("extra_length")?.as_u64().unwrap_or(0);
                        Some(FieldSpec::raw_bytes("extra", length).with_description("Extra"))
                    } else {
                        None
                    };
                    (Step::Filename, field)
                }
                Step::Filename => (
                    Step::Comment,
                    flag(set, "has_filename")?.then(|| FieldSpec::cstring("filename").with_description("Filename")),
                ),
                Step::Comment => (
                    Step::HeaderCrc,
                    flag(set, "has_comment")?.then(|| FieldSpec::cstring("comment").with_description("Comment")),
                ),
                Step::HeaderCrc => (
                    Step::File,
                    flag(set, "has_crc16")?.then(|| {
                        FieldSpec::uint16("hdr_crc16")
                            .with_display(text_handler::hexadecimal)
                            .with_description("CRC16 of the header")
                    }),
                ),
                Step::File => {
                    let total = set
                        .stream()
                        .size()
                        .ok_or_else(|| Error::parser("gzip needs a stream of known size"))?;
                    let position = set.absolute_address() + set.current_size();
                    // the footer holds crc32 and size
                    let size = (total.saturating_sub(position) / 8).saturating_sub(8);
                    let field = if size > 0 {
                        let mut file = FieldSpec::raw_bytes("file", size).with_description("Compressed file");
                        if let Some(name) = payload_name(set)? {
                            file = file.with_stream_tag(StreamTag::Filename(name));
                        }
                        Some(file)
                    } else {
                        None
                    };
                    (Step::Crc32, field)
                }
                Step::Crc32 => (
                    Step::Size,
                    Some(
                        FieldSpec::uint32("crc32")
                            .with_display(text_handler::hexadecimal)
                            .with_description("Uncompressed data content CRC32"),
                    ),
                ),
                Step::Size => (
                    Step::Done,
                    Some(
                        FieldSpec::uint32("size")
                            .with_display(text_handler::human_filesize)
                            .with_description("Uncompressed size"),
                    ),
                ),
                Step::Done => return Ok(None),
            };
            self.step = next;
            if field.is_some() {
                return Ok(field);
            }
        }
    }
}

/// gzip archive parser
pub struct GzipParser {
    tags: ParserTags,
}

impl GzipParser {
    pub fn new() -> Self {
        Self {
            tags: ParserTags::builder("gzip")
                .description("gzip archive")
                .category(Category::Archive)
                .extensions(&["gz"])
                .mime(&["application/x-gzip"])
                .min_size(18 * 8)
                .magic(MAGIC, 0)
                .build(),
        }
    }
}

impl Default for GzipParser {
    fn default() -> Self {
        Self::new()
    }
}

fn check_validate(parser: &Parser) -> Result<std::result::Result<(), String>> {
    if parser.value("signature")? != b"\x1F\x8B".as_slice() {
        return Ok(Err("Invalid signature".to_string()));
    }
    let compression = parser.value("compression")?.as_u64().unwrap_or(0);
    if !COMPRESSION_NAME.iter().any(|(key, _)| *key == compression) {
        return Ok(Err(format!("Unknown compression method ({})", compression)));
    }
    for index in 0..3 {
        let name = format!("reserved[{}]", index);
        if parser.value(&name)?.as_u64() != Some(0) {
            return Ok(Err(format!("Invalid {} value", name)));
        }
    }
    Ok(Ok(()))
}

impl FormatParser for GzipParser {
    fn tags(&self) -> &ParserTags {
        &self.tags
    }

    fn endian(&self) -> Endian {
        Endian::Little
    }

    fn create_fields(&self) -> Box<dyn FieldGenerator> {
        Box::new(GzipFields { step: Step::Header(0) })
    }

    fn validate(&self, parser: &Parser) -> std::result::Result<(), String> {
        check_validate(parser).unwrap_or_else(|err| Err(err.to_string()))
    }

    fn create_description(&self, parser: &Parser) -> Option<String> {
        let root = parser.root();
        let mut info = Vec::new();
        if let Ok(Value::Text(name)) = parser.value("filename") {
            info.push(format!("filename \"{}\"", name));
        }
        if let Some(size) = root.get("size").ok().and_then(|f| f.value().ok()).and_then(|v| v.as_u64()) {
            info.push(format!("was {}", human_filesize_value(size)));
        }
        if let Ok(mtime) = root.get("mtime") {
            if mtime.value().ok().and_then(|v| v.as_u64()).unwrap_or(0) != 0 {
                info.push(mtime.display());
            }
        }
        Some(format!("{}: {}", self.tags.description, info.join(", ")))
    }
}
