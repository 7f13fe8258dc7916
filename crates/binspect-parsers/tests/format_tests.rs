//! Integration tests for the built-in formats
//!
//! These tests cover:
//! - gzip members produced by a real encoder
//! - PNG pictures, including content size and nested parsers
//! - Parser guessing from magic, extension and stream tags
//! - Robustness on random data

use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::{Compression, Crc, GzBuilder};
use hex_literal::hex;

use binspect_core::Value;
use binspect_parsers::formats::{GzipParser, PngParser};
use binspect_parsers::{create_parser, guess_parser, list_fields, CreateOptions, ListOptions, Parser};
use binspect_stream::{InputStream, MemoryStream, StreamTag};

const PNG_MAGIC: [u8; 8] = hex!("89504e470d0a1a0a");
const IEND: [u8; 12] = hex!("0000000049454e44ae426082");

fn gzip_member(filename: Option<&str>, payload: &[u8]) -> Vec<u8> {
    let mut builder = GzBuilder::new().mtime(1_000_000_000);
    if let Some(name) = filename {
        builder = builder.filename(name);
    }
    let mut encoder = builder.write(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

fn png_chunk(tag: &[u8], body: &[u8]) -> Vec<u8> {
    let mut data = (body.len() as u32).to_be_bytes().to_vec();
    data.extend_from_slice(tag);
    data.extend_from_slice(body);
    data.extend_from_slice(&[0; 4]);
    data
}

fn png_picture(width: u32, height: u32, idat: &[u8]) -> Vec<u8> {
    let mut data = PNG_MAGIC.to_vec();
    let mut ihdr = width.to_be_bytes().to_vec();
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[24, 0x02, 0, 0, 0]);
    data.extend(png_chunk(b"IHDR", &ihdr));
    data.extend(png_chunk(b"tIME", &[0x07, 0xD6, 0x0B, 0x15, 0x0A, 0x1E, 0x2E]));
    data.extend(png_chunk(b"IDAT", idat));
    data.extend_from_slice(&IEND);
    data
}

mod gzip {
    use super::*;

    #[test]
    fn test_encoder_output() {
        let payload = b"hello gzip ".repeat(100);
        let data = gzip_member(Some("hello.txt"), &payload);
        let stream = MemoryStream::new(data.clone()).into_shared();
        let parser = Parser::new(Arc::new(GzipParser::new()), stream, true).unwrap();

        let mut crc = Crc::new();
        crc.update(&payload);

        assert_eq!(parser.value("filename").unwrap(), "hello.txt");
        assert_eq!(parser.value("mtime").unwrap(), 1_000_000_000u64);
        assert_eq!(parser.value("size").unwrap(), payload.len() as u64);
        assert_eq!(parser.value("crc32").unwrap(), u64::from(crc.sum()));
        assert_eq!(parser.size(), data.len() as u64 * 8);

        let file = parser.get("file").unwrap();
        assert_eq!(file.size() / 8, data.len() as u64 - 10 - 10 - 8);
        assert!(parser.description().starts_with("gzip archive: filename \"hello.txt\", was "));
    }

    #[test]
    fn test_payload_named_after_stream() {
        let data = gzip_member(None, b"abc");
        let stream = MemoryStream::new(data)
            .with_tag(StreamTag::Filename("notes.txt.gz".to_string()))
            .into_shared();
        let parser = Parser::new(Arc::new(GzipParser::new()), stream, true).unwrap();

        assert!(parser.get("filename").is_err());
        assert_eq!(
            parser.get("file").unwrap().stream_tags(),
            vec![StreamTag::Filename("notes.txt".to_string())]
        );
    }

    #[test]
    fn test_guessed_from_magic() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&[7u8; 4096]).unwrap();
        let stream = MemoryStream::new(encoder.finish().unwrap()).into_shared();
        let parser = guess_parser(stream, None, None).unwrap();
        assert_eq!(parser.id(), "gzip");
        assert_eq!(parser.mime_type(), "application/x-gzip");
    }

    #[test]
    fn test_create_parser_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.gz");
        std::fs::write(&path, gzip_member(Some("a.bin"), &[1, 2, 3])).unwrap();

        let parser = create_parser(&path, &CreateOptions::default()).unwrap().unwrap();
        assert_eq!(parser.id(), "gzip");
        assert_eq!(parser.value("filename").unwrap(), "a.bin");

        let mapped = CreateOptions {
            mmap: true,
            ..CreateOptions::default()
        };
        let parser = create_parser(&path, &mapped).unwrap().unwrap();
        assert_eq!(parser.value("size").unwrap(), 3u64);
    }
}

mod png {
    use super::*;

    #[test]
    fn test_picture() {
        let data = png_picture(331, 92, &[0x78, 0x9C, 0x03, 0x00]);
        let stream = MemoryStream::new(data).into_shared();
        let parser = guess_parser(stream, Some("picture.png"), None).unwrap();

        assert_eq!(parser.id(), "png");
        assert_eq!(parser.value("/header/width").unwrap(), 331u64);
        assert_eq!(parser.value("/header/color").unwrap(), true);
        assert_eq!(parser.value("/time/second").unwrap(), 46u64);
        assert!(matches!(parser.value("time").unwrap(), Value::DateTime(_)));
        assert_eq!(parser.description(), "PNG picture: 331x92x24");
        assert_eq!(parser.get("end").unwrap().description(), "End");
    }

    #[test]
    fn test_content_size_stops_at_iend() {
        let mut data = png_picture(4, 4, &[0; 16]);
        let picture_bits = data.len() as u64 * 8;
        data.extend_from_slice(&[0xAA; 64]);
        let stream = MemoryStream::new(data).into_shared();
        let parser = Parser::new(Arc::new(PngParser::new()), stream, true).unwrap();
        assert_eq!(parser.content_size(), Some(picture_bits));
    }

    #[test]
    fn test_nested_gzip_in_chunk() {
        let inner = gzip_member(Some("inner.txt"), b"nested");
        let data = png_picture(1, 1, &inner);
        let stream = MemoryStream::new(data).into_shared();
        let parser = Parser::new(Arc::new(PngParser::new()), stream, true).unwrap();

        let sub = parser.create_sub_parser("/data[0]/content").unwrap().unwrap();
        assert_eq!(sub.id(), "gzip");
        assert_eq!(sub.value("filename").unwrap(), "inner.txt");
        assert_eq!(sub.stream().size(), Some(inner.len() as u64 * 8));
    }

    #[test]
    fn test_listing() {
        let data = png_picture(2, 2, &[0; 4]);
        let stream = MemoryStream::new(data).into_shared();
        let parser = Parser::new(Arc::new(PngParser::new()), stream, true).unwrap();
        let chunks = list_fields(
            parser.root(),
            &ListOptions {
                max_depth: Some(1),
                filter: None,
            },
        );
        let names: Vec<&str> = chunks.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["root", "id", "header", "time", "data[0]", "end"]);
        assert_eq!(chunks[2].address, 64);
        assert_eq!(chunks[2].size, 25 * 8);
    }
}

mod guessing {
    use super::*;
    use proptest::prelude::*;

    /// Deterministic noise without the magic of any built-in format
    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_F491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8 | 0x01
            })
            .collect()
    }

    #[test]
    fn test_random_data_is_rejected() {
        let stream = MemoryStream::new(noise(4096)).into_shared();
        assert!(guess_parser(stream.clone(), Some("noise.png"), None).is_none());
        assert!(guess_parser(stream, None, Some("application/x-gzip")).is_none());
    }

    #[test]
    fn test_extension_hint_does_not_bypass_validation() {
        let data = png_picture(8, 8, &[0; 8]);
        let stream = MemoryStream::new(data).into_shared();
        let parser = guess_parser(stream, Some("misnamed.gz"), None).unwrap();
        assert_eq!(parser.id(), "png");
    }

    #[test]
    fn test_forced_parser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, noise(256)).unwrap();

        let options = CreateOptions {
            force_parser: Some("png".to_string()),
            ..CreateOptions::default()
        };
        let parser = create_parser(&path, &options).unwrap().unwrap();
        assert_eq!(parser.id(), "png");
        assert!(parser.value("id").unwrap() != PNG_MAGIC.as_slice());

        let unknown = CreateOptions {
            force_parser: Some("nosuchformat".to_string()),
            ..CreateOptions::default()
        };
        assert!(create_parser(&path, &unknown).is_err());
    }

    proptest! {
        #[test]
        fn walking_corrupt_png_never_panics(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut data = PNG_MAGIC.to_vec();
            data.extend_from_slice(&body);
            let stream = MemoryStream::new(data).into_shared();
            let parser = Parser::new(Arc::new(PngParser::new()), stream, false).unwrap();
            let fields = list_fields(parser.root(), &ListOptions::default());
            prop_assert!(!fields.is_empty());
            prop_assert!(parser.root().size() <= parser.stream().size().unwrap());
        }
    }
}
