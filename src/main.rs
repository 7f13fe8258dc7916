//! binspect CLI
//!
//! Command-line front-end: list the known parsers, explore the field tree of
//! a file, search field values, print a summary or write an edited copy.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser as _, Subcommand};
use tracing::{debug, info};

use binspect_core::text_handler::human_filesize_value;
use binspect_core::{config, Value};
use binspect_editor::{Editor, LeafKind};
use binspect_parsers::logging::{self, TracingConfig};
use binspect_parsers::{
    create_parser, format_field_line, list_fields, log_parse_complete, log_parse_error, log_parse_start, CreateOptions,
    Grep, GrepOptions, ListOptions, Parser, GLOBAL_REGISTRY,
};

/// binspect - explore, search and edit binary files field by field
#[derive(clap::Parser)]
#[command(name = "binspect")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the available parsers
    ParserList,

    /// Search field values of files
    Grep(GrepArgs),

    /// Print the field tree of a file
    List(ListArgs),

    /// Show the parser and summary of a file
    Info(InfoArgs),

    /// Write an edited copy of a file
    Edit(EditArgs),
}

#[derive(Args)]
struct GrepArgs {
    /// Text to search (matched literally)
    pattern: String,

    /// Files to search
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Case sensitive search
    #[arg(long)]
    case: bool,

    /// Don't print the offset of matches
    #[arg(long)]
    no_addr: bool,

    /// Don't print the matched value
    #[arg(long)]
    no_value: bool,

    /// Print the field path
    #[arg(long)]
    path: bool,

    /// Search every field, not only strings
    #[arg(long)]
    all: bool,

    /// Report progress on stderr
    #[arg(long)]
    percent: bool,

    /// Use this parser instead of guessing
    #[arg(long = "parser", value_name = "ID")]
    parser_id: Option<String>,
}

#[derive(Args)]
struct ListArgs {
    /// File to explore
    file: PathBuf,

    /// Maximum depth of the listing
    #[arg(short, long)]
    depth: Option<usize>,

    /// Only list fields whose path matches this glob
    #[arg(long)]
    filter: Option<String>,

    /// Use this parser instead of guessing
    #[arg(long = "parser", value_name = "ID")]
    parser_id: Option<String>,
}

#[derive(Args)]
struct InfoArgs {
    /// File to inspect
    file: PathBuf,

    /// Use this parser instead of guessing
    #[arg(long = "parser", value_name = "ID")]
    parser_id: Option<String>,
}

#[derive(Args)]
struct EditArgs {
    /// File to edit
    file: PathBuf,

    /// Delete the field at PATH (can be repeated)
    #[arg(long, value_name = "PATH")]
    delete: Vec<String>,

    /// Set the field at PATH to VALUE (can be repeated)
    #[arg(long, value_name = "PATH=VALUE")]
    set: Vec<String>,

    /// Output file
    #[arg(short, long)]
    output: PathBuf,

    /// Use this parser instead of guessing
    #[arg(long = "parser", value_name = "ID")]
    parser_id: Option<String>,
}

fn setup_logging(verbosity: u8, quiet: bool) {
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };

    config::update(|config| {
        config.quiet = quiet;
        config.verbose = verbosity >= 1;
        config.debug = verbosity >= 2;
    });

    logging::init_with_config(TracingConfig {
        default_level: level.to_string(),
        show_target: verbosity >= 2,
        show_thread_ids: verbosity >= 3,
        show_file: verbosity >= 3,
        show_line_number: verbosity >= 3,
    });
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::ParserList => cmd_parser_list(cli.format),
        Commands::Grep(args) => cmd_grep(args, cli.format),
        Commands::List(args) => cmd_list(args, cli.format),
        Commands::Info(args) => cmd_info(args, cli.format),
        Commands::Edit(args) => cmd_edit(args),
    }
}

fn open_parser(path: &Path, parser_id: Option<String>) -> Result<Parser> {
    if !path.exists() {
        bail!("File not found: {:?}", path);
    }
    log_parse_start!(parser_id.as_deref().unwrap_or("<guess>"), path.display());

    let options = CreateOptions {
        force_parser: parser_id,
        ..CreateOptions::default()
    };
    match create_parser(path, &options) {
        Ok(Some(parser)) => Ok(parser),
        Ok(None) => Err(anyhow!("Unable to parse file: {:?}", path)),
        Err(err) => {
            log_parse_error!(path.display(), &err);
            Err(err).with_context(|| format!("Failed to open {:?}", path))
        }
    }
}

fn cmd_parser_list(format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&GLOBAL_REGISTRY.list())?);
        }
        OutputFormat::Text => {
            let stdout = io::stdout();
            GLOBAL_REGISTRY.print_list(&mut stdout.lock())?;
        }
    }
    Ok(())
}

fn cmd_grep(args: GrepArgs, format: OutputFormat) -> Result<()> {
    let options = GrepOptions {
        case_sensitive: args.case,
        all_fields: args.all,
        show_addr: !args.no_addr,
        show_value: !args.no_value,
        show_path: args.path,
        show_filename: args.files.len() > 1,
    };
    let grep = Grep::new(&args.pattern, options)?;

    let mut all_matches = Vec::new();
    for file in &args.files {
        let parser = match open_parser(file, args.parser_id.clone()) {
            Ok(parser) => parser,
            Err(err) => {
                eprintln!("{:#}", err);
                continue;
            }
        };
        let filename = file.display().to_string();

        let start = Instant::now();
        let mut report = |percent: u32| eprint!("\r[{:>3}%] {}", percent, filename);
        let progress: Option<&mut dyn FnMut(u32)> = if args.percent { Some(&mut report) } else { None };
        let matches = grep.search(parser.root(), progress);
        if args.percent {
            eprintln!();
        }
        log_parse_complete!(parser.id(), start.elapsed(), parser.root().tree().node_count());

        match format {
            OutputFormat::Json => {
                all_matches.extend(matches.into_iter().map(|found| {
                    serde_json::json!({
                        "file": filename,
                        "offset": found.address / 8,
                        "path": found.path,
                        "value": found.value,
                    })
                }));
            }
            OutputFormat::Text => {
                for found in &matches {
                    println!("{}", grep.format_line(&filename, found));
                }
            }
        }
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&all_matches)?);
    }
    Ok(())
}

fn cmd_list(args: ListArgs, format: OutputFormat) -> Result<()> {
    let parser = open_parser(&args.file, args.parser_id)?;
    info!("Listing {:?} with parser {}", args.file, parser.id());

    let options = ListOptions {
        max_depth: args.depth,
        filter: args.filter,
    };
    let fields = logging::instrument_parse(parser.id(), || list_fields(parser.root(), &options));

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&fields)?);
        }
        OutputFormat::Text => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for field in &fields {
                writeln!(out, "{}", format_field_line(field))?;
            }
        }
    }
    Ok(())
}

fn cmd_info(args: InfoArgs, format: OutputFormat) -> Result<()> {
    let parser = open_parser(&args.file, args.parser_id)?;
    let content_size = parser.content_size().map(|bits| bits / 8);

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "path": args.file,
                "parser": parser.id(),
                "description": parser.description(),
                "mime": parser.mime_type(),
                "content_size": content_size,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("File: {:?}", args.file);
            println!("  Parser:       {}", parser.id());
            println!("  Description:  {}", parser.description());
            println!("  MIME type:    {}", parser.mime_type());
            if let Some(size) = content_size {
                println!("  Content size: {}", human_filesize_value(size));
            }
        }
    }
    Ok(())
}

/// Parse `text` as a value for a leaf of `kind`
fn parse_value(kind: LeafKind, text: &str) -> Result<Value> {
    let unsigned = || -> Result<u64> {
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse(),
        };
        parsed.with_context(|| format!("Invalid integer: {:?}", text))
    };
    Ok(match kind {
        LeafKind::Bit => match text.to_lowercase().as_str() {
            "1" | "true" | "yes" => Value::Bool(true),
            "0" | "false" | "no" => Value::Bool(false),
            _ => bail!("Invalid boolean: {:?}", text),
        },
        LeafKind::Bits { .. } | LeafKind::Integer { signed: false, .. } => Value::UInt(unsigned()?),
        LeafKind::Integer { signed: true, .. } => {
            Value::Int(text.parse().with_context(|| format!("Invalid integer: {:?}", text))?)
        }
        LeafKind::Float { .. } => Value::Float(text.parse().with_context(|| format!("Invalid float: {:?}", text))?),
        LeafKind::Bytes => Value::Bytes(text.as_bytes().to_vec()),
        LeafKind::String { .. } | LeafKind::Character => Value::Text(text.to_string()),
        LeafKind::ReadOnly => bail!("Field is read only"),
    })
}

fn cmd_edit(args: EditArgs) -> Result<()> {
    let parser = open_parser(&args.file, args.parser_id)?;
    let mut editor = Editor::new(&parser);

    for path in &args.delete {
        editor.delete(path).with_context(|| format!("Failed to delete {}", path))?;
        debug!("Deleted {}", path);
    }

    for assignment in &args.set {
        let (path, text) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected PATH=VALUE, got {:?}", assignment))?;
        let kind = editor
            .field_mut(path)
            .with_context(|| format!("Failed to find {}", path))?
            .as_leaf()
            .map(|leaf| leaf.kind())
            .ok_or_else(|| anyhow!("{} is a field set", path))?;
        let value = parse_value(kind, text)?;
        editor
            .set_value(path, value)
            .with_context(|| format!("Failed to set {}", path))?;
        debug!("Set {} = {}", path, text);
    }

    if !editor.is_altered() {
        info!("No change requested, writing an identical copy");
    }
    let written = editor.save(&args.output)?;
    println!("Wrote {:?} ({})", args.output, human_filesize_value(written));
    Ok(())
}
