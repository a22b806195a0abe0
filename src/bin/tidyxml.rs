//! Command-line inspection tool.
//!
//! Parses each file and prints either a debug view of the tree or its text
//! content. Parse errors and diagnostics go to stderr; the exit code is 1 if
//! any file failed to parse.

use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tidyxml::parser::{self, DtdCache, FileResolver, ParseOptions};
use tidyxml::tree::{Document, NodeId, NodeKind};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// tidyxml -- parse XML files and inspect the resulting tree.
#[derive(Parser, Debug)]
#[command(name = "tidyxml", version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// XML files to process (use `-` for stdin).
    #[arg(required = true)]
    files: Vec<String>,

    /// Print diagnostics and debug logging.
    #[arg(long)]
    verbose: bool,

    // -- Parsing options ---------------------------------------------------
    /// Repair common malformations instead of failing.
    #[arg(long)]
    tidy: bool,

    /// Directory holding local copies of DTDs, named after their public
    /// identifiers.
    #[arg(long, value_name = "DIR")]
    dtd_dir: Option<String>,

    /// Do not load external DTD subsets.
    #[arg(long)]
    no_external_dtd: bool,

    // -- Output options ----------------------------------------------------
    /// Do not output anything for well-formed files.
    #[arg(long)]
    noout: bool,

    /// Print a debug representation of the document tree.
    #[arg(long)]
    debug: bool,

    /// Print timing information for reading and parsing.
    #[arg(long)]
    timing: bool,
}

const EXIT_SUCCESS: u8 = 0;
const EXIT_PARSE_ERROR: u8 = 1;

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let mut resolver = FileResolver::new();
    if let Some(dir) = &cli.dtd_dir {
        resolver = resolver.local_dir(dir);
    }
    // One cache for all files on the command line.
    let options = ParseOptions::default()
        .tidy(cli.tidy)
        .load_external_dtd(!cli.no_external_dtd)
        .resolver(Arc::new(resolver))
        .dtd_cache(Arc::new(DtdCache::new()));

    let mut worst_exit = EXIT_SUCCESS;
    for file in &cli.files {
        worst_exit = worst_exit.max(process_file(&cli, &options, file));
    }
    ExitCode::from(worst_exit)
}

/// Processes a single input file and returns an exit code.
fn process_file(cli: &Cli, options: &ParseOptions, filename: &str) -> u8 {
    let start = Instant::now();

    let result = if filename == "-" {
        let mut input = Vec::new();
        if let Err(e) = io::stdin().read_to_end(&mut input) {
            eprintln!("{filename}: failed to read: {e}");
            return EXIT_PARSE_ERROR;
        }
        let options = options.clone().source_name("-");
        parser::parse_bytes_with_options(&input, &options)
    } else {
        parser::parse_file(filename, options)
    };

    if cli.timing {
        eprintln!("Parsing {filename} took {:?}", start.elapsed());
    }

    let doc = match result {
        Ok(doc) => doc,
        Err(err) => {
            if cli.verbose {
                for diag in &err.diagnostics {
                    eprintln!("{diag}");
                }
            }
            eprintln!("{err}");
            return EXIT_PARSE_ERROR;
        }
    };

    if cli.verbose || cli.tidy {
        for diag in &doc.diagnostics {
            eprintln!("{diag}");
        }
    }

    if cli.noout {
        return EXIT_SUCCESS;
    }
    let output = if cli.debug {
        format_debug_tree(&doc)
    } else {
        let mut text = doc.text_content(doc.root());
        text.push('\n');
        text
    };
    let mut stdout = io::stdout().lock();
    if let Err(e) = stdout.write_all(output.as_bytes()) {
        eprintln!("error writing output: {e}");
        return EXIT_PARSE_ERROR;
    }
    EXIT_SUCCESS
}

// ---------------------------------------------------------------------------
// Debug tree output
// ---------------------------------------------------------------------------

/// Formats the document tree in a line-per-node debug format.
fn format_debug_tree(doc: &Document) -> String {
    let mut output = String::new();
    output.push_str("DOCUMENT");
    if let Some(version) = &doc.version {
        let _ = write!(output, " version={version}");
    }
    if let Some(encoding) = &doc.encoding {
        let _ = write!(output, " encoding={encoding}");
    }
    if let Some(standalone) = doc.standalone {
        let _ = write!(output, " standalone={}", if standalone { "yes" } else { "no" });
    }
    output.push('\n');
    for sheet in &doc.style_sheets {
        let _ = writeln!(output, "  STYLESHEET {}", sheet.href);
    }
    for child in doc.children(doc.root()) {
        format_debug_node(doc, child, 1, &mut output);
    }
    output
}

/// Recursively formats a node for debug output.
fn format_debug_node(doc: &Document, id: NodeId, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);

    match &doc.node(id).kind {
        NodeKind::Element { name, .. } => {
            let _ = writeln!(out, "{indent}ELEMENT {name}");
            for (attr, value) in doc.attributes(id) {
                let _ = writeln!(out, "{indent}  ATTRIBUTE {attr}={value}");
            }
            for child in doc.children(id) {
                format_debug_node(doc, child, depth + 1, out);
            }
        }
        NodeKind::Text { content } => {
            let _ = writeln!(out, "{indent}TEXT {}", content.replace('\n', "\\n"));
        }
        NodeKind::CData { content } => {
            let _ = writeln!(out, "{indent}CDATA {content}");
        }
        NodeKind::Comment { content } => {
            let _ = writeln!(out, "{indent}COMMENT {content}");
        }
        NodeKind::ProcessingInstruction { target, data } => {
            let _ = match data {
                Some(d) => writeln!(out, "{indent}PI {target} {d}"),
                None => writeln!(out, "{indent}PI {target}"),
            };
        }
        NodeKind::EntityRef { name } => {
            let _ = writeln!(out, "{indent}ENTITY_REF {name}");
        }
        NodeKind::DocumentType(dt) => {
            let _ = write!(out, "{indent}DOCTYPE {}", dt.name);
            if !dt.external_id.is_empty() {
                let _ = write!(out, " {}", dt.external_id);
            }
            out.push('\n');
            let mut entities: Vec<_> = dt.entities.values().collect();
            entities.sort_by(|a, b| a.name.cmp(&b.name));
            for entity in entities {
                let _ = writeln!(out, "{indent}  ENTITY {}", entity.name);
            }
            let mut elements: Vec<_> = dt.elements.values().collect();
            elements.sort_by(|a, b| a.name.cmp(&b.name));
            for element in elements {
                let _ = writeln!(out, "{indent}  ELEMENT_DECL {} {}", element.name, element.content_model);
            }
        }
        NodeKind::Entity(decl) => {
            let _ = writeln!(out, "{indent}ENTITY {}", decl.name);
        }
        NodeKind::Document | NodeKind::DocumentFragment | NodeKind::Attribute { .. } => {
            for child in doc.children(id) {
                format_debug_node(doc, child, depth, out);
            }
        }
    }
}
