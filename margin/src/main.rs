use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use log::{debug, info};
use margin::{Document, Format, Lookahead, ParseOptions};

#[derive(Debug, Parser)]
#[command(
    name = "margin",
    about = "Margin outline tooling built on the margin crate",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse Margin (or JSON) files and print the tree as JSON.
    Parse(ParseArgs),

    /// Re-render files as Margin text.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Files, or directories containing `.margin` files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
    /// Print a debug representation instead of JSON.
    #[arg(long)]
    debug: bool,
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Files, or directories containing `.margin` files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Input format. Defaults to JSON for `.json` files and Margin otherwise.
    #[arg(long, value_enum)]
    from: Option<InputFormat>,
    /// Use the historical single-lookahead nesting rules.
    #[arg(long)]
    single_lookahead: bool,
    /// Parse a final line that has no trailing newline.
    #[arg(long)]
    keep_unterminated: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum InputFormat {
    Margin,
    Json,
}

impl From<InputFormat> for Format {
    fn from(format: InputFormat) -> Self {
        match format {
            InputFormat::Margin => Format::Margin,
            InputFormat::Json => Format::Json,
        }
    }
}

impl SourceArgs {
    fn options(&self) -> ParseOptions {
        ParseOptions {
            lookahead: if self.single_lookahead {
                Lookahead::Single
            } else {
                Lookahead::Rescan
            },
            keep_unterminated_line: self.keep_unterminated,
        }
    }

    fn load(&self, path: &Path) -> Result<Document> {
        Document::open_with_options(path, self.from.map(Format::from), self.options())
            .with_context(|| format!("loading {:?}", path))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose)?;
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Render(args) => handle_render(args),
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the level picked from `--verbose`.
fn init_logging(verbose: bool) -> Result<LoggerHandle> {
    let level = if verbose { "debug" } else { "warn" };
    let handle = Logger::try_with_env_or_str(level)
        .context("configuring logger")?
        .log_to_stderr()
        .start()
        .context("starting logger")?;
    Ok(handle)
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs {
        inputs,
        pretty,
        debug,
        source,
    } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Margin files found in the provided inputs");
    }

    let mut parsed = Vec::new();
    for path in expanded {
        info!("parsing {:?}", path);
        let doc = source.load(&path)?;
        parsed.push((path, doc));
    }

    if debug {
        for (idx, (path, doc)) in parsed.iter().enumerate() {
            if parsed.len() > 1 {
                println!("== {} ==", path.display());
            }
            println!("{:#?}", doc.root());
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
        return Ok(());
    }

    if let [(_, doc)] = parsed.as_slice() {
        println!("{}", doc.to_json(pretty)?);
        return Ok(());
    }

    #[derive(serde::Serialize)]
    struct JsonOutput<'a> {
        path: String,
        root: &'a margin::Node,
    }

    let payload: Vec<JsonOutput<'_>> = parsed
        .iter()
        .map(|(path, doc)| JsonOutput {
            path: path.display().to_string(),
            root: doc.root(),
        })
        .collect();
    let json = if pretty {
        serde_json::to_string_pretty(&payload)?
    } else {
        serde_json::to_string(&payload)?
    };
    println!("{json}");
    Ok(())
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let RenderArgs { inputs, source } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Margin files found in the provided inputs");
    }

    let many = expanded.len() > 1;
    for (idx, path) in expanded.iter().enumerate() {
        info!("rendering {:?}", path);
        let text = source.load(path)?.to_margin();
        if many {
            if idx > 0 {
                println!();
            }
            println!("== {} ==", path.display());
        }
        print!("{text}");
    }
    Ok(())
}

fn is_margin_file(path: &Path) -> bool {
    path.extension().map(|ext| ext == "margin").unwrap_or(false)
}

/// Explicit files are taken as given; directories contribute their `.margin` files.
fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            debug!("scanning directory {:?}", canonical);
            for file in collect_margin_files(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        } else {
            anyhow::bail!("{:?} is neither a file nor a directory", canonical);
        }
    }
    Ok(out)
}

fn collect_margin_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(dir, &mut out, &mut visited)?;
    out.sort();
    out.dedup();
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_margin_file(&canonical) {
        debug!("found margin file {:?}", canonical);
        out.push(canonical);
    }
    Ok(())
}
