//! Command-line extraction front-end.
//!
//! Walks the requested inputs, drives the library pipeline over each
//! recognized container, and writes recovered images into the output
//! directory as zero-padded numbered files (with optional symlinks from
//! recovered original names).
use clap::{ArgAction, Parser, ValueEnum};
use log::{LevelFilter, debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use vignette::common::{Error, Result};
use vignette::pipeline::{ExtractionSummary, Pipeline, Thumbnail, ThumbnailSink};

#[cfg(feature = "esedb")]
use vignette::esedb::EsedbView;

// Exit codes preserved from the tool's established contract.
const EXIT_OK: u8 = 0;
const EXIT_ARG: u8 = 2;
const EXIT_INPUT: u8 = 10;
const EXIT_OUTPUT: u8 = 11;
const EXIT_PROCESSING: u8 = 12;
const EXIT_ENTRY: u8 = 14;
const EXIT_SYMLINK: u8 = 15;
const EXIT_MODE: u8 = 16;
const EXIT_ESEDB: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Single cache file
    #[value(name = "f")]
    File,
    /// Every recognized cache file directly in a directory
    #[value(name = "d")]
    Directory,
    /// Recursive directory scan
    #[value(name = "r")]
    Recursive,
    /// Treat the input as a Windows system root and find caches itself
    #[value(name = "a")]
    Automatic,
}

#[derive(Debug, Parser)]
#[command(
    name = "vignette",
    version,
    about = "Recover thumbnails and metadata from Windows thumbnail caches"
)]
struct Args {
    /// Input file, directory, or system root (mode-dependent)
    input: PathBuf,

    /// Directory extracted images are written to
    #[arg(short = 'o', value_name = "DIR")]
    output: Option<PathBuf>,

    /// Operating mode
    #[arg(short = 'm', value_name = "MODE", value_enum, default_value = "f")]
    mode: Mode,

    /// Windows Search database (Windows.edb) to cross-reference
    #[arg(short = 'e', value_name = "FILE")]
    esedb: Option<PathBuf>,

    /// Symlink recovered original names to the numbered files
    #[arg(short = 's')]
    symlinks: bool,

    /// Only report errors
    #[arg(short = 'q', conflicts_with = "verbose")]
    quiet: bool,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Print recovered names as UTF-8 instead of escaping them
    #[arg(short = 'U')]
    utf8_names: bool,
}

/// Sink writing numbered image files, with an optional `.thumbs/` symlink
/// farm mapping recovered names onto them.
struct FileSink {
    dir: PathBuf,
    symlinks: bool,
    utf8_names: bool,
    index: usize,
    written: usize,
    symlink_failures: usize,
}

impl FileSink {
    fn create(dir: &Path, symlinks: bool, utf8_names: bool) -> Result<Self> {
        fs::create_dir_all(dir)?;
        if symlinks {
            fs::create_dir_all(dir.join(".thumbs"))?;
        }
        Ok(FileSink {
            dir: dir.to_path_buf(),
            symlinks,
            utf8_names,
            index: 0,
            written: 0,
            symlink_failures: 0,
        })
    }

    fn printable(&self, name: &str) -> String {
        if self.utf8_names {
            name.to_string()
        } else {
            name.chars()
                .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
                .collect()
        }
    }

    fn link_original_name(&mut self, thumbnail: &Thumbnail, file_name: &str) {
        let Some(name) = thumbnail.original_name.as_deref() else {
            return;
        };
        let safe: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
            .collect();
        let link = self.dir.join(".thumbs").join(&safe);
        let target = Path::new("..").join(file_name);
        #[cfg(unix)]
        if let Err(e) = std::os::unix::fs::symlink(&target, &link) {
            warn!("symlink {:?} -> {:?} failed: {e}", self.printable(&safe), target);
            self.symlink_failures += 1;
        }
        #[cfg(not(unix))]
        {
            let _ = (link, target);
            debug!("symlinks unsupported on this platform");
        }
    }
}

impl ThumbnailSink for FileSink {
    fn write(&mut self, thumbnail: &Thumbnail) -> Result<()> {
        let index = self.index;
        self.index += 1;

        if thumbnail.bytes.is_empty() {
            if let Some(id) = thumbnail.cache_id {
                debug!("entry {index}: dormant placeholder for cache id 0x{id:016x}");
            }
            return Ok(());
        }

        let extension = thumbnail.mime.map_or("bin", |m| m.extension());
        let file_name = format!("{index:010}.{extension}");
        fs::write(self.dir.join(&file_name), &thumbnail.bytes)?;
        self.written += 1;

        if let Some(name) = thumbnail.original_name.as_deref() {
            info!("{file_name} <- {}", self.printable(name));
        }
        if self.symlinks {
            self.link_original_name(thumbnail, &file_name);
        }
        Ok(())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.quiet {
        LevelFilter::Error
    } else {
        match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new().filter_level(level).init();

    let Some(output) = args.output.as_deref() else {
        eprintln!("error: an output directory (-o DIR) is required");
        return ExitCode::from(EXIT_ARG);
    };

    let inputs = match collect_inputs(&args) {
        Ok(inputs) => inputs,
        Err(code) => return ExitCode::from(code),
    };
    if inputs.is_empty() {
        eprintln!("error: no cache files found under {:?}", args.input);
        return ExitCode::from(EXIT_INPUT);
    }

    let esedb_view = match load_esedb(&args) {
        Ok(view) => view,
        Err(code) => return ExitCode::from(code),
    };

    let mut sink = match FileSink::create(output, args.symlinks, args.utf8_names) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("error: cannot prepare output directory: {e}");
            return ExitCode::from(EXIT_OUTPUT);
        }
    };

    let mut worst = EXIT_OK;
    let mut totals = ExtractionSummary::default();
    #[cfg(not(feature = "esedb"))]
    let _ = &esedb_view;
    for input in &inputs {
        info!("processing {input:?}");
        #[cfg(feature = "esedb")]
        let mut pipeline = Pipeline::new(&mut sink).with_esedb(esedb_view.as_ref());
        #[cfg(not(feature = "esedb"))]
        let mut pipeline = Pipeline::new(&mut sink);

        match pipeline.run(input) {
            Ok(summary) => {
                debug!("{input:?}: {summary:?}");
                totals.extracted += summary.extracted;
                totals.dormant += summary.dormant;
                totals.skipped += summary.skipped;
                totals.warnings += summary.warnings;
            }
            Err(e) => {
                // Structural errors are fatal for this input only.
                warn!("{input:?}: {e}");
                worst = worst.max(exit_code_for(&e));
                if matches!(e, Error::SinkWrite(_)) {
                    break;
                }
            }
        }
    }

    if sink.symlink_failures > 0 {
        worst = worst.max(EXIT_SYMLINK);
    }
    if !args.quiet {
        println!(
            "{} thumbnails written ({} extracted, {} dormant, {} skipped, {} warnings)",
            sink.written, totals.extracted, totals.dormant, totals.skipped, totals.warnings
        );
    }
    ExitCode::from(worst)
}

fn exit_code_for(error: &Error) -> u8 {
    match error {
        Error::Io(_) => EXIT_INPUT,
        Error::SinkWrite(_) => EXIT_OUTPUT,
        Error::EntryLengthMismatch { .. } | Error::MissingEoi | Error::UnknownEntryType(_) => {
            EXIT_ENTRY
        }
        Error::EsedbUnreadable(_) | Error::EsedbSchemaMissing => EXIT_ESEDB,
        _ => EXIT_PROCESSING,
    }
}

/// Resolve the input list for the selected mode.
fn collect_inputs(args: &Args) -> std::result::Result<Vec<PathBuf>, u8> {
    let input = &args.input;
    match args.mode {
        Mode::File => {
            if !input.is_file() {
                eprintln!("error: {input:?} is not a file (mode f)");
                return Err(EXIT_MODE);
            }
            Ok(vec![input.clone()])
        }
        Mode::Directory | Mode::Recursive => {
            if !input.is_dir() {
                eprintln!("error: {input:?} is not a directory");
                return Err(EXIT_MODE);
            }
            let mut found = Vec::new();
            scan_dir(input, args.mode == Mode::Recursive, &mut found)
                .map_err(|_| EXIT_INPUT)?;
            found.sort();
            Ok(found)
        }
        Mode::Automatic => {
            if !input.is_dir() {
                eprintln!("error: {input:?} is not a system root");
                return Err(EXIT_MODE);
            }
            Ok(find_explorer_caches(input))
        }
    }
}

/// Collect files bearing a recognized container signature.
fn scan_dir(dir: &Path, recursive: bool, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                scan_dir(&path, true, found)?;
            }
        } else if has_cache_signature(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn has_cache_signature(path: &Path) -> bool {
    use vignette::pipeline::ContainerKind;
    let Ok(mut reader) = vignette::common::ByteReader::open(path) else {
        return false;
    };
    match reader.read_at_most(0, 8) {
        Ok(leading) => ContainerKind::sniff(&leading) != ContainerKind::Unknown,
        Err(_) => false,
    }
}

/// Automatic mode: per-user Explorer cache files under a system root.
fn find_explorer_caches(base: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let users = base.join("Users");
    let Ok(entries) = fs::read_dir(&users) else {
        return found;
    };
    for entry in entries.flatten() {
        let explorer = entry
            .path()
            .join("AppData/Local/Microsoft/Windows/Explorer");
        let Ok(files) = fs::read_dir(&explorer) else {
            continue;
        };
        for file in files.flatten() {
            let name = file.file_name();
            let name = name.to_string_lossy().to_ascii_lowercase();
            if name.starts_with("thumbcache_") && name.ends_with(".db") {
                found.push(file.path());
            }
        }
    }
    found.sort();
    found
}

/// Default Windows Search database location under a system root.
fn default_esedb_path(base: &Path) -> PathBuf {
    base.join("ProgramData/Microsoft/Search/Data/Applications/Windows/Windows.edb")
}

#[cfg(feature = "esedb")]
fn load_esedb(args: &Args) -> std::result::Result<Option<EsedbView>, u8> {
    let path = match (&args.esedb, args.mode) {
        (Some(path), _) => Some(path.clone()),
        (None, Mode::Automatic) => {
            let candidate = default_esedb_path(&args.input);
            candidate.is_file().then_some(candidate)
        }
        _ => None,
    };
    let Some(path) = path else { return Ok(None) };

    match EsedbView::open(&path) {
        Ok(view) => {
            info!("loaded {} property-store rows from {path:?}", view.len());
            Ok(Some(view))
        }
        Err(e) => {
            // An explicitly requested database that cannot be read is an
            // error; an auto-discovered one just disables the join.
            if args.esedb.is_some() {
                eprintln!("error: {e}");
                Err(EXIT_ESEDB)
            } else {
                warn!("ignoring unreadable search database {path:?}: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(not(feature = "esedb"))]
fn load_esedb(args: &Args) -> std::result::Result<Option<()>, u8> {
    if args.esedb.is_some() {
        eprintln!("error: this build does not include ESE database support");
        return Err(EXIT_ESEDB);
    }
    let _ = default_esedb_path(&args.input);
    Ok(None)
}
