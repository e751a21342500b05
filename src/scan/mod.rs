pub mod obj;
pub mod ply;

pub use obj::{scale_obj, scale_obj_file};
pub use ply::{scale_ply, scale_ply_file};

use crate::error::{ScaleError, ScaleResult};
use crate::units::Conversion;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Scan file formats that can be rescaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanFormat {
    /// Wavefront OBJ, text only.
    Obj,
    /// Polygon File Format, ASCII or binary.
    Ply,
}

impl ScanFormat {
    /// Detect the format from a `.obj` / `.ply` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<ScanFormat> {
        let extension = path.as_ref().extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "obj" => Some(ScanFormat::Obj),
            "ply" => Some(ScanFormat::Ply),
            _ => None,
        }
    }

    /// Guess the format from the first bytes of a file.
    /// PLY starts with its magic line, OBJ is any text that is not PLY.
    pub fn sniff(head: &[u8]) -> Option<ScanFormat> {
        let first_line = head.split(|b| *b == b'\n').next().unwrap_or_default();
        if trim_line_ending(first_line) == b"ply" {
            Some(ScanFormat::Ply)
        } else if head.contains(&0) {
            None
        } else {
            Some(ScanFormat::Obj)
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScanFormat::Obj => "OBJ",
            ScanFormat::Ply => "PLY",
        }
    }
}

/// A discovered scan: where it lives and what it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFile {
    path: PathBuf,
    format: ScanFormat,
}

impl ScanFile {
    pub fn new<P: Into<PathBuf>>(path: P, format: ScanFormat) -> ScanFile {
        ScanFile {
            path: path.into(),
            format,
        }
    }

    /// `None` unless the path has a scan extension.
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Option<ScanFile> {
        let path = path.into();
        let format = ScanFormat::from_path(&path)?;
        Some(ScanFile { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ScanFormat {
        self.format
    }
}

/// `<stem>_<unit><ext>` next to `source`, e.g. `scan.ply` -> `scan_mm.ply`.
pub fn output_path<P: AsRef<Path>>(source: P, unit_label: &str) -> ScaleResult<PathBuf> {
    let source = source.as_ref();
    let stem = source.file_stem().ok_or_else(|| {
        ScaleError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no file name in {}", source.display()),
        ))
    })?;

    let mut name = stem.to_os_string();
    name.push("_");
    name.push(unit_label);
    if let Some(extension) = source.extension() {
        name.push(".");
        name.push(extension);
    }
    Ok(source.with_file_name(name))
}

/// Rewrite `source` into its output path through `transform`.
///
/// The result goes to a temporary file next to the output and only replaces
/// the output name once `transform` has succeeded, so a failed scan leaves
/// nothing behind. The source is opened read-only and never written.
pub(crate) fn rewrite_file<F>(
    source: &Path,
    format: ScanFormat,
    unit_label: &str,
    transform: F,
) -> ScaleResult<PathBuf>
where
    F: FnOnce(&mut BufReader<File>, &mut BufWriter<&mut File>) -> ScaleResult<usize>,
{
    let output = output_path(source, unit_label)?;
    let input_file = File::open(source)?;
    let permissions = input_file.metadata()?.permissions();
    let mut input_reader = BufReader::new(input_file);

    let sniffed = ScanFormat::sniff(input_reader.fill_buf()?);
    if sniffed != Some(format) {
        return Err(ScaleError::parse(format!(
            "{} does not contain {} data",
            source.display(),
            format.name()
        )));
    }

    let directory = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(directory)?;
    let vertex_count = {
        let mut output_writer = BufWriter::new(temp_file.as_file_mut());
        let vertex_count = transform(&mut input_reader, &mut output_writer)?;
        output_writer.flush()?;
        vertex_count
    };
    std::fs::set_permissions(temp_file.path(), permissions)?;
    temp_file.persist(&output).map_err(|e| e.error)?;

    debug!(
        "{}: scaled {} vertices into {}",
        source.display(),
        vertex_count,
        output.display()
    );
    Ok(output)
}

/// Scale one scan, returning the path of the file written.
pub fn scale_scan(scan: &ScanFile, conversion: &Conversion) -> ScaleResult<PathBuf> {
    debug!("{}: scaling as {}", scan.path.display(), scan.format.name());
    match scan.format {
        ScanFormat::Obj => scale_obj_file(&scan.path, conversion),
        ScanFormat::Ply => scale_ply_file(&scan.path, conversion),
    }
}

/// Outcome for one scan of a batch.
#[derive(Debug)]
pub struct ScanReport {
    pub source: PathBuf,
    pub outcome: ScaleResult<PathBuf>,
}

impl ScanReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Scale every scan in order. A failing scan is reported and skipped.
pub fn scale_scans(scans: &[ScanFile], conversion: &Conversion) -> Vec<ScanReport> {
    scans
        .iter()
        .map(|scan| ScanReport {
            source: scan.path.clone(),
            outcome: scale_scan(scan, conversion),
        })
        .collect()
}

/// Find the scans at `path`.
///
/// A file is returned as is when it has a scan extension. A directory is
/// searched for `.obj` and `.ply` files, descending into child directories
/// only when `recurse` is set. Results are ordered by path.
pub fn find_scans<P: AsRef<Path>>(path: P, recurse: bool) -> ScaleResult<Vec<ScanFile>> {
    let path = path.as_ref();
    if path.is_file() {
        if recurse {
            warn!(
                "Ignoring recursion flag for single-file input {}",
                path.display()
            );
        }
        return Ok(ScanFile::from_path(path).into_iter().collect());
    }

    let max_depth = if recurse { usize::MAX } else { 1 };
    let mut scans = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(scan) = ScanFile::from_path(entry.path()) {
            scans.push(scan);
        }
    }
    Ok(scans)
}

pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub(crate) fn line_ending(line: &[u8]) -> &'static [u8] {
    if line.ends_with(b"\r\n") {
        b"\r\n"
    } else if line.ends_with(b"\n") {
        b"\n"
    } else {
        b""
    }
}
