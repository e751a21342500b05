//! PLY rescaling, ASCII and binary.
//!
//! The header is kept line for line and parsed with ply-rs. Data is walked
//! record by record according to the header: the x, y and z properties of the
//! `vertex` element are decoded, scaled and re-encoded in their declared type
//! and byte order, everything else is copied through as raw bytes.

use crate::error::{ScaleError, ScaleResult};
use crate::nalgebra_types::ScaleField;
use crate::scan::{line_ending, rewrite_file, trim_line_ending, ScanFormat};
use crate::units::Conversion;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, ElementDef, Encoding, Header, PropertyType, ScalarType};
use std::borrow::Cow;
use std::fmt;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const AXES: [&str; 3] = ["x", "y", "z"];

/// On-disk scalar types, by width and signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

/// A decoded scalar that remembers its on-disk type.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
}

impl From<&ScalarType> for ScalarKind {
    fn from(scalar_type: &ScalarType) -> ScalarKind {
        match scalar_type {
            ScalarType::Char => ScalarKind::I8,
            ScalarType::UChar => ScalarKind::U8,
            ScalarType::Short => ScalarKind::I16,
            ScalarType::UShort => ScalarKind::U16,
            ScalarType::Int => ScalarKind::I32,
            ScalarType::UInt => ScalarKind::U32,
            ScalarType::Float => ScalarKind::F32,
            ScalarType::Double => ScalarKind::F64,
        }
    }
}

impl ScalarKind {
    fn width(self) -> usize {
        match self {
            ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::F64 => 8,
        }
    }

    fn read<B: ByteOrder, R: Read>(self, reader: &mut R) -> std::io::Result<Scalar> {
        Ok(match self {
            ScalarKind::I8 => Scalar::I8(reader.read_i8()?),
            ScalarKind::U8 => Scalar::U8(reader.read_u8()?),
            ScalarKind::I16 => Scalar::I16(reader.read_i16::<B>()?),
            ScalarKind::U16 => Scalar::U16(reader.read_u16::<B>()?),
            ScalarKind::I32 => Scalar::I32(reader.read_i32::<B>()?),
            ScalarKind::U32 => Scalar::U32(reader.read_u32::<B>()?),
            ScalarKind::F32 => Scalar::F32(reader.read_f32::<B>()?),
            ScalarKind::F64 => Scalar::F64(reader.read_f64::<B>()?),
        })
    }

    fn parse(self, token: &str) -> Result<Scalar, String> {
        let error = |e: &dyn fmt::Display| format!("invalid {:?} value '{}': {}", self, token, e);
        Ok(match self {
            ScalarKind::I8 => Scalar::I8(token.parse().map_err(|e| error(&e))?),
            ScalarKind::U8 => Scalar::U8(token.parse().map_err(|e| error(&e))?),
            ScalarKind::I16 => Scalar::I16(token.parse().map_err(|e| error(&e))?),
            ScalarKind::U16 => Scalar::U16(token.parse().map_err(|e| error(&e))?),
            ScalarKind::I32 => Scalar::I32(token.parse().map_err(|e| error(&e))?),
            ScalarKind::U32 => Scalar::U32(token.parse().map_err(|e| error(&e))?),
            ScalarKind::F32 => Scalar::F32(token.parse().map_err(|e| error(&e))?),
            ScalarKind::F64 => Scalar::F64(token.parse().map_err(|e| error(&e))?),
        })
    }
}

impl Scalar {
    fn scaled(self, factor: f64) -> Scalar {
        match self {
            Scalar::I8(v) => Scalar::I8(v.scaled(factor)),
            Scalar::U8(v) => Scalar::U8(v.scaled(factor)),
            Scalar::I16(v) => Scalar::I16(v.scaled(factor)),
            Scalar::U16(v) => Scalar::U16(v.scaled(factor)),
            Scalar::I32(v) => Scalar::I32(v.scaled(factor)),
            Scalar::U32(v) => Scalar::U32(v.scaled(factor)),
            Scalar::F32(v) => Scalar::F32(v.scaled(factor)),
            Scalar::F64(v) => Scalar::F64(v.scaled(factor)),
        }
    }

    fn is_finite(self) -> bool {
        match self {
            Scalar::F32(v) => v.is_finite(),
            Scalar::F64(v) => v.is_finite(),
            _ => true,
        }
    }

    /// `None` when a finite float overflows its type.
    fn checked_scaled(self, factor: f64) -> Option<Scalar> {
        let scaled = self.scaled(factor);
        if self.is_finite() && !scaled.is_finite() {
            None
        } else {
            Some(scaled)
        }
    }

    fn write<B: ByteOrder, W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Scalar::I8(v) => writer.write_i8(v),
            Scalar::U8(v) => writer.write_u8(v),
            Scalar::I16(v) => writer.write_i16::<B>(v),
            Scalar::U16(v) => writer.write_u16::<B>(v),
            Scalar::I32(v) => writer.write_i32::<B>(v),
            Scalar::U32(v) => writer.write_u32::<B>(v),
            Scalar::F32(v) => writer.write_f32::<B>(v),
            Scalar::F64(v) => writer.write_f64::<B>(v),
        }
    }

    /// Length of a list, if this scalar can be one.
    fn as_count(self) -> Option<usize> {
        match self {
            Scalar::I8(v) => usize::try_from(v).ok(),
            Scalar::U8(v) => Some(usize::from(v)),
            Scalar::I16(v) => usize::try_from(v).ok(),
            Scalar::U16(v) => Some(usize::from(v)),
            Scalar::I32(v) => usize::try_from(v).ok(),
            Scalar::U32(v) => usize::try_from(v).ok(),
            Scalar::F32(_) | Scalar::F64(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    // Floats use {:?}: shortest text that parses back to the same value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::I8(v) => write!(f, "{}", v),
            Scalar::U8(v) => write!(f, "{}", v),
            Scalar::I16(v) => write!(f, "{}", v),
            Scalar::U16(v) => write!(f, "{}", v),
            Scalar::I32(v) => write!(f, "{}", v),
            Scalar::U32(v) => write!(f, "{}", v),
            Scalar::F32(v) => write!(f, "{:?}", v),
            Scalar::F64(v) => write!(f, "{:?}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyKind {
    Scalar(ScalarKind),
    List { count: ScalarKind, item: ScalarKind },
}

#[derive(Debug, Clone)]
struct PropertyLayout {
    name: String,
    kind: PropertyKind,
    /// Set for the x, y and z properties of the vertex element.
    scaled: bool,
}

/// The record layout of one element, in declaration order.
#[derive(Debug, Clone)]
struct ElementLayout {
    name: String,
    count: usize,
    properties: Vec<PropertyLayout>,
}

impl ElementLayout {
    fn from_def(element: &ElementDef) -> ScaleResult<ElementLayout> {
        let is_vertex = element.name == "vertex";
        let properties = element
            .properties
            .values()
            .map(|property| {
                let kind = match &property.data_type {
                    PropertyType::Scalar(scalar) => PropertyKind::Scalar(scalar.into()),
                    PropertyType::List(count, item) => PropertyKind::List {
                        count: count.into(),
                        item: item.into(),
                    },
                };
                PropertyLayout {
                    name: property.name.clone(),
                    kind,
                    scaled: is_vertex && AXES.contains(&property.name.as_str()),
                }
            })
            .collect::<Vec<_>>();

        if is_vertex {
            for axis in AXES {
                match properties.iter().find(|p| p.name == axis) {
                    None => {
                        return Err(ScaleError::parse(format!(
                            "vertex element has no '{}' property",
                            axis
                        )))
                    }
                    Some(PropertyLayout {
                        kind: PropertyKind::List { .. },
                        ..
                    }) => {
                        return Err(ScaleError::parse(format!(
                            "vertex property '{}' is a list",
                            axis
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(ElementLayout {
            name: element.name.clone(),
            count: element.count,
            properties,
        })
    }

    fn is_vertex(&self) -> bool {
        self.name == "vertex"
    }

    /// Bytes per record, unless the element has list properties.
    fn record_width(&self) -> Option<usize> {
        self.properties
            .iter()
            .map(|p| match p.kind {
                PropertyKind::Scalar(kind) => Some(kind.width()),
                PropertyKind::List { .. } => None,
            })
            .sum()
    }
}

/// ply-rs keys elements and properties by name, so a repeated name would
/// silently drop a declaration and break the record layout.
fn check_unique_names(lines: &[Vec<u8>]) -> ScaleResult<()> {
    let mut elements: Vec<(String, Vec<String>)> = Vec::new();
    for line in lines {
        let text = String::from_utf8_lossy(line);
        let mut tokens = text.split_ascii_whitespace();
        match tokens.next() {
            Some("element") => {
                let name = tokens.next().unwrap_or_default();
                if elements.iter().any(|(element, _)| element == name) {
                    return Err(ScaleError::parse(format!(
                        "element '{}' is declared twice",
                        name
                    )));
                }
                elements.push((name.to_string(), Vec::new()));
            }
            Some("property") => {
                let name = tokens.last().unwrap_or_default();
                if let Some((element, properties)) = elements.last_mut() {
                    if properties.iter().any(|property| property == name) {
                        return Err(ScaleError::parse(format!(
                            "element '{}' declares property '{}' twice",
                            element, name
                        )));
                    }
                    properties.push(name.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// The header as written in the file plus what ply-rs made of it.
struct PlyHeader {
    /// Raw header lines, `ply` first and `end_header` last.
    lines: Vec<Vec<u8>>,
    header: Header,
    elements: Vec<ElementLayout>,
}

impl PlyHeader {
    fn read<R: BufRead>(reader: &mut R) -> ScaleResult<PlyHeader> {
        let mut lines: Vec<Vec<u8>> = Vec::new();
        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Err(ScaleError::parse("header has no end_header line"));
            }
            if lines.is_empty() && trim_line_ending(&line) != b"ply" {
                return Err(ScaleError::parse("missing 'ply' magic line"));
            }
            let is_end = String::from_utf8_lossy(&line).trim() == "end_header";
            lines.push(line);
            if is_end {
                break;
            }
        }

        check_unique_names(&lines)?;

        // ply-rs reads the header with plain `\n` line endings.
        let mut normalized = Vec::new();
        for line in &lines {
            normalized.extend_from_slice(trim_line_ending(line));
            normalized.push(b'\n');
        }
        let mut raw_header = std::io::Cursor::new(normalized);
        let header = Parser::<DefaultElement>::new()
            .read_header(&mut raw_header)
            .map_err(|e| ScaleError::parse(format!("invalid PLY header: {}", e)))?;

        let elements = header
            .elements
            .values()
            .map(ElementLayout::from_def)
            .collect::<ScaleResult<Vec<_>>>()?;
        if !elements.iter().any(ElementLayout::is_vertex) {
            return Err(ScaleError::parse("header declares no vertex element"));
        }

        Ok(PlyHeader {
            lines,
            header,
            elements,
        })
    }

    /// Write the header back with `comment <unit_label>` before `end_header`.
    fn write_with_unit<W: Write>(&self, writer: &mut W, unit_label: &str) -> ScaleResult<()> {
        if let Some((end_header, rest)) = self.lines.split_last() {
            for line in rest {
                writer.write_all(line)?;
            }
            let ending = match line_ending(end_header) {
                b"" => &b"\n"[..],
                ending => ending,
            };
            write!(writer, "comment {}", unit_label)?;
            writer.write_all(ending)?;
            writer.write_all(end_header)?;
        }
        Ok(())
    }
}

/// Read a text line, copying blank lines straight through.
/// Returns false at end of input.
fn next_record_line<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    line: &mut Vec<u8>,
    line_number: &mut usize,
) -> ScaleResult<bool> {
    loop {
        line.clear();
        if reader.read_until(b'\n', line)? == 0 {
            return Ok(false);
        }
        *line_number += 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            writer.write_all(line)?;
            continue;
        }
        return Ok(true);
    }
}

fn scale_ascii_record<W: Write>(
    writer: &mut W,
    element: &ElementLayout,
    line: &[u8],
    line_number: usize,
    factor: f64,
) -> ScaleResult<()> {
    let parse_error =
        |message: String| ScaleError::parse(format!("line {}: {}", line_number, message));
    let text = std::str::from_utf8(trim_line_ending(line)).map_err(|e| parse_error(e.to_string()))?;
    let mut tokens = text.split_ascii_whitespace();
    let mut next_token = |property: &PropertyLayout| {
        tokens
            .next()
            .ok_or_else(|| parse_error(format!("record ends before property '{}'", property.name)))
    };

    let mut fields: Vec<Cow<str>> = Vec::with_capacity(element.properties.len());
    for property in &element.properties {
        match property.kind {
            PropertyKind::Scalar(kind) => {
                let token = next_token(property)?;
                if property.scaled {
                    let value = kind.parse(token).map_err(parse_error)?;
                    let scaled = value.checked_scaled(factor).ok_or_else(|| {
                        parse_error(format!("'{}' overflows {:?} when scaled", token, kind))
                    })?;
                    fields.push(Cow::Owned(scaled.to_string()));
                } else {
                    fields.push(Cow::Borrowed(token));
                }
            }
            PropertyKind::List { count, .. } => {
                let token = next_token(property)?;
                let length = count
                    .parse(token)
                    .map_err(parse_error)?
                    .as_count()
                    .ok_or_else(|| parse_error(format!("invalid list length '{}'", token)))?;
                fields.push(Cow::Borrowed(token));
                for _ in 0..length {
                    fields.push(Cow::Borrowed(next_token(property)?));
                }
            }
        }
    }
    fields.extend(tokens.map(Cow::Borrowed));

    writer.write_all(fields.join(" ").as_bytes())?;
    writer.write_all(line_ending(line))?;
    Ok(())
}

fn scale_ascii<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    elements: &[ElementLayout],
    mut line_number: usize,
    factor: f64,
) -> ScaleResult<usize> {
    let mut line = Vec::new();
    let mut vertex_count = 0;

    for element in elements {
        for record in 0..element.count {
            if !next_record_line(reader, writer, &mut line, &mut line_number)? {
                return Err(ScaleError::parse(format!(
                    "data ends at {} record {} of {}",
                    element.name, record, element.count
                )));
            }
            if element.is_vertex() {
                scale_ascii_record(writer, element, &line, line_number, factor)?;
                vertex_count += 1;
            } else {
                writer.write_all(&line)?;
            }
        }
        if element.is_vertex() {
            // Nothing after the vertices needs interpreting.
            break;
        }
    }

    std::io::copy(reader, writer)?;
    Ok(vertex_count)
}

/// Copy exactly `length` bytes.
fn copy_bytes<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    length: usize,
) -> std::io::Result<()> {
    let copied = std::io::copy(&mut reader.by_ref().take(length as u64), writer)?;
    if copied < length as u64 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, found {}", length, copied),
        ));
    }
    Ok(())
}

fn transfer_binary_record<B, R, W>(
    reader: &mut R,
    writer: &mut W,
    element: &ElementLayout,
    factor: f64,
) -> std::io::Result<()>
where
    B: ByteOrder,
    R: Read,
    W: Write,
{
    for property in &element.properties {
        match property.kind {
            PropertyKind::Scalar(kind) if property.scaled => {
                let value = kind.read::<B, _>(reader)?;
                let scaled = value.checked_scaled(factor).ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("{} = {} overflows {:?} when scaled", property.name, value, kind),
                    )
                })?;
                scaled.write::<B, _>(writer)?;
            }
            PropertyKind::Scalar(kind) => copy_bytes(reader, writer, kind.width())?,
            PropertyKind::List { count, item } => {
                let length = count.read::<B, _>(reader)?;
                length.write::<B, _>(writer)?;
                let length = length.as_count().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid length {} for list '{}'", length, property.name),
                    )
                })?;
                copy_bytes(reader, writer, length * item.width())?;
            }
        }
    }
    Ok(())
}

fn scale_binary<B, R, W>(
    reader: &mut R,
    writer: &mut W,
    elements: &[ElementLayout],
    factor: f64,
) -> ScaleResult<usize>
where
    B: ByteOrder,
    R: Read,
    W: Write,
{
    let mut vertex_count = 0;

    for element in elements {
        let record_error = |record: usize| {
            move |error: std::io::Error| match error.kind() {
                std::io::ErrorKind::UnexpectedEof => ScaleError::parse(format!(
                    "truncated binary data: {} record {} of {}",
                    element.name, record, element.count
                )),
                std::io::ErrorKind::InvalidData => {
                    ScaleError::parse(format!("{} record {}: {}", element.name, record, error))
                }
                _ => ScaleError::Io(error),
            }
        };

        match element.record_width() {
            Some(width) if !element.is_vertex() => {
                copy_bytes(reader, writer, width * element.count).map_err(record_error(0))?;
            }
            _ => {
                for record in 0..element.count {
                    transfer_binary_record::<B, _, _>(reader, writer, element, factor)
                        .map_err(record_error(record))?;
                }
            }
        }
        if element.is_vertex() {
            vertex_count += element.count;
        }
    }

    // Bytes past the declared elements are not ours to judge.
    std::io::copy(reader, writer)?;
    Ok(vertex_count)
}

/// Stream a PLY from `reader` to `writer`, multiplying the x, y and z of
/// every vertex by `factor` and adding `comment <unit_label>` to the header.
///
/// Returns the number of vertices scaled.
pub fn scale_ply<R, W>(
    reader: &mut R,
    writer: &mut W,
    factor: f64,
    unit_label: &str,
) -> ScaleResult<usize>
where
    R: BufRead,
    W: Write,
{
    let header = PlyHeader::read(reader)?;
    debug!(
        "PLY header: {:?}, elements {:?}",
        header.header.encoding,
        header
            .elements
            .iter()
            .map(|e| (e.name.as_str(), e.count))
            .collect::<Vec<_>>()
    );
    header.write_with_unit(writer, unit_label)?;

    match header.header.encoding {
        Encoding::Ascii => {
            scale_ascii(reader, writer, &header.elements, header.lines.len(), factor)
        }
        Encoding::BinaryLittleEndian => {
            scale_binary::<LittleEndian, _, _>(reader, writer, &header.elements, factor)
        }
        Encoding::BinaryBigEndian => {
            scale_binary::<BigEndian, _, _>(reader, writer, &header.elements, factor)
        }
    }
}

/// Scale the PLY at `path` and write it next to the source.
pub fn scale_ply_file<P: AsRef<Path>>(path: P, conversion: &Conversion) -> ScaleResult<PathBuf> {
    rewrite_file(
        path.as_ref(),
        ScanFormat::Ply,
        conversion.label(),
        |reader, writer| scale_ply(reader, writer, conversion.factor(), conversion.label()),
    )
}
