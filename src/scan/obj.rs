//! Wavefront OBJ rescaling.
//!
//! Only `v` (position) lines change. Normals, texture coordinates, faces and
//! everything else are direction-like or topological and are copied through
//! byte for byte.

use crate::error::{ScaleError, ScaleResult};
use crate::nalgebra_types::*;
use crate::scan::{line_ending, rewrite_file, ScanFormat};
use crate::units::Conversion;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Returns the text after the `v` marker if `line` is a vertex position line.
fn vertex_fields(line: &[u8]) -> Option<&[u8]> {
    let start = line.iter().position(|b| *b != b' ' && *b != b'\t')?;
    match &line[start..] {
        [b'v', separator, rest @ ..] if separator.is_ascii_whitespace() => Some(rest),
        _ => None,
    }
}

/// Parse the three coordinates of a vertex line. Anything after them (the
/// optional `w` weight, vertex colours) is handed back untouched.
fn parse_vertex(fields: &str, line_number: usize) -> ScaleResult<(Vertex, Vec<&str>)> {
    let mut tokens = fields.split_ascii_whitespace();
    let mut coordinates = [0.0f64; 3];
    for (axis, coordinate) in coordinates.iter_mut().enumerate() {
        let token = tokens.next().ok_or_else(|| {
            ScaleError::parse(format!(
                "line {}: vertex has {} of 3 coordinates",
                line_number, axis
            ))
        })?;
        *coordinate = token.parse().map_err(|e| {
            ScaleError::parse(format!(
                "line {}: invalid coordinate '{}': {}",
                line_number, token, e
            ))
        })?;
    }
    let vertex = Vertex::new(coordinates[0], coordinates[1], coordinates[2]);
    Ok((vertex, tokens.collect()))
}

fn write_vertex<W: Write>(
    writer: &mut W,
    vertex: &Vertex,
    extra: &[&str],
    ending: &[u8],
) -> ScaleResult<()> {
    // {:?} is the shortest representation that reads back to the same f64.
    write!(writer, "v {:?} {:?} {:?}", vertex.x, vertex.y, vertex.z)?;
    for field in extra {
        write!(writer, " {}", field)?;
    }
    writer.write_all(ending)?;
    Ok(())
}

fn write_unit_comment<W: Write>(
    writer: &mut W,
    unit_label: &str,
    ending: &[u8],
) -> ScaleResult<()> {
    let ending: &[u8] = if ending.is_empty() { b"\n" } else { ending };
    write!(writer, "# {}", unit_label)?;
    writer.write_all(ending)?;
    Ok(())
}

/// Stream an OBJ from `reader` to `writer`, multiplying every vertex
/// position by `factor` and adding a `# <unit_label>` comment after the
/// leading comment block.
///
/// Returns the number of vertices scaled.
pub fn scale_obj<R, W>(
    reader: &mut R,
    writer: &mut W,
    factor: f64,
    unit_label: &str,
) -> ScaleResult<usize>
where
    R: BufRead,
    W: Write,
{
    let mut line = Vec::new();
    let mut line_number = 0;
    let mut vertex_count = 0;
    let mut lines_with_extra_fields = 0;
    let mut comment_written = false;
    let mut previous_ending: &[u8] = b"\n";

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_number += 1;

        if line.contains(&0) {
            return Err(ScaleError::parse(format!(
                "line {}: binary data in OBJ text",
                line_number
            )));
        }

        let ending = line_ending(&line);
        if !comment_written && !line.starts_with(b"#") {
            write_unit_comment(writer, unit_label, ending)?;
            comment_written = true;
        }

        match vertex_fields(&line) {
            Some(fields) => {
                let fields = std::str::from_utf8(fields).map_err(|e| {
                    ScaleError::parse(format!("line {}: {}", line_number, e))
                })?;
                let (vertex, extra) = parse_vertex(fields, line_number)?;
                if !extra.is_empty() {
                    lines_with_extra_fields += 1;
                }
                let scaled = checked_scale_vertex(&vertex, factor).ok_or_else(|| {
                    ScaleError::parse(format!(
                        "line {}: vertex overflows when scaled by {}",
                        line_number, factor
                    ))
                })?;
                write_vertex(writer, &scaled, &extra, ending)?;
                vertex_count += 1;
            }
            None => writer.write_all(&line)?,
        }
        previous_ending = ending;
    }

    // Nothing but comments: the unit goes last.
    if !comment_written {
        if previous_ending.is_empty() {
            writer.write_all(b"\n")?;
        }
        write_unit_comment(writer, unit_label, b"\n")?;
    }

    if lines_with_extra_fields > 0 {
        warn!(
            "{} vertex lines carry more than 3 fields, kept unscaled after x y z",
            lines_with_extra_fields
        );
    }
    Ok(vertex_count)
}

/// Scale the OBJ at `path` and write it next to the source.
pub fn scale_obj_file<P: AsRef<Path>>(path: P, conversion: &Conversion) -> ScaleResult<PathBuf> {
    rewrite_file(
        path.as_ref(),
        ScanFormat::Obj,
        conversion.label(),
        |reader, writer| scale_obj(reader, writer, conversion.factor(), conversion.label()),
    )
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use approx::relative_eq;

    const CUBE: &[u8] = include_bytes!("../../test_assets/cube.obj");

    fn scale(input: &[u8], factor: f64) -> ScaleResult<String> {
        let mut reader = ::std::io::Cursor::new(input.to_vec());
        let mut output = Vec::new();
        scale_obj(&mut reader, &mut output, factor, "mm")?;
        Ok(String::from_utf8(output).unwrap())
    }

    #[test]
    fn scales_vertex_line() {
        let output = scale(b"v 1.0 2.0 3.0\n", 1000.0).unwrap();
        assert_eq!(output, "# mm\nv 1000.0 2000.0 3000.0\n");
    }

    #[test]
    fn comment_goes_after_leading_comments() {
        let output = scale(b"# Blender v2.9\n# scan\no Cube\nv 1 0 0\n", 10.0).unwrap();
        assert_eq!(output, "# Blender v2.9\n# scan\n# mm\no Cube\nv 10.0 0.0 0.0\n");
    }

    #[test]
    fn only_comments() {
        assert_eq!(scale(b"# empty", 10.0).unwrap(), "# empty\n# mm\n");
        assert_eq!(scale(b"", 10.0).unwrap(), "# mm\n");
    }

    #[test]
    fn normals_texture_coordinates_and_faces_pass_through() {
        let input = b"v 1 1 1\nvn 0.0 1.0 0.0\nvt 0.5 0.5\nvp 0.1 0.2\n\
                      f 1/1/1 1/1/1 1/1/1\ng top\n";
        let output = scale(input, 1000.0).unwrap();
        assert_eq!(
            output,
            "# mm\nv 1000.0 1000.0 1000.0\nvn 0.0 1.0 0.0\nvt 0.5 0.5\nvp 0.1 0.2\n\
             f 1/1/1 1/1/1 1/1/1\ng top\n"
        );
    }

    #[test]
    fn weight_and_colours_stay_unscaled() {
        let output = scale(b"v 1 2 3 0.5\nv 1 2 3 0.1 0.2 0.3\n", 2.0).unwrap();
        assert_eq!(output, "# mm\nv 2.0 4.0 6.0 0.5\nv 2.0 4.0 6.0 0.1 0.2 0.3\n");
    }

    #[test]
    fn keeps_crlf_and_indentation_tolerant() {
        let output = scale(b"o a\r\n  v\t1 2 3\r\nf 1 1 1\r\n", 1.0).unwrap();
        assert_eq!(output, "# mm\r\no a\r\nv 1.0 2.0 3.0\r\nf 1 1 1\r\n");
    }

    #[test]
    fn last_line_without_newline() {
        let output = scale(b"v 1 2 3", 1.0).unwrap();
        assert_eq!(output, "# mm\nv 1.0 2.0 3.0");
    }

    #[test]
    fn precision_survives_round_trip() {
        let output = scale(b"v 0.123456789012345 -7.5e-9 123456.789\n", 1e-3).unwrap();
        let line = output.lines().nth(1).unwrap();
        let values: Vec<f64> = line[2..]
            .split(' ')
            .map(|t| t.parse().unwrap())
            .collect();
        assert_eq!(values[0], 0.123456789012345 * 1e-3);
        assert_eq!(values[1], -7.5e-9 * 1e-3);
        assert_eq!(values[2], 123456.789 * 1e-3);
    }

    #[test]
    fn vertex_with_two_coordinates_fails() {
        match scale(b"v 1 2\n", 1.0) {
            Err(ScaleError::Parse { message }) => assert!(message.contains("line 1")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn vertex_with_garbage_fails() {
        assert!(matches!(
            scale(b"# ok\nv 1 two 3\n", 1.0),
            Err(ScaleError::Parse { .. })
        ));
        assert!(matches!(scale(b"v\n", 1.0), Err(ScaleError::Parse { .. })));
    }

    #[test]
    fn overflowing_vertex_fails() {
        match scale(b"v 1 1 1\nv 1e300 0 0\n", 1e15) {
            Err(ScaleError::Parse { message }) => {
                assert!(message.contains("line 2"), "{}", message)
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn non_finite_input_passes_through() {
        let output = scale(b"v nan inf 1\n", 1000.0).unwrap();
        assert_eq!(output, "# mm\nv NaN inf 1000.0\n");
    }

    #[test]
    fn binary_content_fails() {
        assert!(matches!(
            scale(b"v 1 2 3\n\x00\x01\x02\n", 1.0),
            Err(ScaleError::Parse { .. })
        ));
    }

    #[test]
    fn marker_must_be_followed_by_whitespace() {
        assert_eq!(vertex_fields(b"v 1 2 3"), Some(&b"1 2 3"[..]));
        assert_eq!(vertex_fields(b"\tv\t1 2 3"), Some(&b"1 2 3"[..]));
        assert_eq!(vertex_fields(b"vn 0 1 0"), None);
        assert_eq!(vertex_fields(b"vt 0 1"), None);
        assert_eq!(vertex_fields(b"# v 1 2 3"), None);
        assert_eq!(vertex_fields(b""), None);
    }

    #[test]
    fn cube() {
        let mut reader = ::std::io::Cursor::new(CUBE);
        let mut output = Vec::new();
        let count = scale_obj(&mut reader, &mut output, 1000.0, "mm").unwrap();
        assert_eq!(count, 8);

        let input = String::from_utf8(CUBE.to_vec()).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(output.lines().count(), input.lines().count() + 1);

        let input_vertices: Vec<&str> = input.lines().filter(|l| l.starts_with("v ")).collect();
        let output_vertices: Vec<&str> = output.lines().filter(|l| l.starts_with("v ")).collect();
        assert_eq!(input_vertices.len(), output_vertices.len());
        for (before, after) in input_vertices.iter().zip(&output_vertices) {
            let parse = |line: &str| -> Vec<f64> {
                line[2..]
                    .split_whitespace()
                    .map(|t| t.parse().unwrap())
                    .collect()
            };
            let (before, after) = (parse(before), parse(after));
            for (b, a) in before.iter().zip(&after) {
                assert!(relative_eq!(b * 1000.0, *a));
            }
        }

        let untouched = |text: &str| -> Vec<String> {
            text.lines()
                .filter(|l| !l.starts_with("v ") && !l.starts_with('#'))
                .map(String::from)
                .collect()
        };
        assert_eq!(untouched(&input), untouched(&output));
    }
}
