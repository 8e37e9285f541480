//! Extended XYZ trajectory reader.
//!
//! Each frame is an atom-count line, a comment line and one line per atom. The
//! comment line is parsed as a `key=value` list; only `Lattice`, `Properties` and
//! `pbc` are interpreted, and only when written as real `key=value` pairs. A comment
//! line that carries none of them is treated as a plain XYZ frame.

use super::model::Structure;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

const DEFAULT_PROPERTIES: &str = "species:S:1:pos:R:3";
const SPECIES_NAMES: &[&str] = &["species", "symbols", "element", "elements"];
const POSITION_NAMES: &[&str] = &["pos", "positions"];

/// Upper bound on per-frame preallocation; the count line is untrusted.
const MAX_PREALLOCATED_ATOMS: usize = 4096;

/// Read every frame from an extended XYZ file.
pub fn read_file(path: &Path) -> Result<Vec<Structure>> {
    let file = File::open(path)?;
    read(BufReader::new(file))
}

/// Read every frame from an extended XYZ stream.
pub fn read<R: BufRead>(reader: R) -> Result<Vec<Structure>> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, line)| line.map(|content| (i + 1, content)));

    let mut structures = Vec::new();

    while let Some((count_no, count_line)) = next_non_blank(&mut lines)? {
        let atom_count = count_line.trim().parse::<usize>().map_err(|_| {
            Error::parse(
                count_no,
                format!("expected an atom count, found '{}'", count_line.trim()),
            )
        })?;

        let (comment_no, comment) = lines
            .next()
            .transpose()?
            .ok_or_else(|| Error::parse(count_no + 1, "frame ended before its comment line"))?;
        let header = FrameHeader::parse(&comment, comment_no)?;

        let capacity = atom_count.min(MAX_PREALLOCATED_ATOMS);
        let mut symbols = Vec::with_capacity(capacity);
        let mut positions = Vec::with_capacity(capacity);
        for found in 0..atom_count {
            let (line_no, raw) = lines.next().transpose()?.ok_or_else(|| {
                Error::parse(
                    comment_no + found + 1,
                    format!("frame declares {atom_count} atoms but only {found} were found"),
                )
            })?;
            let (symbol, position) = header.parse_atom(&raw, line_no)?;
            symbols.push(symbol);
            positions.push(position);
        }

        structures.push(Structure::new(symbols, positions, header.cell, header.pbc)?);
    }

    tracing::debug!("Parsed {} extended XYZ frames", structures.len());
    Ok(structures)
}

fn next_non_blank<I>(lines: &mut I) -> Result<Option<(usize, String)>>
where
    I: Iterator<Item = std::io::Result<(usize, String)>>,
{
    for item in lines {
        let (line_no, content) = item?;
        if !content.trim().is_empty() {
            return Ok(Some((line_no, content)));
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    Str,
    Real,
    Int,
    Logical,
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    kind: ColumnKind,
    width: usize,
    offset: usize,
}

/// Per-frame metadata taken from the comment line.
#[derive(Debug)]
struct FrameHeader {
    cell: [[f64; 3]; 3],
    pbc: [bool; 3],
    species_offset: usize,
    position_offset: usize,
    total_width: usize,
}

impl FrameHeader {
    fn parse(comment: &str, line_no: usize) -> Result<Self> {
        let pairs = tokenize(comment, line_no)?;
        let lookup = |key: &str| {
            pairs
                .iter()
                .find_map(|(k, v)| if k == key { v.as_deref() } else { None })
        };

        let lattice = lookup("lattice")
            .map(|value| parse_lattice(value, line_no))
            .transpose()?;

        let pbc = match lookup("pbc") {
            Some(value) => parse_pbc(value, line_no)?,
            None => [lattice.is_some(); 3],
        };

        let columns = parse_properties(lookup("properties").unwrap_or(DEFAULT_PROPERTIES), line_no)?;
        let species = find_column(&columns, SPECIES_NAMES, ColumnKind::Str, 1)
            .ok_or_else(|| Error::parse(line_no, "Properties has no species column"))?;
        let position = find_column(&columns, POSITION_NAMES, ColumnKind::Real, 3)
            .ok_or_else(|| Error::parse(line_no, "Properties has no pos:R:3 column"))?;
        let total_width = columns.iter().map(|c| c.width).sum();

        Ok(Self {
            cell: lattice.unwrap_or([[0.0; 3]; 3]),
            pbc,
            species_offset: species.offset,
            position_offset: position.offset,
            total_width,
        })
    }

    fn parse_atom(&self, raw: &str, line_no: usize) -> Result<(String, [f64; 3])> {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        if tokens.len() < self.total_width {
            return Err(Error::parse(
                line_no,
                format!(
                    "atom line has {} columns, Properties declares {}",
                    tokens.len(),
                    self.total_width
                ),
            ));
        }

        let symbol = tokens[self.species_offset].to_string();
        let mut position = [0.0; 3];
        for (axis, slot) in position.iter_mut().enumerate() {
            let token = tokens[self.position_offset + axis];
            *slot = token.parse::<f64>().map_err(|_| {
                Error::parse(line_no, format!("invalid coordinate '{token}'"))
            })?;
        }
        Ok((symbol, position))
    }
}

fn find_column<'a>(
    columns: &'a [Column],
    names: &[&str],
    kind: ColumnKind,
    width: usize,
) -> Option<&'a Column> {
    columns.iter().find(|c| {
        names.contains(&c.name.to_ascii_lowercase().as_str()) && c.kind == kind && c.width == width
    })
}

fn parse_properties(declared: &str, line_no: usize) -> Result<Vec<Column>> {
    let fields: Vec<&str> = declared.split(':').collect();
    if fields.len() % 3 != 0 {
        return Err(Error::parse(
            line_no,
            format!("Properties '{declared}' is not a list of name:type:count triples"),
        ));
    }

    let mut columns = Vec::with_capacity(fields.len() / 3);
    let mut offset = 0;
    for triple in fields.chunks(3) {
        let kind = match triple[1] {
            "S" => ColumnKind::Str,
            "R" => ColumnKind::Real,
            "I" => ColumnKind::Int,
            "L" => ColumnKind::Logical,
            other => {
                return Err(Error::parse(
                    line_no,
                    format!("unknown property type '{other}' for '{}'", triple[0]),
                ))
            }
        };
        let width = triple[2].parse::<usize>().map_err(|_| {
            Error::parse(line_no, format!("invalid column count '{}'", triple[2]))
        })?;
        columns.push(Column {
            name: triple[0].to_string(),
            kind,
            width,
            offset,
        });
        offset += width;
    }
    Ok(columns)
}

fn parse_lattice(value: &str, line_no: usize) -> Result<[[f64; 3]; 3]> {
    let numbers = value
        .split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::parse(line_no, format!("invalid Lattice value '{value}'")))?;
    if numbers.len() != 9 {
        return Err(Error::parse(
            line_no,
            format!("Lattice needs 9 numbers, found {}", numbers.len()),
        ));
    }

    let mut cell = [[0.0; 3]; 3];
    for (i, row) in cell.iter_mut().enumerate() {
        row.copy_from_slice(&numbers[i * 3..i * 3 + 3]);
    }
    Ok(cell)
}

fn parse_pbc(value: &str, line_no: usize) -> Result<[bool; 3]> {
    let flags = value
        .split_whitespace()
        .map(|t| parse_flag(t).ok_or_else(|| Error::parse(line_no, format!("invalid pbc flag '{t}'"))))
        .collect::<Result<Vec<_>>>()?;
    match flags.as_slice() {
        [single] => Ok([*single; 3]),
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(Error::parse(
            line_no,
            format!("pbc needs 1 or 3 flags, found {}", flags.len()),
        )),
    }
}

fn parse_flag(token: &str) -> Option<bool> {
    match token {
        "T" | "t" | "True" | "true" | "TRUE" | "1" => Some(true),
        "F" | "f" | "False" | "false" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// Split a comment line into lowercase keys and raw values.
/// Bare words become flag keys with no value.
fn tokenize(line: &str, line_no: usize) -> Result<Vec<(String, Option<String>)>> {
    let mut pairs = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }

        skip_whitespace(&mut chars);
        if chars.peek() == Some(&'=') {
            chars.next();
            skip_whitespace(&mut chars);
            let value = read_value(&mut chars, line_no)?;
            pairs.push((key.to_ascii_lowercase(), Some(value)));
        } else if !key.is_empty() {
            pairs.push((key.to_ascii_lowercase(), None));
        }
    }

    Ok(pairs)
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn read_value(chars: &mut Peekable<Chars<'_>>, line_no: usize) -> Result<String> {
    let mut value = String::new();
    if chars.peek() == Some(&'"') {
        chars.next();
        loop {
            match chars.next() {
                Some('"') => return Ok(value),
                Some(c) => value.push(c),
                None => return Err(Error::parse(line_no, "unterminated quoted value")),
            }
        }
    }

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        value.push(c);
        chars.next();
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TWO_FRAMES: &str = "\
2
Lattice=\"5.0 0.0 0.0 0.0 5.0 0.0 0.0 0.0 5.0\" Properties=species:S:1:pos:R:3 pbc=\"T T T\"
Na 0.0 0.0 0.0
O 1.5 0.0 0.0
3
Lattice=\"6.0 0.0 0.0 0.0 6.0 0.0 0.0 0.0 6.0\" Properties=species:S:1:pos:R:3:forces:R:3 energy=-3.2 pbc=\"T T F\"
Na 0.0 0.0 0.0 0.1 0.2 0.3
Na 3.0 0.0 0.0 0.1 0.2 0.3
O 1.5 1.5 0.0 0.1 0.2 0.3
";

    #[test]
    fn test_reads_frames_in_order() {
        let frames = read(Cursor::new(TWO_FRAMES)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].atom_count(), 2);
        assert_eq!(frames[1].atom_count(), 3);
        assert_eq!(frames[0].pbc(), [true, true, true]);
        assert_eq!(frames[1].pbc(), [true, true, false]);
        assert_eq!(frames[1].cell()[0][0], 6.0);
        assert_eq!(frames[1].positions()[2], [1.5, 1.5, 0.0]);
        assert_eq!(frames[1].symbols()[2], "O");
    }

    #[test]
    fn test_lattice_without_pbc_is_periodic() {
        let text = "1\nLattice=\"3 0 0 0 3 0 0 0 3\"\nCu 0 0 0\n";
        let frames = read(Cursor::new(text)).unwrap();
        assert_eq!(frames[0].pbc(), [true; 3]);
    }

    #[test]
    fn test_plain_xyz_comment() {
        let text = "2\nwater fragment from a scan\nO 0 0 0\nH 0.96 0 0\n\n\n";
        let frames = read(Cursor::new(text)).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].is_periodic());
        assert_eq!(frames[0].cell(), &[[0.0; 3]; 3]);
    }

    #[test]
    fn test_plain_comment_starting_with_reserved_word() {
        for comment in ["Properties computed with PBE", "Lattice relaxed", "pbc check skipped"] {
            let text = format!("1\n{comment}\nNa 0.5 0 0\n");
            let frames = read(Cursor::new(text)).unwrap();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].symbols()[0], "Na");
            assert_eq!(frames[0].positions()[0], [0.5, 0.0, 0.0]);
            assert_eq!(frames[0].cell(), &[[0.0; 3]; 3]);
            assert_eq!(frames[0].pbc(), [false; 3]);
        }
    }

    #[test]
    fn test_species_column_not_first() {
        let text = "1\nProperties=id:I:1:pos:R:3:species:S:1\n7 1.0 2.0 3.0 Fe\n";
        let frames = read(Cursor::new(text)).unwrap();
        assert_eq!(frames[0].symbols()[0], "Fe");
        assert_eq!(frames[0].positions()[0], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_truncated_frame_reports_line() {
        let text = "3\ncomment\nNa 0 0 0\n";
        match read(Cursor::new(text)) {
            Err(Error::Parse { line, details }) => {
                assert_eq!(line, 4);
                assert!(details.contains("only 1"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_huge_atom_count_is_parse_error() {
        let text = "99999999999999999\n\nNa 0 0 0\n";
        match read(Cursor::new(text)) {
            Err(Error::Parse { line, details }) => {
                assert_eq!(line, 4);
                assert!(details.contains("declares 99999999999999999 atoms"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_atom_count() {
        let result = read(Cursor::new("two\ncomment\n"));
        assert!(matches!(result, Err(Error::Parse { line: 1, .. })));
    }

    #[test]
    fn test_bad_coordinate() {
        let text = "1\n\nNa 0.0 x 0.0\n";
        assert!(matches!(read(Cursor::new(text)), Err(Error::Parse { line: 3, .. })));
    }

    #[test]
    fn test_unterminated_quote() {
        let text = "1\nLattice=\"1 0 0\nNa 0 0 0\n";
        assert!(matches!(read(Cursor::new(text)), Err(Error::Parse { line: 2, .. })));
    }

    #[test]
    fn test_empty_stream() {
        assert!(read(Cursor::new("")).unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_mixed_pairs() {
        let pairs = tokenize("Energy = -1.5 config_type=bulk \"ignored\" flag", 1).unwrap();
        assert!(pairs.contains(&("energy".to_string(), Some("-1.5".to_string()))));
        assert!(pairs.contains(&("config_type".to_string(), Some("bulk".to_string()))));
        assert!(pairs.contains(&("flag".to_string(), None)));
    }

    #[test]
    fn test_single_pbc_flag_broadcasts() {
        assert_eq!(parse_pbc("F", 1).unwrap(), [false; 3]);
        assert!(parse_pbc("T F", 1).is_err());
    }
}
