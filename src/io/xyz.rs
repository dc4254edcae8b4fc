//! Multi-frame XYZ reader/writer.
//!
//! The comment line may carry an extended-XYZ `Lattice="ax ay az bx by bz cx cy cz"`
//! entry; everything else on it becomes the structure title.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use nalgebra::{Point3, Vector3};
use regex::Regex;

use crate::core::domain::{Atom, AtomicStructure, Lattice};
use crate::error::{NebError, Result};

/// Formats one frame. Line breaks in the title are written as spaces.
pub fn format_frame(structure: &AtomicStructure) -> String {
    let title = structure.title.replace(['\r', '\n'], " ");

    let mut s = String::with_capacity(64 * (structure.natoms() + 2));
    let _ = writeln!(s, "{}", structure.natoms());
    match &structure.lattice {
        Some(lat) => {
            let v = lat.vectors;
            let _ = writeln!(
                s,
                "Lattice=\"{} {} {} {} {} {} {} {} {}\" {}",
                v[(0, 0)], v[(1, 0)], v[(2, 0)],
                v[(0, 1)], v[(1, 1)], v[(2, 1)],
                v[(0, 2)], v[(1, 2)], v[(2, 2)],
                title
            );
        }
        None => {
            let _ = writeln!(s, "{}", title);
        }
    }
    for atom in &structure.atoms {
        let p = atom.position;
        let _ = writeln!(s, "{:<3} {:18.10} {:18.10} {:18.10}", atom.symbol, p.x, p.y, p.z);
    }
    s
}

/// Formats frames back to back, an XYZ "animation".
pub fn format_frames<'a>(structures: impl IntoIterator<Item = &'a AtomicStructure>) -> String {
    structures.into_iter().map(format_frame).collect()
}

/// Parses every frame in `txt`.
pub fn parse_frames(txt: &str) -> Result<Vec<AtomicStructure>> {
    let lattice_re = Regex::new(r#"Lattice="([^"]*)""#).map_err(|e| NebError::Parse(e.to_string()))?;

    let mut frames = Vec::new();
    let mut lines = txt.lines().peekable();
    loop {
        // skip blank separators between frames
        while let Some(l) = lines.peek() {
            if l.trim().is_empty() {
                lines.next();
            } else {
                break;
            }
        }
        let count_line = match lines.next() {
            Some(l) => l,
            None => break,
        };
        let natoms: usize = count_line.trim().parse().map_err(|_| {
            NebError::Parse(format!("expected atom count, found {:?}", count_line))
        })?;
        let comment = lines.next().unwrap_or("");

        let (title, lattice) = match lattice_re.captures(comment) {
            Some(caps) => {
                let lattice = parse_lattice(&caps[1])?;
                let title = lattice_re.replace(comment, "").trim().to_string();
                (title, Some(lattice))
            }
            None => (comment.trim().to_string(), None),
        };

        let mut atoms = Vec::with_capacity(natoms);
        for _ in 0..natoms {
            let line = lines.next().ok_or_else(|| {
                NebError::Parse(format!("frame {}: truncated atom block", frames.len()))
            })?;
            atoms.push(parse_atom_line(line)?);
        }

        let mut structure = AtomicStructure::from_atoms(&title, atoms);
        structure.lattice = lattice;
        frames.push(structure);
    }

    Ok(frames)
}

fn parse_atom_line(line: &str) -> Result<Atom> {
    let parts: Vec<_> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(NebError::Parse(format!("invalid atom line: {:?}", line)));
    }
    let mut xyz = [0.0; 3];
    for (k, v) in xyz.iter_mut().enumerate() {
        *v = parts[k + 1]
            .parse()
            .map_err(|_| NebError::Parse(format!("invalid coordinate in {:?}", line)))?;
    }
    Ok(Atom::new(parts[0], Point3::new(xyz[0], xyz[1], xyz[2])))
}

fn parse_lattice(s: &str) -> Result<Lattice> {
    let v = s
        .split_whitespace()
        .map(|x| x.parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| NebError::Parse(format!("invalid lattice: {:?}", s)))?;
    if v.len() != 9 {
        return Err(NebError::Parse(format!("lattice needs 9 numbers: {:?}", s)));
    }
    Lattice::new(
        Vector3::new(v[0], v[1], v[2]),
        Vector3::new(v[3], v[4], v[5]),
        Vector3::new(v[6], v[7], v[8]),
    )
    .ok_or_else(|| NebError::Parse("singular lattice".into()))
}

pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<AtomicStructure>> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path)?;
    let frames = parse_frames(&txt)?;
    if frames.is_empty() {
        return Err(NebError::Parse(format!("no structure found in {}", path.display())));
    }
    Ok(frames)
}

/// Reads the first frame of `path`.
pub fn read_one<P: AsRef<Path>>(path: P) -> Result<AtomicStructure> {
    let mut frames = read_all(path)?;
    Ok(frames.swap_remove(0))
}

pub fn write_all<'a, P: AsRef<Path>>(
    path: P,
    structures: impl IntoIterator<Item = &'a AtomicStructure>,
) -> Result<()> {
    fs::write(path, format_frames(structures))?;
    Ok(())
}

pub fn write_one<P: AsRef<Path>>(path: P, structure: &AtomicStructure) -> Result<()> {
    fs::write(path, format_frame(structure))?;
    Ok(())
}
