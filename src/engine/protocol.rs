//! The delimited text protocol spoken by external evaluators.
//!
//! ```text
//! @model_properties_format_version
//! 0.1
//! @energy
//! -0.329336
//! @forces
//! 0.1 0.0 0.0
//! ...
//! ```
//!
//! Output is split into blocks at every `@model_properties_*` header line;
//! one block per submitted structure, in submission order. Inside a block,
//! `@<field>` lines open a record and the following lines are its values.
//! Blank lines and `#` comments are ignored.

use std::fmt;

use log::warn;
use nalgebra::{Matrix3, Point3, Vector3};
use regex::Regex;

use crate::core::domain::{Atom, AtomicStructure};
use crate::engine::evaluator::ModelProperties;
use crate::error::{NebError, Result};

const FORMAT_VERSION: &str = "0.1";

/// Parses every block of an evaluator's output.
pub fn parse_all(stream: &str) -> Result<Vec<ModelProperties>> {
    let header = Regex::new(r"(?m)^[ \t]*@model_properties_.*$")
        .map_err(|e| NebError::Parse(e.to_string()))?;

    let mut all = Vec::new();
    for part in header.split(stream) {
        if let Some(mp) = parse_block(part)? {
            all.push(mp);
        }
    }
    Ok(all)
}

/// Parses a single block. Returns `None` when it holds no records.
pub fn parse_block(part: &str) -> Result<Option<ModelProperties>> {
    // collect records as header separated lines
    let mut records: Vec<(&str, Vec<&str>)> = Vec::new();
    for line in part.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('@') {
            let key = rest.split_whitespace().next().unwrap_or("");
            records.push((key, Vec::new()));
        } else if let Some((_, values)) = records.last_mut() {
            values.push(line);
        }
    }

    if records.is_empty() {
        return Ok(None);
    }

    let mut mp = ModelProperties::default();
    for (key, lines) in records {
        match key {
            "energy" => {
                if lines.len() != 1 {
                    return Err(NebError::Parse(format!(
                        "expected one line containing energy, got {}",
                        lines.len()
                    )));
                }
                mp.energy = Some(parse_float(lines[0])?);
            }
            "forces" => {
                let forces = lines
                    .iter()
                    .map(|l| parse_xyz(l).map(Vector3::from))
                    .collect::<Result<Vec<_>>>()?;
                mp.forces = Some(forces);
            }
            "dipole" => {
                if lines.len() != 1 {
                    return Err(NebError::Parse("expected one line containing dipole moment".into()));
                }
                mp.dipole = Some(Vector3::from(parse_xyz(lines[0])?));
            }
            "stress" => {
                if lines.len() != 3 {
                    return Err(NebError::Parse("expected three lines of stress tensor".into()));
                }
                let rows = lines
                    .iter()
                    .map(|l| parse_xyz(l))
                    .collect::<Result<Vec<_>>>()?;
                mp.stress = Some(Matrix3::from_fn(|i, j| rows[i][j]));
            }
            "structure" => {
                let atoms = lines
                    .iter()
                    .map(|l| parse_atom(l))
                    .collect::<Result<Vec<_>>>()?;
                mp.structure = Some(AtomicStructure::from_atoms("", atoms));
            }
            _ => {
                warn!("ignored record: {:?}", key);
            }
        }
    }

    Ok(Some(mp))
}

fn parse_float(s: &str) -> Result<f64> {
    s.trim()
        .parse()
        .map_err(|_| NebError::Parse(format!("invalid number: {:?}", s)))
}

fn parse_xyz(line: &str) -> Result<[f64; 3]> {
    let parts: Vec<_> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(NebError::Parse(format!("expect xyz values: {}", line)));
    }
    Ok([
        parse_float(parts[0])?,
        parse_float(parts[1])?,
        parse_float(parts[2])?,
    ])
}

fn parse_atom(line: &str) -> Result<Atom> {
    let parts: Vec<_> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(NebError::Parse(format!("expect symbol and xyz: {}", line)));
    }
    let x = parse_float(parts[1])?;
    let y = parse_float(parts[2])?;
    let z = parse_float(parts[3])?;
    Ok(Atom::new(parts[0], Point3::new(x, y, z)))
}

impl fmt::Display for ModelProperties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "@model_properties_format_version")?;
        writeln!(f, "{}", FORMAT_VERSION)?;

        if let Some(s) = &self.structure {
            writeln!(f, "@structure")?;
            for a in &s.atoms {
                let p = a.position;
                writeln!(f, "{:<3} {:18.8} {:18.8} {:18.8}", a.symbol, p.x, p.y, p.z)?;
            }
        }
        if let Some(energy) = self.energy {
            writeln!(f, "@energy")?;
            writeln!(f, "{:-20.12E}", energy)?;
        }
        if let Some(forces) = &self.forces {
            writeln!(f, "@forces")?;
            for v in forces {
                writeln!(f, "{:-20.12E} {:-20.12E} {:-20.12E}", v.x, v.y, v.z)?;
            }
        }
        if let Some(d) = &self.dipole {
            writeln!(f, "@dipole")?;
            writeln!(f, "{:-20.12E} {:-20.12E} {:-20.12E}", d.x, d.y, d.z)?;
        }
        if let Some(s) = &self.stress {
            writeln!(f, "@stress")?;
            for i in 0..3 {
                writeln!(f, "{:-20.12E} {:-20.12E} {:-20.12E}", s[(i, 0)], s[(i, 1)], s[(i, 2)])?;
            }
        }
        Ok(())
    }
}
