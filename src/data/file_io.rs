//! Textual sensor input and trajectory output.
//!
//! Input records are whitespace-separated, one per line, starting with a
//! type tag:
//!
//! ```text
//! pseudorange3 <t> <rho> <sigma> <satX> <satY> <satZ> <satClockBias>
//! odom3        <t> <vx> <vy> <vz> <yawRate> <sx> <sy> <sz> <sYaw>
//! ```
//!
//! Records with an unknown tag are skipped with a warning so mixed dataset
//! files stay readable. Output is one `position <t> <x> <y> <z>` line per
//! recorded epoch, ascending in time.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;

use crate::core::types::Measurement;
use crate::data::{SensorDataSet, StateDataSet};
use crate::error::{FusionError, Result};

fn parse_fields(fields: &[&str], line_no: usize) -> Result<Vec<f64>> {
    fields
        .iter()
        .map(|f| {
            f.parse::<f64>().map_err(|_| {
                FusionError::Parse(format!("line {line_no}: invalid number '{f}'"))
            })
        })
        .collect()
}

fn expect_fields(tag: &str, got: usize, want: usize, line_no: usize) -> Result<()> {
    if got != want {
        return Err(FusionError::Parse(format!(
            "line {line_no}: {tag} record needs {want} fields, got {got}"
        )));
    }
    Ok(())
}

/// Read a whole measurement file into a [`SensorDataSet`].
pub fn read_sensor_file<P: AsRef<Path>>(path: P) -> Result<SensorDataSet> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let mut data = SensorDataSet::new();
    let mut skipped = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };
        let fields: Vec<&str> = parts.collect();

        match tag {
            "pseudorange3" => {
                expect_fields(tag, fields.len(), 7, line_no)?;
                let v = parse_fields(&fields, line_no)?;
                let m = Measurement::pseudorange(
                    v[0],
                    v[1],
                    v[2],
                    Vector3::new(v[3], v[4], v[5]),
                    v[6],
                );
                data.add(m.kind, m.time, m);
            }
            "odom3" => {
                expect_fields(tag, fields.len(), 9, line_no)?;
                let v = parse_fields(&fields, line_no)?;
                let m = Measurement::odometry(
                    v[0],
                    Vector3::new(v[1], v[2], v[3]),
                    v[4],
                    [v[5], v[6], v[7], v[8]],
                );
                data.add(m.kind, m.time, m);
            }
            _ => {
                skipped += 1;
                log::warn!("line {line_no}: skipping unknown record tag '{tag}'");
            }
        }
    }

    if skipped > 0 {
        log::warn!("skipped {skipped} records with unknown tags");
    }
    Ok(data)
}

/// Write the position trajectory of a result set: one line per epoch,
/// ascending in time.
pub fn write_position_file<P: AsRef<Path>>(
    path: P,
    states: &StateDataSet,
    name: &str,
) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    let key = name.to_string();
    for time in states.times_of(&key) {
        for i in 0..states.count_at(&key, time) {
            let state = states.get(&key, time, i)?;
            writeln!(
                writer,
                "{} {} {} {} {}",
                name, time, state.mean[0], state.mean[1], state.mean[2]
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MeasurementKind, StateKind, StateVariable};
    use approx::assert_relative_eq;
    use std::io::Write as _;

    #[test]
    fn test_read_mixed_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "# comment").unwrap();
        writeln!(tmp, "pseudorange3 10.0 20000000.0 1.0 20000000.0 0.0 0.0 1e-6").unwrap();
        writeln!(tmp, "pseudorange3 10.0 21000000.0 1.5 0.0 20000000.0 0.0 0.0").unwrap();
        writeln!(tmp, "odom3 10.0 1.0 0.0 0.0 0.01 0.1 0.1 0.1 0.02").unwrap();
        writeln!(tmp, "gps2 10.0 1.0 2.0").unwrap();
        tmp.flush().unwrap();

        let data = read_sensor_file(tmp.path()).unwrap();
        assert_eq!(data.count_at(&MeasurementKind::Pseudorange3, 10.0), 2);
        assert_eq!(data.count_at(&MeasurementKind::Odom3, 10.0), 1);

        let pr = data.get(&MeasurementKind::Pseudorange3, 10.0, 1).unwrap();
        assert_relative_eq!(pr.mean[0], 21_000_000.0);
        assert_relative_eq!(pr.std_dev[0], 1.5);

        let odom = data.get(&MeasurementKind::Odom3, 10.0, 0).unwrap();
        assert_relative_eq!(odom.std_dev[3], 0.02);
    }

    #[test]
    fn test_read_rejects_malformed_record() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "odom3 10.0 1.0").unwrap();
        tmp.flush().unwrap();
        assert!(read_sensor_file(tmp.path()).is_err());
    }

    #[test]
    fn test_write_positions_round_trip() {
        let mut states = StateDataSet::new();
        for (t, x) in [(1.0, 10.0), (2.0, 20.0)] {
            let mut s = StateVariable::new(StateKind::Point3, t);
            s.set_mean(&[x, 0.5, -0.5]);
            states.add("position".to_string(), t, s);
        }

        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_position_file(tmp.path(), &states, "position").unwrap();

        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("position 1 10"));
        assert!(lines[1].starts_with("position 2 20"));
    }
}
