//! Plain-text metric logs: one value per line.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

pub const LOSS_FILE: &str = "loss.txt";
pub const ACCURACY_FILE: &str = "accuracy.txt";

/// Value written before the first epoch's accuracy.
pub const ACCURACY_SENTINEL: f64 = 0.0;

/// Losses per training step and accuracies per test pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricHistory {
    pub losses: Vec<f64>,
    pub accuracies: Vec<f64>,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_loss(&mut self, loss: f64) {
        self.losses.push(loss);
    }

    pub fn push_accuracy(&mut self, accuracy: f64) {
        self.accuracies.push(accuracy);
    }

    /// Write `loss.txt` and `accuracy.txt` into `directory`.
    ///
    /// The accuracy file starts with a `0.0` line so that epoch `e` sits on line `e`.
    pub fn save<P: AsRef<Path>>(&self, directory: P) -> Result<()> {
        let directory = directory.as_ref();

        write_values(directory.join(LOSS_FILE), &self.losses)?;

        let mut accuracies = Vec::with_capacity(self.accuracies.len() + 1);
        accuracies.push(ACCURACY_SENTINEL);
        accuracies.extend_from_slice(&self.accuracies);
        write_values(directory.join(ACCURACY_FILE), &accuracies)
    }
}

/// Write one value per line, overwriting `path`.
///
/// Values use the shortest representation that parses back to the same `f64`.
pub fn write_values<P: AsRef<Path>>(path: P, values: &[f64]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(Error::io(path))?;
    let mut writer = BufWriter::new(file);

    for value in values {
        writeln!(writer, "{value:?}").map_err(Error::io(path))?;
    }

    writer.flush().map_err(Error::io(path))
}

/// Read one value per line. Blank lines are ignored.
pub fn read_values<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(Error::io(path))?;
    let mut values = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(Error::io(path))?;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        let value = line.parse::<f64>().map_err(|_| Error::MetricParse {
            path: PathBuf::from(path),
            line: index + 1,
            value: line.to_string(),
        })?;
        values.push(value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.txt");
        let values = vec![2.302585092994046, 0.5, 1e-7, 0.0];

        write_values(&path, &values).unwrap();

        assert_eq!(read_values(&path).unwrap(), values);
    }

    #[test]
    fn accuracy_file_starts_with_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = MetricHistory::new();
        history.push_loss(1.5);
        history.push_loss(1.25);
        history.push_accuracy(0.9);

        history.save(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(ACCURACY_FILE)).unwrap();
        assert_eq!(content, "0.0\n0.9\n");
        assert_eq!(
            read_values(dir.path().join(LOSS_FILE)).unwrap(),
            vec![1.5, 1.25]
        );
    }

    #[test]
    fn invalid_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss.txt");
        std::fs::write(&path, "0.5\nnot-a-number\n").unwrap();

        let result = read_values(&path);

        assert!(matches!(result, Err(Error::MetricParse { line: 2, .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = read_values(dir.path().join("missing.txt"));

        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
