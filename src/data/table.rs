use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, TrainErr};

/// A labeled image of the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

#[derive(Debug, Deserialize)]
struct Row {
    img_path: PathBuf,
    label: usize,
}

/// Reads a dataset description table, a CSV file with an `img_path` and a `label` column.
///
/// # Arguments
/// * `path` - The path of the table, relative image paths are resolved against its directory.
/// * `num_classes` - The amount of classes, every label must be below it.
///
/// # Returns
/// The samples in the order they appear in the table.
pub fn read_table(path: &Path, num_classes: usize) -> Result<Vec<Sample>> {
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut reader = csv::Reader::from_path(path)?;
    let mut samples = Vec::new();

    for (row, record) in reader.deserialize::<Row>().enumerate() {
        let Row { img_path, label } = record?;

        if label >= num_classes {
            return Err(TrainErr::InvalidSample {
                path: path.to_path_buf(),
                row,
                msg: format!("label {label} is out of range for {num_classes} classes"),
            });
        }

        let path = if img_path.is_absolute() {
            img_path
        } else {
            base.join(img_path)
        };

        samples.push(Sample { path, label });
    }

    log::debug!("read {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("train.csv");
        fs::write(&table, "img_path,label\na.png,0\n/abs/b.png,1\n").unwrap();

        let samples = read_table(&table, 2).unwrap();
        assert_eq!(
            samples,
            [
                Sample {
                    path: dir.path().join("a.png"),
                    label: 0
                },
                Sample {
                    path: PathBuf::from("/abs/b.png"),
                    label: 1
                },
            ]
        );
    }

    #[test]
    fn rejects_labels_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("train.csv");
        fs::write(&table, "img_path,label\na.png,0\nb.png,4\n").unwrap();

        let err = read_table(&table, 4).unwrap_err();
        assert!(matches!(err, TrainErr::InvalidSample { row: 1, .. }));
    }

    #[test]
    fn missing_table() {
        let err = read_table(Path::new("/does/not/exist.csv"), 4).unwrap_err();
        assert!(matches!(err, TrainErr::Csv(_)));
    }
}
