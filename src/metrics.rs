use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// The results of an epoch, as written to the results table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochRecord {
    /// 0-based.
    pub epoch: usize,
    pub train_acc: f32,
    pub train_loss: f32,
    pub val_acc: f32,
    pub val_loss: f32,
}

const HEADER: [&str; 5] = ["epoch", "train_acc", "train_loss", "val_acc", "val_loss"];

/// Returns the fraction of predictions equal to their label, 0 for empty sequences.
pub fn accuracy(preds: &[usize], labels: &[usize]) -> f32 {
    if labels.is_empty() {
        return 0.;
    }

    let hits = preds.iter().zip(labels).filter(|(p, l)| p == l).count();
    hits as f32 / labels.len() as f32
}

/// Returns the mean batch loss of an epoch, 0 when there were no batches.
///
/// # Arguments
/// * `total` - The sum of the loss of every batch.
/// * `batches` - The amount of batches, the length of the loader.
pub fn average_loss(total: f32, batches: usize) -> f32 {
    if batches == 0 {
        return 0.;
    }

    total / batches as f32
}

/// Writes the records of a run as a CSV table, replacing any previous file.
pub fn write_results(path: &Path, records: &[EpochRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn accuracy_bounds() {
        assert_eq!(accuracy(&[0, 1, 2, 3], &[0, 1, 2, 3]), 1.);
        assert_eq!(accuracy(&[1, 0, 3, 2], &[0, 1, 2, 3]), 0.);
        assert_eq!(accuracy(&[0, 1, 1, 1], &[0, 1, 2, 3]), 0.5);
        assert_eq!(accuracy(&[], &[]), 0.);
    }

    #[test]
    fn average_is_total_over_batches() {
        assert_eq!(average_loss(6., 4), 1.5);
        assert_eq!(average_loss(6., 0), 0.);
    }

    #[test]
    fn results_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let records = [
            EpochRecord {
                epoch: 0,
                train_acc: 0.5,
                train_loss: 1.25,
                val_acc: 0.75,
                val_loss: 1.,
            },
            EpochRecord {
                epoch: 1,
                train_acc: 1.,
                train_loss: 0.5,
                val_acc: 1.,
                val_loss: 0.25,
            },
        ];

        write_results(&path, &records).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();

        assert_eq!(
            lines,
            [
                "epoch,train_acc,train_loss,val_acc,val_loss",
                "0,0.5,1.25,0.75,1.0",
                "1,1.0,0.5,1.0,0.25",
            ]
        );
    }

    #[test]
    fn header_without_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_results(&path, &[]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap().trim_end(),
            "epoch,train_acc,train_loss,val_acc,val_loss"
        );
    }
}
