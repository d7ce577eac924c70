//! Per-epoch snapshots of a network's parameters in the safetensors format.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use machine_learning::arch::{Model, Network};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::error::{Result, TrainErr};

/// Returns the path of the checkpoint of a run after its `epoch`-th epoch, counting from 1.
pub fn checkpoint_path(run_dir: &Path, run: &str, epoch: usize) -> PathBuf {
    run_dir.join(format!("{run}_{epoch}.safetensors"))
}

/// Writes every parameter tensor of the network to `path`.
///
/// # Arguments
/// * `net` - The network to snapshot.
/// * `path` - The path of the checkpoint, replaced if it exists.
/// * `metadata` - Free form metadata stored in the header of the file.
pub fn save<M: Model>(
    net: &Network<M>,
    path: &Path,
    metadata: HashMap<String, String>,
) -> Result<()> {
    let params = net.params();
    let blocks = net.param_blocks();
    let mut tensors = Vec::with_capacity(blocks.len());

    for block in &blocks {
        let data: &[u8] = bytemuck::cast_slice(&params[block.range.clone()]);
        let view = TensorView::new(Dtype::F32, block.shape.clone(), data)?;
        tensors.push((block.name.as_str(), view));
    }

    let views = tensors.iter().map(|(name, view)| (*name, view));
    safetensors::serialize_to_file(views, &Some(metadata), path)?;
    log::debug!("saved {} tensors to {}", blocks.len(), path.display());
    Ok(())
}

/// Restores a network from a checkpoint written by `save`.
///
/// # Arguments
/// * `model` - The architecture the checkpoint was written from.
/// * `path` - The path of the checkpoint.
///
/// # Returns
/// The network with the stored parameters and the metadata of the checkpoint, or an error if
/// the tensors don't match the architecture.
pub fn load<M: Model>(model: M, path: &Path) -> Result<(Network<M>, HashMap<String, String>)> {
    let bytes = fs::read(path)?;
    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let blocks = model.param_blocks();
    if tensors.len() != blocks.len() {
        return Err(TrainErr::Checkpoint(format!(
            "expected {} tensors, found {}",
            blocks.len(),
            tensors.len()
        )));
    }

    let mut params = vec![0.; model.size()];

    for block in &blocks {
        let tensor = tensors.tensor(&block.name)?;

        if tensor.dtype() != Dtype::F32 || tensor.shape() != block.shape.as_slice() {
            return Err(TrainErr::Checkpoint(format!(
                "tensor {} is {:?} {:?}, expected F32 {:?}",
                block.name,
                tensor.dtype(),
                tensor.shape(),
                block.shape
            )));
        }

        let dst = &mut params[block.range.clone()];
        for (p, chunk) in dst.iter_mut().zip(tensor.data().chunks_exact(4)) {
            *p = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    let metadata = header.metadata().clone().unwrap_or_default();
    let net = Network::with_params(model, params)?;
    Ok((net, metadata))
}

#[cfg(test)]
mod tests {
    use machine_learning::arch::{Sequential, layers::Layer};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn model() -> Sequential {
        Sequential::new([
            Layer::dense((4, 3), None),
            Layer::layer_norm(3),
            Layer::dense((3, 2), None),
        ])
    }

    #[test]
    fn load_restores_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "run", 1);
        assert!(path.ends_with("run_1.safetensors"));

        let net = Network::new(model(), &mut StdRng::seed_from_u64(9)).unwrap();
        let metadata = HashMap::from([("epoch".to_string(), "1".to_string())]);
        save(&net, &path, metadata.clone()).unwrap();

        let (loaded, loaded_metadata) = load(model(), &path).unwrap();
        assert_eq!(loaded.params(), net.params());
        assert_eq!(loaded_metadata, metadata);
    }

    #[test]
    fn tensors_are_named_by_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("named.safetensors");
        let net = Network::new(model(), &mut StdRng::seed_from_u64(9)).unwrap();
        save(&net, &path, HashMap::new()).unwrap();

        let bytes = fs::read(&path).unwrap();
        let tensors = SafeTensors::deserialize(&bytes).unwrap();
        let mut names = tensors.names();
        names.sort();

        assert_eq!(
            names,
            [
                "0.dense.bias",
                "0.dense.weight",
                "1.layer_norm.bias",
                "1.layer_norm.gain",
                "2.dense.bias",
                "2.dense.weight",
            ]
        );
        assert_eq!(tensors.tensor("0.dense.weight").unwrap().shape(), [4, 3]);
    }

    #[test]
    fn rejects_other_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.safetensors");
        let net = Network::new(model(), &mut StdRng::seed_from_u64(9)).unwrap();
        save(&net, &path, HashMap::new()).unwrap();

        let other = Sequential::new([
            Layer::dense((4, 5), None),
            Layer::layer_norm(5),
            Layer::dense((5, 2), None),
        ]);
        assert!(matches!(load(other, &path), Err(TrainErr::Checkpoint(_))));
    }
}
