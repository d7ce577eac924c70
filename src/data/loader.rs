use std::{num::NonZeroUsize, sync::Arc};

use ndarray::{Array4, ArrayView3, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use super::{ImageCache, Sample};
use crate::error::Result;

/// A group of images and their labels, `images` is `(batch, channels, size, size)`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Splits a dataset in batches, decoding images in parallel through a shared cache.
pub struct DataLoader {
    samples: Vec<Sample>,
    batch_size: NonZeroUsize,
    shuffle: bool,
    cache: Arc<ImageCache>,
    pool: ThreadPool,
    seed: u64,
    epoch: u64,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `samples` - The samples of the dataset.
    /// * `batch_size` - The amount of samples per batch, the last one may be smaller.
    /// * `shuffle` - Whether to visit the samples in a different order on every pass.
    /// * `cache` - The image cache shared with other loaders.
    /// * `workers` - The amount of threads decoding images.
    /// * `seed` - Seeds the shuffling, making the orders reproducible.
    ///
    /// # Returns
    /// A new `DataLoader` or an error if its worker pool can't be built.
    pub fn new(
        samples: Vec<Sample>,
        batch_size: NonZeroUsize,
        shuffle: bool,
        cache: Arc<ImageCache>,
        workers: NonZeroUsize,
        seed: u64,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.get())
            .thread_name(|i| format!("loader-{i}"))
            .build()?;

        Ok(Self {
            samples,
            batch_size,
            shuffle,
            cache,
            pool,
            seed,
            epoch: 0,
        })
    }

    /// Returns the amount of batches per pass.
    pub fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size.get())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Starts a new pass over the dataset.
    ///
    /// # Returns
    /// An iterator of batches, each one decoded when requested.
    pub fn iter(&mut self) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            order.shuffle(&mut rng);
        }

        self.epoch += 1;
        Batches {
            loader: self,
            order,
            cursor: 0,
        }
    }

    fn load_batch(&self, indices: &[usize]) -> Result<Batch> {
        let images = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&i| self.cache.load(&self.samples[i].path))
                .collect::<Result<Vec<_>>>()
        })?;

        let views: Vec<ArrayView3<f32>> = images.iter().map(|image| image.view()).collect();
        let images = ndarray::stack(Axis(0), &views).map_err(machine_learning::MlErr::from)?;
        let labels = indices.iter().map(|&i| self.samples[i].label).collect();

        Ok(Batch { images, labels })
    }
}

/// A single pass over the batches of a `DataLoader`.
pub struct Batches<'a> {
    loader: &'a DataLoader,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.loader.batch_size.get()).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        Some(self.loader.load_batch(indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let batch_size = self.loader.batch_size.get();
        let left = (self.order.len() - self.cursor).div_ceil(batch_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ndarray::Array3;

    use super::*;

    /// A loader over images that are already cached, image `i` is filled with `i`.
    fn loader(n: usize, batch_size: usize, shuffle: bool) -> DataLoader {
        let cache = Arc::new(ImageCache::new(2));
        let samples = (0..n)
            .map(|i| {
                let path = PathBuf::from(format!("{i}.png"));
                cache.insert(path.clone(), Array3::from_elem((3, 2, 2), i as f32));
                Sample { path, label: i % 2 }
            })
            .collect();

        DataLoader::new(
            samples,
            NonZeroUsize::new(batch_size).unwrap(),
            shuffle,
            cache,
            NonZeroUsize::new(2).unwrap(),
            7,
        )
        .unwrap()
    }

    fn first_pixels(batch: &Batch) -> Vec<usize> {
        batch
            .images
            .axis_iter(Axis(0))
            .map(|image| image[[0, 0, 0]] as usize)
            .collect()
    }

    #[test]
    fn keeps_last_partial_batch() {
        let mut loader = loader(5, 2, false);
        assert_eq!(loader.len(), 3);

        let batches: Vec<_> = loader.iter().map(|batch| batch.unwrap()).collect();
        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(batches[2].images.dim(), (1, 3, 2, 2));
        assert_eq!(first_pixels(&batches[1]), [2, 3]);
        assert_eq!(batches[1].labels, [0, 1]);
    }

    #[test]
    fn shuffling_is_reproducible() {
        let order = |loader: &mut DataLoader| -> Vec<Vec<usize>> {
            (0..2)
                .map(|_| loader.iter().flat_map(|b| first_pixels(&b.unwrap())).collect())
                .collect()
        };

        let a = order(&mut loader(16, 4, true));
        let b = order(&mut loader(16, 4, true));
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);

        let mut sorted = a[0].clone();
        sorted.sort();
        assert_eq!(sorted, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn labels_follow_images() {
        let mut loader = loader(9, 4, true);
        for batch in loader.iter() {
            let batch = batch.unwrap();
            let expected: Vec<_> = first_pixels(&batch).iter().map(|i| i % 2).collect();
            assert_eq!(batch.labels, expected);
        }
    }

    #[test]
    fn empty_dataset() {
        let mut loader = loader(0, 4, true);
        assert_eq!(loader.len(), 0);
        assert!(loader.iter().next().is_none());
    }
}
