use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::Array3;
use parking_lot::RwLock;

use super::decode_image;
use crate::error::Result;

/// Decoded images shared by every loader of a run, keyed by their path.
///
/// Decoding happens outside the lock. When two workers decode the same image at once the first
/// one to insert wins and both get that value back, stored images are never replaced.
#[derive(Debug)]
pub struct ImageCache {
    image_size: usize,
    images: RwLock<HashMap<PathBuf, Arc<Array3<f32>>>>,
}

impl ImageCache {
    /// Creates a new empty `ImageCache`.
    ///
    /// # Arguments
    /// * `image_size` - The side every image gets resized to when decoded.
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            images: RwLock::new(HashMap::new()),
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Array3<f32>>> {
        self.images.read().get(path).cloned()
    }

    /// Stores an image unless the path already has one.
    ///
    /// # Returns
    /// The image stored for `path` after the call.
    pub fn insert(&self, path: PathBuf, image: Array3<f32>) -> Arc<Array3<f32>> {
        let mut images = self.images.write();
        images.entry(path).or_insert_with(|| Arc::new(image)).clone()
    }

    /// Returns the stored image or produces, stores and returns it.
    ///
    /// # Arguments
    /// * `path` - The key of the image.
    /// * `decode` - Produces the image on a miss, called without holding the lock.
    pub fn get_or_insert_with<F>(&self, path: &Path, decode: F) -> Result<Arc<Array3<f32>>>
    where
        F: FnOnce(&Path) -> Result<Array3<f32>>,
    {
        if let Some(image) = self.get(path) {
            return Ok(image);
        }

        let image = decode(path)?;
        Ok(self.insert(path.to_path_buf(), image))
    }

    /// Returns the image at `path`, decoding it on the first request.
    pub fn load(&self, path: &Path) -> Result<Arc<Array3<f32>>> {
        self.get_or_insert_with(path, |path| decode_image(path, self.image_size))
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
