//! Dataset tables, image decoding and batching.

mod cache;
mod decode;
mod loader;
mod table;

pub use cache::ImageCache;
pub use decode::decode_image;
pub use loader::{Batch, Batches, DataLoader};
pub use table::{Sample, read_table};
