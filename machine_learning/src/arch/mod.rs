pub mod activations;
pub mod layers;
pub mod loss;
mod model;
mod network;
pub mod ops;
mod sequential;

pub use model::Model;
pub use network::Network;
pub use sequential::Sequential;
