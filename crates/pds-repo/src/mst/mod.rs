pub mod node;
pub mod tree;
pub mod util;

pub use node::{NodeData, TreeEntry};
pub use tree::{Entry, Mst};
pub use util::{layer_for_key, validate_key};
