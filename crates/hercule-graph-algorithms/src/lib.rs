pub mod common;
pub mod neighbourhood;
pub mod topk;

pub use common::{GraphView, NodeId};
pub use neighbourhood::{neighbourhood, hop_distances, Neighbourhood};
pub use topk::{top_k, ScoredNode};
