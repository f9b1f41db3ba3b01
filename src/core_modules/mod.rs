pub mod block;
pub mod corpus;
pub mod mask;
pub mod selector;
pub mod split_spec;
pub mod tiling;
pub mod utils;
