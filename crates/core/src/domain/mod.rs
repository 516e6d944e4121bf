pub mod operation;
pub mod plan;
pub mod resource;
