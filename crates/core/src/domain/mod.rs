pub mod analysis;
pub mod indicator;
pub mod partner;
pub mod recommendation;
