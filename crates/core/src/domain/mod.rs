pub mod horizon;
pub mod performance;
pub mod recommendation;
