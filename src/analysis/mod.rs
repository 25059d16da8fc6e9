pub mod anomaly;
pub mod reaction;
pub mod topology;
