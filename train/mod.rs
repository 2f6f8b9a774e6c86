pub mod boost;
pub mod data;
pub mod estimate;
pub mod forest;
pub mod lasso;
pub mod metrics;
pub mod model;
pub mod pca;
pub mod progress;
pub mod scaler;
pub mod split;
pub mod tree;
