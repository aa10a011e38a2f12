mod algorithm;
pub use algorithm::{Algorithm, BuildConfiguration};

mod document;
pub use document::ConfigDocument;

mod logistic;
pub use logistic::LogisticRegression;

mod collaborative;
pub use collaborative::CollaborativeFiltering;
