use serde::{Deserialize, Serialize};

use crate::{CollaborativeFiltering, ConfigDocument, LogisticRegression, ModelError, TaskSpec};

/// Capability implemented once per supported learning algorithm.
///
/// An algorithm only needs to render its configuration and name the fields
/// that must be present for the executables to accept it.
pub trait BuildConfiguration {
    /// Short identifier used in logs and snapshots.
    fn algorithm(&self) -> &'static str;

    /// Keys that must be present and non-empty in the rendered document.
    fn required_fields(&self) -> &'static [&'static str];

    /// Renders the full configuration for `spec`.
    fn build_configuration(&self, spec: &TaskSpec) -> ConfigDocument;
}

/// Learning algorithm selected when a task is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Algorithm {
    LogisticRegression(LogisticRegression),
    CollaborativeFiltering(CollaborativeFiltering),
}

impl Algorithm {
    fn as_builder(&self) -> &dyn BuildConfiguration {
        match self {
            Algorithm::LogisticRegression(a) => a,
            Algorithm::CollaborativeFiltering(a) => a,
        }
    }

    pub fn name(&self) -> &'static str {
        self.as_builder().algorithm()
    }

    /// Renders the configuration for `spec` and checks its required fields.
    pub fn render(&self, spec: &TaskSpec) -> Result<ConfigDocument, ModelError> {
        let builder = self.as_builder();
        let doc = builder.build_configuration(spec);
        doc.require(builder.required_fields())?;
        Ok(doc)
    }
}

/// Keys shared by every algorithm, written before the algorithm-specific ones.
pub(crate) fn common_fields(doc: &mut ConfigDocument, spec: &TaskSpec) {
    doc.set("minibatch_size", spec.minibatch_size)
        .set("learning_rate", spec.learning_rate)
        .set("epsilon", spec.epsilon)
        .set("model_bits", spec.model_bits)
        .set("s3_bucket", &spec.dataset.bucket)
        .set("s3_size", spec.dataset.chunk_size)
        .set("train_set", spec.dataset.train_range())
        .set("test_set", spec.dataset.test_range())
        .set("num_workers", spec.num_workers);
}
