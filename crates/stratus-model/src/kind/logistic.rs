use serde::{Deserialize, Serialize};

use super::algorithm::common_fields;
use crate::{BuildConfiguration, ConfigDocument, TaskSpec};

/// Sparse logistic regression over a CSV-derived dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticRegression {
    pub num_features: u32,
    #[serde(default = "default_classes")]
    pub num_classes: u32,
    #[serde(default)]
    pub limit_cols: u32,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default)]
    pub limit_samples: u64,
    #[serde(default = "default_true")]
    pub use_bias: bool,
    /// Gradients whose magnitude falls below this are not pushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_threshold: Option<f64>,
}

fn default_classes() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl LogisticRegression {
    pub fn new(num_features: u32) -> Self {
        Self {
            num_features,
            num_classes: default_classes(),
            limit_cols: num_features + 1,
            normalize: true,
            limit_samples: 0,
            use_bias: true,
            grad_threshold: None,
        }
    }
}

impl BuildConfiguration for LogisticRegression {
    fn algorithm(&self) -> &'static str {
        "logistic_regression"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[
            "model_type",
            "num_features",
            "minibatch_size",
            "learning_rate",
            "s3_bucket",
            "train_set",
            "test_set",
        ]
    }

    fn build_configuration(&self, spec: &TaskSpec) -> ConfigDocument {
        let mut doc = ConfigDocument::new();
        doc.set("input_type", "csv")
            .set("model_type", "LogisticRegression")
            .set("num_classes", self.num_classes)
            .set("num_features", self.num_features)
            .set("limit_cols", self.limit_cols)
            .set_flag("normalize", self.normalize)
            .set("limit_samples", self.limit_samples)
            .set_flag("use_bias", self.use_bias);
        common_fields(&mut doc, spec);
        doc.set_flag("use_grad_threshold", self.grad_threshold.is_some())
            .set("grad_threshold", self.grad_threshold.unwrap_or(0.0));
        doc
    }
}
