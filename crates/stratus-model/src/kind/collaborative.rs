use serde::{Deserialize, Serialize};

use super::algorithm::common_fields;
use crate::{BuildConfiguration, ConfigDocument, TaskSpec};

/// Matrix-factorisation collaborative filtering (users x items ratings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborativeFiltering {
    pub users: u32,
    pub items: u32,
    #[serde(default = "default_factors")]
    pub factors: u32,
}

fn default_factors() -> u32 {
    10
}

impl CollaborativeFiltering {
    pub fn new(users: u32, items: u32) -> Self {
        Self {
            users,
            items,
            factors: default_factors(),
        }
    }
}

impl BuildConfiguration for CollaborativeFiltering {
    fn algorithm(&self) -> &'static str {
        "collaborative_filtering"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[
            "model_type",
            "users",
            "items",
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
            .set("model_type", "MFModel")
            .set("users", self.users)
            .set("items", self.items)
            .set("k_factors", self.factors)
            .set("netflix_workers", spec.num_workers);
        common_fields(&mut doc, spec);
        doc
    }
}
