use std::fmt;

use crate::ModelError;

/// Configuration text consumed by the coordinator and worker executables.
///
/// Renders as newline-separated `key: value` lines in insertion order.
/// Setting an existing key overwrites its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    entries: Vec<(String, String)>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        self
    }

    /// Sets a boolean flag using the `0`/`1` encoding the executables expect.
    pub fn set_flag(&mut self, key: &str, on: bool) -> &mut Self {
        self.set(key, u8::from(on))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Fails with the first field in `fields` that is absent or blank.
    pub fn require(&self, fields: &[&'static str]) -> Result<(), ModelError> {
        for field in fields {
            match self.get(field) {
                Some(v) if !v.trim().is_empty() => {}
                _ => return Err(ModelError::MissingField(field)),
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.entries {
            writeln!(f, "{k}: {v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_key_value_lines() {
        let mut doc = ConfigDocument::new();
        doc.set("learning_rate", 0.01).set("minibatch_size", 20);
        assert_eq!(doc.to_string(), "learning_rate: 0.01\nminibatch_size: 20\n");
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut doc = ConfigDocument::new();
        doc.set("a", 1).set("b", 2).set("a", 3);
        assert_eq!(doc.to_string(), "a: 3\nb: 2\n");
    }

    #[test]
    fn flags_are_numeric() {
        let mut doc = ConfigDocument::new();
        doc.set_flag("use_bias", true).set_flag("normalize", false);
        assert_eq!(doc.get("use_bias"), Some("1"));
        assert_eq!(doc.get("normalize"), Some("0"));
    }

    #[test]
    fn require_rejects_blank_values() {
        let mut doc = ConfigDocument::new();
        doc.set("s3_bucket", " ");
        assert_eq!(
            doc.require(&["s3_bucket"]),
            Err(ModelError::MissingField("s3_bucket"))
        );
        assert_eq!(doc.require(&["absent"]), Err(ModelError::MissingField("absent")));
    }
}
