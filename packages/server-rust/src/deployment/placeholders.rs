//! Externally configured placeholder values substituted into route properties.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid regex pattern"));

/// Immutable snapshot of placeholder values.
///
/// Live units hold it behind an `ArcSwap` so a reload replaces the whole
/// snapshot without redeploying anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: HashMap<String, String>,
}

impl Placeholders {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replaces every `${name}` in `text`. Unknown names are left as written.
    #[must_use]
    pub fn expand(&self, text: &str) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures<'_>| {
                self.values
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

impl FromIterator<(String, String)> for Placeholders {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
