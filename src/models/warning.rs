//! Warning data structure.

use sha2::{Digest, Sha256};

/// One self-contained bulletin item parsed from a region's page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Warning {
    /// Headline, e.g. "Unwetterwarnung Stufe Orange vor Sturm/Orkan"
    pub title: String,

    /// "last updated" line closing the item
    pub issued: String,

    /// Descriptive lines, starting with the validity range
    pub body: Vec<String>,
}

impl Warning {
    pub fn new(title: impl Into<String>, body: Vec<String>, issued: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            issued: issued.into(),
            body,
        }
    }

    /// Render the warning as a Markdown chat message.
    pub fn render(&self) -> String {
        format!(
            "*{}*\n\n{}\n\n_{}_",
            self.title,
            self.body.join("\n"),
            self.issued
        )
    }

    /// Content fingerprint used for duplicate suppression.
    ///
    /// SHA-256 over the rendered form, so any visible change yields a new
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.render().as_bytes());
        hex::encode(hasher.finalize())
    }
}
