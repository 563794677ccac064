//! Slug derivation for human-readable record URLs.

/// Derives a URL-safe slug from a title.
///
/// Lowercases the input, joins whitespace runs with single hyphens, strips
/// every character that is not an ASCII word character or hyphen, collapses
/// repeated hyphens and trims them from both ends. Defined for every input
/// (empty stays empty) and idempotent.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    // Starting "after a hyphen" suppresses leading separators.
    let mut after_hyphen = true;
    for ch in input.to_lowercase().chars() {
        if ch.is_whitespace() || ch == '-' {
            if !after_hyphen {
                slug.push('-');
                after_hyphen = true;
            }
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            slug.push(ch);
            after_hyphen = false;
        }
        // everything else is dropped without producing a separator
    }
    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Decides when the slug form field keeps following the title field.
///
/// The slug auto-updates on a title change only while the user has not
/// diverged it: the current value is empty, still equals the slug derived
/// from the previous title, or (on edit pages) equals the persisted slug the
/// record was loaded with. A direct edit of the slug field fails all three
/// checks on the next title change, which stops the tracking for the session.
#[derive(Debug, Clone, Default)]
pub struct SlugTracker {
    baseline: Option<String>,
}

impl SlugTracker {
    pub fn for_create() -> Self {
        Self { baseline: None }
    }

    /// Edit pages track against the slug the record was persisted with.
    pub fn for_edit(persisted_slug: &str) -> Self {
        Self {
            baseline: Some(persisted_slug.to_string()),
        }
    }

    /// Value of the slug field after the title changed from `previous_title`
    /// to `new_title`, given the field's current contents.
    pub fn on_title_change(
        &self,
        previous_title: &str,
        new_title: &str,
        current_slug: &str,
    ) -> String {
        let tracking = current_slug.is_empty()
            || current_slug == slugify(previous_title)
            || self.baseline.as_deref() == Some(current_slug);
        if tracking {
            slugify(new_title)
        } else {
            current_slug.to_string()
        }
    }
}
