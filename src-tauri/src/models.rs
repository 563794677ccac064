use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::slug::slugify;

/// Remote collections this app reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    News,
    Events,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::News => "news",
            Collection::Events => "events",
        }
    }

    /// Columns the free-text search matches against.
    pub fn search_columns(&self) -> &'static [&'static str] {
        match self {
            Collection::News => &["title", "content", "excerpt"],
            Collection::Events => &["title", "description"],
        }
    }
}

/// A record type stored in one of the remote collections.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub id: Uuid,
    pub slug: Option<String>,
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub category: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for NewsArticle {
    const COLLECTION: Collection = Collection::News;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub slug: Option<String>,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Event {
    const COLLECTION: Collection = Collection::Events;
}

const EXCERPT_LEN: usize = 150;

/// News form payload as the webview submits it: plain strings, empty meaning
/// "not provided".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsDraft {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub category: String,
    pub published_date: String,
    pub image_url: String,
    pub video_url: String,
    pub slug: String,
}

impl NewsDraft {
    /// Checked before any remote call is issued.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() || self.content.trim().is_empty() {
            return Err(AppError::Validation(
                "Title and Content are required.".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert/update payload with the form fallbacks applied: empty optional
    /// fields become NULL, a missing excerpt is cut from the content, a
    /// missing slug derives from the title.
    pub fn into_payload(self) -> Value {
        let excerpt = if self.excerpt.is_empty() {
            derive_excerpt(&self.content)
        } else {
            self.excerpt
        };
        let slug = if self.slug.is_empty() {
            slugify(&self.title)
        } else {
            self.slug
        };
        json!({
            "title": self.title,
            "content": self.content,
            "excerpt": excerpt,
            "category": blank_to_null(self.category),
            "published_date": blank_to_null(self.published_date),
            "image_url": blank_to_null(self.image_url),
            "video_url": blank_to_null(self.video_url),
            "slug": slug,
        })
    }
}

/// Event form payload, same conventions as [`NewsDraft`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub category: String,
    pub start_date: String,
    pub end_date: String,
    pub location: String,
    pub image_url: String,
    pub video_url: String,
    pub slug: String,
}

impl EventDraft {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() || self.description.trim().is_empty() {
            return Err(AppError::Validation(
                "Title and Description are required.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_payload(self) -> Value {
        let slug = if self.slug.is_empty() {
            slugify(&self.title)
        } else {
            self.slug
        };
        json!({
            "title": self.title,
            "description": self.description,
            "category": blank_to_null(self.category),
            "start_date": blank_to_null(self.start_date),
            "end_date": blank_to_null(self.end_date),
            "location": blank_to_null(self.location),
            "image_url": blank_to_null(self.image_url),
            "video_url": blank_to_null(self.video_url),
            "slug": slug,
        })
    }
}

fn derive_excerpt(content: &str) -> String {
    let mut excerpt: String = content.chars().take(EXCERPT_LEN).collect();
    if content.chars().count() > EXCERPT_LEN {
        excerpt.push_str("...");
    }
    excerpt
}

fn blank_to_null(value: String) -> Value {
    if value.trim().is_empty() {
        Value::Null
    } else {
        Value::String(value)
    }
}

/// One notification from a collection's realtime change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "table")]
    pub collection: Collection,
    #[serde(rename = "type")]
    pub action: ChangeAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn news_draft_requires_title_and_content() {
        let draft = NewsDraft {
            title: "Sports Day".to_string(),
            ..Default::default()
        };
        assert!(matches!(draft.validate(), Err(AppError::Validation(_))));

        let draft = NewsDraft {
            title: "Sports Day".to_string(),
            content: "All students welcome.".to_string(),
            ..Default::default()
        };
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn event_draft_requires_title_and_description() {
        let draft = EventDraft {
            title: "Open House".to_string(),
            description: "   ".to_string(),
            ..Default::default()
        };
        assert!(matches!(draft.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn news_payload_applies_fallbacks() {
        let draft = NewsDraft {
            title: "Annual Sports Day!".to_string(),
            content: "x".repeat(200),
            ..Default::default()
        };
        let payload = draft.into_payload();
        assert_eq!(payload["slug"], "annual-sports-day");
        assert_eq!(
            payload["excerpt"].as_str().unwrap(),
            format!("{}...", "x".repeat(150))
        );
        assert!(payload["category"].is_null());
        assert!(payload["published_date"].is_null());
    }

    #[test]
    fn short_content_is_not_ellipsized() {
        let draft = NewsDraft {
            title: "Note".to_string(),
            content: "short".to_string(),
            ..Default::default()
        };
        assert_eq!(draft.into_payload()["excerpt"], "short");
    }

    #[test]
    fn explicit_fields_pass_through() {
        let draft = NewsDraft {
            title: "Note".to_string(),
            content: "body".to_string(),
            excerpt: "hand-written".to_string(),
            slug: "custom-slug".to_string(),
            category: "Sports".to_string(),
            ..Default::default()
        };
        let payload = draft.into_payload();
        assert_eq!(payload["excerpt"], "hand-written");
        assert_eq!(payload["slug"], "custom-slug");
        assert_eq!(payload["category"], "Sports");
    }

    #[test]
    fn change_events_decode_from_feed_frames() {
        let event: ChangeEvent =
            serde_json::from_str(r#"{"table":"news","type":"INSERT"}"#).unwrap();
        assert_eq!(event.collection, Collection::News);
        assert_eq!(event.action, ChangeAction::Insert);
    }
}
