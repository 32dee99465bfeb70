//! Data models for the humans.inc backend
//!
//! This module defines all the data structures used throughout the application:
//! the persisted Profile / Block / Collection records, the type-tagged block
//! content union, and the request/response payloads of the dashboard API.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Closed set of block types a page can contain.
///
/// `media` and `gallery` are reserved: stored records with these types
/// decode fine, but the authoring API rejects creating or retyping them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Bio,
    Text,
    Links,
    ContentList,
    Media,
    Gallery,
}

impl BlockType {
    /// Types the authoring API accepts today.
    pub fn is_supported(self) -> bool {
        !matches!(self, BlockType::Media | BlockType::Gallery)
    }
}

/// A single link entry inside a bio or links block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LinkItem {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single entry inside a content-list block (a curated recommendation).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Free-form kind hint ("book", "article", ...), not interpreted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
}

/// Formatting mode of a text block.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
    Rich,
}

/// Payload of a bio block.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BioContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub links: Vec<LinkItem>,
}

/// Payload of a text block.
///
/// `word_count`, `reading_minutes` and `headings` are derived from the raw
/// text / rich HTML at the store boundary on every write; values supplied
/// by callers are discarded and recomputed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TextContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default)]
    pub format: TextFormat,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub reading_minutes: u32,
    #[serde(default)]
    pub headings: Vec<String>,
}

lazy_static! {
    /// Matches <h1>-<h3> elements in rich HTML (outline source).
    static ref HEADING_REGEX: Regex =
        Regex::new(r"(?is)<h[1-3][^>]*>(.*?)</h[1-3]\s*>").unwrap();
    /// Strips any residual markup from heading inner text.
    static ref TAG_REGEX: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// Average silent-reading speed used for the reading-time estimate.
const WORDS_PER_MINUTE: u32 = 200;

impl TextContent {
    /// Recomputes the derived fields from `text` and `html`.
    ///
    /// Word count is the whitespace-token count of the raw text; reading
    /// time rounds up to at least one minute for any non-empty text; the
    /// heading outline is the inner text of h1-h3 tags in document order.
    pub fn with_derived(mut self) -> Self {
        let words = self.text.split_whitespace().count() as u32;
        self.word_count = words;
        self.reading_minutes = if words == 0 {
            0
        } else {
            words.div_ceil(WORDS_PER_MINUTE).max(1)
        };
        self.headings = match &self.html {
            Some(html) => HEADING_REGEX
                .captures_iter(html)
                .map(|cap| TAG_REGEX.replace_all(&cap[1], "").trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            None => Vec::new(),
        };
        self
    }
}

/// Type-tagged block payload.
///
/// The tag doubles as the block type; `Block::block_type` must agree with
/// the variant, which the store verifies before anything is persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    Bio(BioContent),
    Text(TextContent),
    Links { items: Vec<LinkItem> },
    ContentList { items: Vec<ContentItem> },
}

impl BlockContent {
    /// The block type this payload belongs to.
    pub fn kind(&self) -> BlockType {
        match self {
            BlockContent::Bio(_) => BlockType::Bio,
            BlockContent::Text(_) => BlockType::Text,
            BlockContent::Links { .. } => BlockType::Links,
            BlockContent::ContentList { .. } => BlockType::ContentList,
        }
    }

    /// Returns the payload with derived fields recomputed (text blocks)
    /// or unchanged (everything else).
    pub fn normalized(self) -> Self {
        match self {
            BlockContent::Text(text) => BlockContent::Text(text.with_derived()),
            other => other,
        }
    }
}

/// A user's public identity record, one-to-one with an authenticated account.
///
/// The profile row is created on first authenticated touch; `username`
/// stays null until claimed, and block authoring is refused until then.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Profile {
    pub id: Uuid,

    /// Public routing key, globally unique once claimed.
    pub username: Option<String>,

    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,

    /// Presentational theme preference, not interpreted by the core.
    pub theme: Option<String>,

    #[serde(default)]
    pub onboarding_completed: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ordered, user-owned, typed content unit on a page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub block_type: BlockType,

    pub title: Option<String>,

    /// URL-safe address, unique within the owner's blocks. Never set on
    /// bio blocks. Absent means the block is publicly addressed by id.
    pub slug: Option<String>,

    /// Dashboard authoring order (ascending).
    pub position: i64,

    /// Public-page order; null sorts after every explicit value.
    pub display_order: Option<i64>,

    /// Draft vs live. New blocks default to draft.
    #[serde(default)]
    pub is_published: bool,

    /// Soft show/hide, independent of the publish state.
    #[serde(default = "default_true")]
    pub is_visible: bool,

    /// Owning collection; null means uncategorized.
    pub collection_id: Option<Uuid>,

    pub content: BlockContent,

    /// Free-form presentational hints (size/layout), passed through.
    #[serde(default = "default_config")]
    pub config: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_config() -> serde_json::Value {
    serde_json::json!({})
}

/// A named, user-owned grouping of blocks.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Collection {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,

    /// Whether the grouping surfaces on the public page.
    #[serde(default)]
    pub is_public: bool,

    /// Null sorts after every explicit value.
    pub display_order: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Request payloads
// ============================================================================

/// Request body for POST /api/blocks
#[derive(Deserialize, Debug)]
pub struct CreateBlockRequest {
    /// Must equal the caller's identity; anything else is forbidden.
    pub owner_id: Uuid,
    pub block_type: BlockType,
    pub content: BlockContent,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub collection_id: Option<Uuid>,
    /// Explicit slug to claim. Validated and uniqueness-checked.
    #[serde(default)]
    pub slug: Option<String>,
    /// Derive a slug from the title when no explicit slug is given.
    #[serde(default)]
    pub generate_slug: bool,
}

/// Request body for PATCH /api/blocks/{id}; only present fields apply.
#[derive(Deserialize, Debug, Default)]
pub struct UpdateBlockRequest {
    #[serde(default, with = "double_option")]
    pub title: Option<Option<String>>,
    #[serde(default)]
    pub content: Option<BlockContent>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default, with = "double_option")]
    pub slug: Option<Option<String>>,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    #[serde(default, with = "double_option")]
    pub display_order: Option<Option<i64>>,
    #[serde(default, with = "double_option")]
    pub collection_id: Option<Option<Uuid>>,
}

/// Distinguishes "field absent" from "field set to null" in PATCH bodies.
///
/// `{"slug": null}` clears the slug; omitting the key leaves it alone.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

/// Request body for PUT /api/blocks/reorder
///
/// The full reordered id list; positions 0..N-1 are assigned in order.
#[derive(Deserialize, Debug)]
pub struct ReorderRequest {
    pub block_ids: Vec<Uuid>,
}

/// Request body for PATCH /api/blocks/{id}/collection
#[derive(Deserialize, Debug)]
pub struct MoveBlockRequest {
    /// Target collection, or null for uncategorized.
    pub collection_id: Option<Uuid>,
}

/// Request body for POST /api/collections
#[derive(Deserialize, Debug)]
pub struct CreateCollectionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub display_order: Option<i64>,
}

/// Request body for PATCH /api/collections/{id}
#[derive(Deserialize, Debug, Default)]
pub struct UpdateCollectionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default, with = "double_option")]
    pub display_order: Option<Option<i64>>,
}

/// Request body for PATCH /api/profile
#[derive(Deserialize, Debug, Default)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, with = "double_option")]
    pub display_name: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub bio: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub theme: Option<Option<String>>,
    #[serde(default)]
    pub onboarding_completed: Option<bool>,
}

// ============================================================================
// Response payloads
// ============================================================================

/// Dashboard view of a user's blocks partitioned by collection.
#[derive(Serialize, Debug)]
pub struct GroupedBlocks {
    /// The owner's collections, display order ascending (nulls last).
    pub collections: Vec<Collection>,
    /// Blocks grouped by collection id (stringified for JSON keys).
    pub blocks_by_collection: HashMap<String, Vec<Block>>,
    /// Blocks with no collection.
    pub uncategorized_blocks: Vec<Block>,
}

/// Everything needed to render a public page.
#[derive(Serialize, Debug)]
pub struct PublicPage {
    pub profile: Profile,
    pub blocks: Vec<Block>,
}

/// Response for POST /api/profile/avatar
#[derive(Serialize, Debug)]
pub struct AvatarResponse {
    pub avatar_url: String,
}
