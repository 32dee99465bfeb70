//! Store operations over the embedded database
//!
//! This module implements the business core: block and collection CRUD
//! with ownership enforcement, slug assignment, reordering, profile
//! management, and the public page/block resolution reads. Handlers stay
//! thin; everything that touches a table lives here.
//!
//! Every mutation re-checks `owner_id == identity` before applying.
//! Rows are stored as JSON and decoded through the strict `model` schema;
//! a row that fails to decode surfaces as an error instead of being
//! skipped.

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::database::{
    scope_range, scoped_key, TABLE_BLOCKS, TABLE_BLOCK_OWNER, TABLE_BLOCK_SLUGS,
    TABLE_COLLECTIONS, TABLE_COLLECTION_OWNER, TABLE_PROFILES, TABLE_USERNAMES,
};
use crate::error::AppError;
use crate::model::{
    Block, BlockType, Collection, CreateBlockRequest, CreateCollectionRequest, GroupedBlocks,
    Profile, UpdateBlockRequest, UpdateCollectionRequest, UpdateProfileRequest,
};
use crate::slug::{generate_available_slug, validate_slug};

/// Cosmetic display order for the default "Uncategorized" collection;
/// keeps it sorted after anything a user creates.
const DEFAULT_COLLECTION_ORDER: i64 = 999;

fn encode<T: Serialize>(value: &T) -> Result<String, AppError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, AppError> {
    Ok(serde_json::from_str(raw)?)
}

/// Username rules: 3-30 chars, same shape as a slug.
fn valid_username(username: &str) -> bool {
    username.len() >= 3 && username.len() <= 30 && validate_slug(username)
}

// ============================================================================
// Profile operations
// ============================================================================

/// Fetches the caller's profile, creating the empty row on first touch.
///
/// The row starts with a null username; block authoring stays refused
/// until one is claimed.
pub fn get_or_create_profile(db: &Database, identity: Uuid) -> Result<Profile, AppError> {
    let id_key = identity.to_string();

    {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TABLE_PROFILES)?;
        if let Some(raw) = table.get(id_key.as_str())? {
            return decode(raw.value());
        }
    }

    let now = Utc::now();
    let profile = Profile {
        id: identity,
        username: None,
        display_name: None,
        bio: None,
        avatar_url: None,
        theme: None,
        onboarding_completed: false,
        created_at: now,
        updated_at: now,
    };

    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(TABLE_PROFILES)?;
        // Re-check inside the write transaction; a concurrent first touch
        // must not clobber an already-claimed username.
        if let Some(raw) = table.get(id_key.as_str())? {
            return decode(raw.value());
        }
        table.insert(id_key.as_str(), encode(&profile)?.as_str())?;
    }
    write_txn.commit()?;

    Ok(profile)
}

/// Applies a partial profile update for the caller.
///
/// A username in the payload is normalized (trimmed, lowercased) and
/// claimed: invalid shapes fail, collisions with another profile fail
/// with "already taken", and a previously held username is released in
/// the same transaction.
pub fn update_profile(
    db: &Database,
    identity: Uuid,
    update: UpdateProfileRequest,
) -> Result<Profile, AppError> {
    let id_key = identity.to_string();

    let write_txn = db.begin_write()?;
    let profile = {
        let mut profiles = write_txn.open_table(TABLE_PROFILES)?;
        let mut profile: Profile = match profiles.get(id_key.as_str())? {
            Some(raw) => decode(raw.value())?,
            None => return Err(AppError::NotFound("profile")),
        };

        if let Some(requested) = update.username {
            let username = requested.trim().to_lowercase();
            if !valid_username(&username) {
                return Err(AppError::InvalidUsername);
            }
            if profile.username.as_deref() != Some(username.as_str()) {
                let mut usernames = write_txn.open_table(TABLE_USERNAMES)?;
                if let Some(holder) = usernames.get(username.as_str())? {
                    if holder.value() != id_key {
                        return Err(AppError::UsernameTaken);
                    }
                }
                if let Some(old) = &profile.username {
                    usernames.remove(old.as_str())?;
                }
                usernames.insert(username.as_str(), id_key.as_str())?;
                profile.username = Some(username);
            }
        }

        if let Some(display_name) = update.display_name {
            profile.display_name = display_name;
        }
        if let Some(bio) = update.bio {
            profile.bio = bio;
        }
        if let Some(theme) = update.theme {
            profile.theme = theme;
        }
        if let Some(done) = update.onboarding_completed {
            profile.onboarding_completed = done;
        }

        profile.updated_at = Utc::now();
        profiles.insert(id_key.as_str(), encode(&profile)?.as_str())?;
        profile
    };
    write_txn.commit()?;

    Ok(profile)
}

/// Stores a freshly uploaded avatar URL on the caller's profile.
///
/// Returns the updated profile and the URL it replaced, so the caller
/// can clean up the old object.
pub fn set_avatar_url(
    db: &Database,
    identity: Uuid,
    avatar_url: String,
) -> Result<(Profile, Option<String>), AppError> {
    let id_key = identity.to_string();

    let write_txn = db.begin_write()?;
    let result = {
        let mut profiles = write_txn.open_table(TABLE_PROFILES)?;
        let mut profile: Profile = match profiles.get(id_key.as_str())? {
            Some(raw) => decode(raw.value())?,
            None => return Err(AppError::NotFound("profile")),
        };
        let previous = profile.avatar_url.replace(avatar_url);
        profile.updated_at = Utc::now();
        profiles.insert(id_key.as_str(), encode(&profile)?.as_str())?;
        (profile, previous)
    };
    write_txn.commit()?;

    Ok(result)
}

// ============================================================================
// Block operations
// ============================================================================

/// Returns all of the owner's blocks ordered by ascending position.
///
/// Callers may only list their own blocks.
pub fn list_blocks(db: &Database, identity: Uuid, owner_id: Uuid) -> Result<Vec<Block>, AppError> {
    if identity != owner_id {
        return Err(AppError::Forbidden);
    }

    let read_txn = db.begin_read()?;
    let index = read_txn.open_table(TABLE_BLOCK_OWNER)?;
    let blocks_table = read_txn.open_table(TABLE_BLOCKS)?;

    let (start, end) = scope_range(&owner_id.to_string());
    let mut blocks = Vec::new();
    for entry in index.range(start.as_str()..end.as_str())? {
        let (_, block_id) = entry?;
        match blocks_table.get(block_id.value())? {
            Some(raw) => blocks.push(decode::<Block>(raw.value())?),
            None => return Err(AppError::NotFound("block")),
        }
    }
    blocks.sort_by_key(|b| b.position);

    Ok(blocks)
}

/// Creates a block under the caller's identity.
///
/// Rejects callers writing into someone else's scope, callers without a
/// set-up profile (no row or no username), unsupported or mismatched
/// content, and slug collisions. New blocks are drafts unless explicitly
/// published. Bio blocks are never slugged and at most one exists per
/// owner; a second create points the caller at the existing one.
pub fn create_block(
    db: &Database,
    identity: Uuid,
    request: CreateBlockRequest,
) -> Result<Block, AppError> {
    if identity != request.owner_id {
        return Err(AppError::Forbidden);
    }
    if !request.block_type.is_supported() {
        return Err(AppError::UnsupportedBlockType);
    }
    if request.content.kind() != request.block_type {
        return Err(AppError::ContentMismatch);
    }

    let owner_key = request.owner_id.to_string();

    let write_txn = db.begin_write()?;
    let block = {
        let profiles = write_txn.open_table(TABLE_PROFILES)?;
        let profile: Option<Profile> = match profiles.get(owner_key.as_str())? {
            Some(raw) => Some(decode(raw.value())?),
            None => None,
        };
        match profile {
            Some(p) if p.username.is_some() => {}
            _ => return Err(AppError::SetupRequired),
        }

        let mut blocks_table = write_txn.open_table(TABLE_BLOCKS)?;
        let mut owner_index = write_txn.open_table(TABLE_BLOCK_OWNER)?;
        let mut slug_index = write_txn.open_table(TABLE_BLOCK_SLUGS)?;

        // Walk the owner's existing blocks once: next append position and
        // the single-bio rule both need them.
        let (start, end) = scope_range(&owner_key);
        let mut max_position: Option<i64> = None;
        let mut existing_bio: Option<Uuid> = None;
        for entry in owner_index.range(start.as_str()..end.as_str())? {
            let (_, block_id) = entry?;
            if let Some(raw) = blocks_table.get(block_id.value())? {
                let existing: Block = decode(raw.value())?;
                max_position = Some(max_position.map_or(existing.position, |m| m.max(existing.position)));
                if existing.block_type == BlockType::Bio {
                    existing_bio = Some(existing.id);
                }
            }
        }

        if request.block_type == BlockType::Bio {
            if let Some(existing) = existing_bio {
                return Err(AppError::BioExists(existing));
            }
        }

        // Bio blocks are never slugged, whatever the caller sent.
        let slug = if request.block_type == BlockType::Bio {
            None
        } else {
            match request.slug {
                Some(slug) => {
                    if !validate_slug(&slug) {
                        return Err(AppError::InvalidSlug(slug));
                    }
                    let key = scoped_key(&owner_key, &slug);
                    if slug_index.get(key.as_str())?.is_some() {
                        return Err(AppError::SlugTaken(slug));
                    }
                    Some(slug)
                }
                None => None,
            }
        };

        if let Some(collection_id) = request.collection_id {
            let collections = write_txn.open_table(TABLE_COLLECTIONS)?;
            let collection: Collection = match collections.get(collection_id.to_string().as_str())? {
                Some(raw) => decode(raw.value())?,
                None => return Err(AppError::NotFound("collection")),
            };
            if collection.owner_id != identity {
                return Err(AppError::Forbidden);
            }
        }

        let now = Utc::now();
        let block = Block {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            block_type: request.block_type,
            title: request.title,
            slug,
            position: request
                .position
                .unwrap_or_else(|| max_position.map_or(0, |m| m + 1)),
            display_order: None,
            is_published: request.is_published.unwrap_or(false),
            is_visible: true,
            collection_id: request.collection_id,
            content: request.content.normalized(),
            config: request.config.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };

        let block_key = block.id.to_string();
        blocks_table.insert(block_key.as_str(), encode(&block)?.as_str())?;
        owner_index.insert(
            scoped_key(&owner_key, &block_key).as_str(),
            block_key.as_str(),
        )?;
        if let Some(slug) = &block.slug {
            slug_index.insert(scoped_key(&owner_key, slug).as_str(), block_key.as_str())?;
        }

        tracing::info!(block_id = %block.id, owner_id = %block.owner_id, "block created");
        block
    };
    write_txn.commit()?;

    Ok(block)
}

/// Creates a block, deriving a slug from the title first when asked.
///
/// With `generate_slug` set and no explicit slug, the title is slugified
/// and resolved against the owner's namespace before delegating to
/// [`create_block`] (which re-checks availability at insert time). Bio
/// blocks skip generation entirely.
pub fn create_block_with_slug(
    db: &Database,
    identity: Uuid,
    mut request: CreateBlockRequest,
) -> Result<Block, AppError> {
    if request.generate_slug
        && request.slug.is_none()
        && request.block_type != BlockType::Bio
    {
        let owner_key = request.owner_id.to_string();
        let title = request.title.clone().unwrap_or_default();

        let read_txn = db.begin_read()?;
        let slug_index = read_txn.open_table(TABLE_BLOCK_SLUGS)?;
        let derived = generate_available_slug(&title, |candidate| {
            Ok(slug_index
                .get(scoped_key(&owner_key, candidate).as_str())?
                .is_some())
        })?;
        request.slug = Some(derived);
    }

    create_block(db, identity, request)
}

/// Applies a partial update to a block the caller owns.
///
/// Only fields present in the payload change; `updated_at` always
/// refreshes. Content is re-validated against the block's type and its
/// derived metadata recomputed. Slug changes re-validate syntax and
/// per-owner uniqueness and keep the slug index in step.
pub fn update_block(
    db: &Database,
    identity: Uuid,
    block_id: Uuid,
    update: UpdateBlockRequest,
) -> Result<Block, AppError> {
    let block_key = block_id.to_string();

    let write_txn = db.begin_write()?;
    let block = {
        let mut blocks_table = write_txn.open_table(TABLE_BLOCKS)?;
        let mut block: Block = match blocks_table.get(block_key.as_str())? {
            Some(raw) => decode(raw.value())?,
            None => return Err(AppError::NotFound("block")),
        };
        if block.owner_id != identity {
            return Err(AppError::Forbidden);
        }
        let owner_key = block.owner_id.to_string();

        if let Some(title) = update.title {
            block.title = title;
        }
        if let Some(content) = update.content {
            if content.kind() != block.block_type {
                return Err(AppError::ContentMismatch);
            }
            block.content = content.normalized();
        }
        if let Some(config) = update.config {
            block.config = config;
        }
        if let Some(position) = update.position {
            block.position = position;
        }
        if let Some(requested_slug) = update.slug {
            // Bio blocks stay slugless regardless of caller input.
            let new_slug = if block.block_type == BlockType::Bio {
                None
            } else {
                requested_slug
            };
            if new_slug != block.slug {
                let mut slug_index = write_txn.open_table(TABLE_BLOCK_SLUGS)?;
                if let Some(slug) = &new_slug {
                    if !validate_slug(slug) {
                        return Err(AppError::InvalidSlug(slug.clone()));
                    }
                    let key = scoped_key(&owner_key, slug);
                    if let Some(holder) = slug_index.get(key.as_str())? {
                        if holder.value() != block_key {
                            return Err(AppError::SlugTaken(slug.clone()));
                        }
                    }
                    slug_index.insert(key.as_str(), block_key.as_str())?;
                }
                if let Some(old) = &block.slug {
                    slug_index.remove(scoped_key(&owner_key, old).as_str())?;
                }
                block.slug = new_slug;
            }
        }
        if let Some(is_published) = update.is_published {
            block.is_published = is_published;
        }
        if let Some(is_visible) = update.is_visible {
            block.is_visible = is_visible;
        }
        if let Some(display_order) = update.display_order {
            block.display_order = display_order;
        }
        if let Some(collection_id) = update.collection_id {
            if let Some(target) = collection_id {
                let collections = write_txn.open_table(TABLE_COLLECTIONS)?;
                let collection: Collection = match collections.get(target.to_string().as_str())? {
                    Some(raw) => decode(raw.value())?,
                    None => return Err(AppError::NotFound("collection")),
                };
                if collection.owner_id != identity {
                    return Err(AppError::Forbidden);
                }
            }
            block.collection_id = collection_id;
        }

        block.updated_at = Utc::now();
        blocks_table.insert(block_key.as_str(), encode(&block)?.as_str())?;
        block
    };
    write_txn.commit()?;

    Ok(block)
}

/// Ownership-checked hard delete; cleans the owner and slug indexes.
pub fn delete_block(db: &Database, identity: Uuid, block_id: Uuid) -> Result<(), AppError> {
    let block_key = block_id.to_string();

    let write_txn = db.begin_write()?;
    {
        let mut blocks_table = write_txn.open_table(TABLE_BLOCKS)?;
        let block: Block = match blocks_table.get(block_key.as_str())? {
            Some(raw) => decode(raw.value())?,
            None => return Err(AppError::NotFound("block")),
        };
        if block.owner_id != identity {
            return Err(AppError::Forbidden);
        }
        let owner_key = block.owner_id.to_string();

        blocks_table.remove(block_key.as_str())?;

        let mut owner_index = write_txn.open_table(TABLE_BLOCK_OWNER)?;
        owner_index.remove(scoped_key(&owner_key, &block_key).as_str())?;

        if let Some(slug) = &block.slug {
            let mut slug_index = write_txn.open_table(TABLE_BLOCK_SLUGS)?;
            slug_index.remove(scoped_key(&owner_key, slug).as_str())?;
        }

        tracing::info!(block_id = %block_id, owner_id = %identity, "block deleted");
    }
    write_txn.commit()?;

    Ok(())
}

/// Applies one position update, scoped by both block id and owner.
fn apply_position(
    db: &Database,
    identity: Uuid,
    block_id: Uuid,
    position: i64,
) -> Result<(), AppError> {
    let block_key = block_id.to_string();

    let write_txn = db.begin_write()?;
    {
        let mut blocks_table = write_txn.open_table(TABLE_BLOCKS)?;
        let mut block: Block = match blocks_table.get(block_key.as_str())? {
            Some(raw) => decode(raw.value())?,
            None => return Err(AppError::NotFound("block")),
        };
        if block.owner_id != identity {
            return Err(AppError::Forbidden);
        }
        block.position = position;
        block.updated_at = Utc::now();
        blocks_table.insert(block_key.as_str(), encode(&block)?.as_str())?;
    }
    write_txn.commit()?;

    Ok(())
}

/// Applies a batch of position updates.
///
/// Every item is attempted as its own independent write regardless of
/// earlier failures; the batch is NOT atomic. Any failure is reported as
/// one aggregate error after the whole batch ran, so a caller must not
/// assume either all-or-nothing or none applied.
pub fn reorder_blocks(
    db: &Database,
    identity: Uuid,
    owner_id: Uuid,
    items: &[(Uuid, i64)],
) -> Result<(), AppError> {
    if identity != owner_id {
        return Err(AppError::Forbidden);
    }

    let mut failed = 0usize;
    for (block_id, position) in items {
        if let Err(err) = apply_position(db, identity, *block_id, *position) {
            tracing::warn!(block_id = %block_id, "position update failed: {}", err);
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(AppError::ReorderPartialFailure {
            failed,
            total: items.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Collection operations
// ============================================================================

fn load_owned_collection(
    collections: &impl ReadableTable<&'static str, &'static str>,
    identity: Uuid,
    collection_id: Uuid,
) -> Result<Collection, AppError> {
    let collection: Collection = match collections.get(collection_id.to_string().as_str())? {
        Some(raw) => decode(raw.value())?,
        None => return Err(AppError::NotFound("collection")),
    };
    if collection.owner_id != identity {
        return Err(AppError::Forbidden);
    }
    Ok(collection)
}

/// The caller's collections, display order ascending with nulls last.
pub fn get_user_collections(db: &Database, identity: Uuid) -> Result<Vec<Collection>, AppError> {
    let read_txn = db.begin_read()?;
    let index = read_txn.open_table(TABLE_COLLECTION_OWNER)?;
    let collections_table = read_txn.open_table(TABLE_COLLECTIONS)?;

    let (start, end) = scope_range(&identity.to_string());
    let mut collections = Vec::new();
    for entry in index.range(start.as_str()..end.as_str())? {
        let (_, collection_id) = entry?;
        match collections_table.get(collection_id.value())? {
            Some(raw) => collections.push(decode::<Collection>(raw.value())?),
            None => return Err(AppError::NotFound("collection")),
        }
    }
    sort_collections(&mut collections);

    Ok(collections)
}

fn sort_collections(collections: &mut [Collection]) {
    collections.sort_by_key(|c| {
        (
            c.display_order.is_none(),
            c.display_order.unwrap_or(0),
            c.created_at,
        )
    });
}

/// Creates a collection for the caller.
///
/// An omitted display order lands after everything that exists:
/// `max + 1`, or 0 for the first collection.
pub fn create_collection(
    db: &Database,
    identity: Uuid,
    request: CreateCollectionRequest,
) -> Result<Collection, AppError> {
    let owner_key = identity.to_string();

    let write_txn = db.begin_write()?;
    let collection = {
        let mut collections_table = write_txn.open_table(TABLE_COLLECTIONS)?;
        let mut owner_index = write_txn.open_table(TABLE_COLLECTION_OWNER)?;

        let display_order = match request.display_order {
            Some(order) => Some(order),
            None => {
                let (start, end) = scope_range(&owner_key);
                let mut max_order: Option<i64> = None;
                for entry in owner_index.range(start.as_str()..end.as_str())? {
                    let (_, collection_id) = entry?;
                    if let Some(raw) = collections_table.get(collection_id.value())? {
                        let existing: Collection = decode(raw.value())?;
                        if let Some(order) = existing.display_order {
                            max_order = Some(max_order.map_or(order, |m| m.max(order)));
                        }
                    }
                }
                Some(max_order.map_or(0, |m| m + 1))
            }
        };

        let now = Utc::now();
        let collection = Collection {
            id: Uuid::new_v4(),
            owner_id: identity,
            name: request.name,
            slug: None,
            description: request.description,
            is_public: request.is_public.unwrap_or(false),
            display_order,
            created_at: now,
            updated_at: now,
        };

        let collection_key = collection.id.to_string();
        collections_table.insert(collection_key.as_str(), encode(&collection)?.as_str())?;
        owner_index.insert(
            scoped_key(&owner_key, &collection_key).as_str(),
            collection_key.as_str(),
        )?;
        collection
    };
    write_txn.commit()?;

    Ok(collection)
}

/// Ownership-checked partial update of a collection.
pub fn update_collection(
    db: &Database,
    identity: Uuid,
    collection_id: Uuid,
    update: UpdateCollectionRequest,
) -> Result<Collection, AppError> {
    let collection_key = collection_id.to_string();

    let write_txn = db.begin_write()?;
    let collection = {
        let mut collections_table = write_txn.open_table(TABLE_COLLECTIONS)?;
        let mut collection = load_owned_collection(&collections_table, identity, collection_id)?;

        if let Some(name) = update.name {
            collection.name = name;
        }
        if let Some(description) = update.description {
            collection.description = description;
        }
        if let Some(is_public) = update.is_public {
            collection.is_public = is_public;
        }
        if let Some(display_order) = update.display_order {
            collection.display_order = display_order;
        }

        collection.updated_at = Utc::now();
        collections_table.insert(collection_key.as_str(), encode(&collection)?.as_str())?;
        collection
    };
    write_txn.commit()?;

    Ok(collection)
}

/// Deletes a collection the caller owns.
///
/// Member blocks survive: their `collection_id` is nulled before the
/// collection row goes, and both steps share one write transaction so
/// no block is ever left pointing at a vanished collection.
pub fn delete_collection(
    db: &Database,
    identity: Uuid,
    collection_id: Uuid,
) -> Result<(), AppError> {
    let collection_key = collection_id.to_string();
    let owner_key = identity.to_string();

    let write_txn = db.begin_write()?;
    {
        let mut collections_table = write_txn.open_table(TABLE_COLLECTIONS)?;
        load_owned_collection(&collections_table, identity, collection_id)?;

        // Unlink members first.
        let mut blocks_table = write_txn.open_table(TABLE_BLOCKS)?;
        let owner_blocks = write_txn.open_table(TABLE_BLOCK_OWNER)?;
        let (start, end) = scope_range(&owner_key);
        let mut members = Vec::new();
        for entry in owner_blocks.range(start.as_str()..end.as_str())? {
            let (_, block_id) = entry?;
            if let Some(raw) = blocks_table.get(block_id.value())? {
                let block: Block = decode(raw.value())?;
                if block.collection_id == Some(collection_id) {
                    members.push(block);
                }
            }
        }
        let now = Utc::now();
        for mut block in members {
            block.collection_id = None;
            block.updated_at = now;
            let key = block.id.to_string();
            blocks_table.insert(key.as_str(), encode(&block)?.as_str())?;
        }

        collections_table.remove(collection_key.as_str())?;
        let mut owner_index = write_txn.open_table(TABLE_COLLECTION_OWNER)?;
        owner_index.remove(scoped_key(&owner_key, &collection_key).as_str())?;

        tracing::info!(collection_id = %collection_id, owner_id = %identity, "collection deleted");
    }
    write_txn.commit()?;

    Ok(())
}

/// Moves a block into a collection (or out, with a null target).
///
/// The caller must own the block, and the target collection when one is
/// given.
pub fn move_block_to_collection(
    db: &Database,
    identity: Uuid,
    block_id: Uuid,
    collection_id: Option<Uuid>,
) -> Result<Block, AppError> {
    let block_key = block_id.to_string();

    let write_txn = db.begin_write()?;
    let block = {
        let mut blocks_table = write_txn.open_table(TABLE_BLOCKS)?;
        let mut block: Block = match blocks_table.get(block_key.as_str())? {
            Some(raw) => decode(raw.value())?,
            None => return Err(AppError::NotFound("block")),
        };
        if block.owner_id != identity {
            return Err(AppError::Forbidden);
        }

        if let Some(target) = collection_id {
            let collections_table = write_txn.open_table(TABLE_COLLECTIONS)?;
            load_owned_collection(&collections_table, identity, target)?;
        }

        block.collection_id = collection_id;
        block.updated_at = Utc::now();
        blocks_table.insert(block_key.as_str(), encode(&block)?.as_str())?;
        block
    };
    write_txn.commit()?;

    Ok(block)
}

/// Dashboard view: the caller's collections plus their blocks partitioned
/// by collection, with `collection_id = null` blocks in the uncategorized
/// bucket. Blocks referencing a collection that no longer exists land in
/// uncategorized too.
pub fn get_blocks_by_collection(db: &Database, identity: Uuid) -> Result<GroupedBlocks, AppError> {
    let collections = get_user_collections(db, identity)?;
    let blocks = list_blocks(db, identity, identity)?;

    let known: std::collections::HashSet<Uuid> = collections.iter().map(|c| c.id).collect();
    let mut blocks_by_collection: std::collections::HashMap<String, Vec<Block>> =
        std::collections::HashMap::new();
    let mut uncategorized_blocks = Vec::new();

    for block in blocks {
        match block.collection_id {
            Some(collection_id) if known.contains(&collection_id) => blocks_by_collection
                .entry(collection_id.to_string())
                .or_default()
                .push(block),
            _ => uncategorized_blocks.push(block),
        }
    }

    Ok(GroupedBlocks {
        collections,
        blocks_by_collection,
        uncategorized_blocks,
    })
}

/// Creates the cosmetic "Uncategorized" collection.
///
/// Blocks with a null `collection_id` render as uncategorized whether or
/// not this record exists.
pub fn create_default_collection(db: &Database, identity: Uuid) -> Result<Collection, AppError> {
    create_collection(
        db,
        identity,
        CreateCollectionRequest {
            name: "Uncategorized".to_string(),
            description: None,
            is_public: None,
            display_order: Some(DEFAULT_COLLECTION_ORDER),
        },
    )
}

// ============================================================================
// Public resolution
// ============================================================================

/// Looks a profile up by username. No auth; absent is a null result,
/// not an error.
pub fn get_public_profile(db: &Database, username: &str) -> Result<Option<Profile>, AppError> {
    let normalized = username.trim().to_lowercase();

    let read_txn = db.begin_read()?;
    let usernames = read_txn.open_table(TABLE_USERNAMES)?;
    let profile_id = match usernames.get(normalized.as_str())? {
        Some(raw) => raw.value().to_string(),
        None => return Ok(None),
    };

    let profiles = read_txn.open_table(TABLE_PROFILES)?;
    match profiles.get(profile_id.as_str())? {
        Some(raw) => Ok(Some(decode(raw.value())?)),
        None => Ok(None),
    }
}

/// Published, visible blocks of a profile in public-display order:
/// `display_order` ascending with nulls last, then authoring position.
pub fn get_public_user_blocks(db: &Database, profile_id: Uuid) -> Result<Vec<Block>, AppError> {
    let read_txn = db.begin_read()?;
    let index = read_txn.open_table(TABLE_BLOCK_OWNER)?;
    let blocks_table = read_txn.open_table(TABLE_BLOCKS)?;

    let (start, end) = scope_range(&profile_id.to_string());
    let mut blocks = Vec::new();
    for entry in index.range(start.as_str()..end.as_str())? {
        let (_, block_id) = entry?;
        if let Some(raw) = blocks_table.get(block_id.value())? {
            let block: Block = decode(raw.value())?;
            if block.is_published && block.is_visible {
                blocks.push(block);
            }
        }
    }
    blocks.sort_by_key(|b| {
        (
            b.display_order.is_none(),
            b.display_order.unwrap_or(0),
            b.position,
        )
    });

    Ok(blocks)
}

/// Outcome of resolving a public block address.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicBlockResolution {
    /// The block, reached by its canonical address.
    Block(Box<Block>),
    /// The block was reached by UUID but owns a slug; the slug URL is
    /// canonical, so the page layer should redirect there.
    RedirectToSlug(String),
}

/// Individual-page eligibility: published, visible, text-type.
fn publicly_addressable(block: &Block) -> bool {
    block.is_published && block.is_visible && block.block_type == BlockType::Text
}

/// Resolves a path token that may be a slug or a UUID to one of the
/// profile's blocks.
///
/// UUID-shaped tokens look up by id, anything else by slug, both scoped
/// to the profile. Only published, visible text blocks resolve. A
/// UUID hit on a slugged block yields the redirect signal instead of
/// content; slugs are canonical once present, UUIDs a fallback address.
pub fn get_block_by_slug_or_id(
    db: &Database,
    profile_id: Uuid,
    token: &str,
) -> Result<Option<PublicBlockResolution>, AppError> {
    let read_txn = db.begin_read()?;
    let blocks_table = read_txn.open_table(TABLE_BLOCKS)?;

    if crate::slug::is_uuid(token) {
        let normalized = token.to_lowercase();
        let block: Block = match blocks_table.get(normalized.as_str())? {
            Some(raw) => decode(raw.value())?,
            None => return Ok(None),
        };
        if block.owner_id != profile_id || !publicly_addressable(&block) {
            return Ok(None);
        }
        let resolution = match block.slug.clone() {
            Some(slug) => PublicBlockResolution::RedirectToSlug(slug),
            None => PublicBlockResolution::Block(Box::new(block)),
        };
        return Ok(Some(resolution));
    }

    let slug_index = read_txn.open_table(TABLE_BLOCK_SLUGS)?;
    let key = scoped_key(&profile_id.to_string(), token);
    let block_id = match slug_index.get(key.as_str())? {
        Some(raw) => raw.value().to_string(),
        None => return Ok(None),
    };
    let block: Block = match blocks_table.get(block_id.as_str())? {
        Some(raw) => decode(raw.value())?,
        None => return Ok(None),
    };
    if !publicly_addressable(&block) {
        return Ok(None);
    }
    Ok(Some(PublicBlockResolution::Block(Box::new(block))))
}
