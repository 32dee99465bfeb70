//! Slug utility and availability resolver
//!
//! Pure functions for turning titles into canonical URL-safe slugs,
//! validating slug syntax, and telling UUID-shaped path segments apart
//! from slug-shaped ones, plus the probing resolver that finds a free
//! slug within an owner's namespace.

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AppError;

lazy_static! {
    /// Valid slug: lowercase alphanumeric segments joined by single hyphens.
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();

    /// Canonical 8-4-4-4-12 UUID with version nibble 1-5 and RFC variant.
    /// Shape detection only; decides "lookup by id" vs "lookup by slug".
    static ref UUID_REGEX: Regex = Regex::new(
        r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$"
    )
    .unwrap();
}

/// Maximum slug length accepted anywhere.
pub const MAX_SLUG_LEN: usize = 100;

/// Highest numeric suffix the availability resolver probes before giving
/// up and stamping a timestamp suffix.
const MAX_NUMBERED_SUFFIX: u32 = 100;

/// Base used when a title yields nothing slug-worthy.
const FALLBACK_BASE: &str = "untitled";

/// Turns an arbitrary title into a canonical slug.
///
/// Lowercases, trims, collapses whitespace/underscores into single
/// hyphens, drops everything outside `[a-z0-9-]`, collapses repeated
/// hyphens, and strips leading/trailing hyphens. Total: any input yields
/// a string, possibly empty.
pub fn generate_slug(title: &str) -> String {
    let lowered = title.trim().to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut pending_hyphen = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_hyphen = !out.is_empty();
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_hyphen {
                out.push('-');
                pending_hyphen = false;
            }
            out.push(ch);
        }
        // anything else is dropped without breaking a hyphen run
    }
    out
}

/// True iff `slug` is nonempty, at most 100 chars, and matches
/// `^[a-z0-9]+(-[a-z0-9]+)*$`.
pub fn validate_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.len() <= MAX_SLUG_LEN && SLUG_REGEX.is_match(slug)
}

/// True iff `s` looks like a canonical UUID.
pub fn is_uuid(s: &str) -> bool {
    UUID_REGEX.is_match(s)
}

/// Finds a slug that is free within one owner's namespace.
///
/// `is_taken` is the persistence probe, scoped to the owner by the
/// caller. The base slug is returned unchanged when free; otherwise
/// `base-2` .. `base-100` are probed in order, and if every numbered
/// variant is taken the last six digits of the current epoch
/// milliseconds are stamped on without a further probe.
pub fn find_available_slug<F>(base: &str, mut is_taken: F) -> Result<String, AppError>
where
    F: FnMut(&str) -> Result<bool, AppError>,
{
    if !is_taken(base)? {
        return Ok(base.to_string());
    }

    for n in 2..=MAX_NUMBERED_SUFFIX {
        let candidate = format!("{}-{}", base, n);
        if !is_taken(&candidate)? {
            return Ok(candidate);
        }
    }

    // Statistically safe, not guaranteed; accepted as the pathological-case
    // escape hatch.
    let stamp = Utc::now().timestamp_millis().rem_euclid(1_000_000);
    Ok(format!("{}-{:06}", base, stamp))
}

/// Derives a slug from a title and resolves it to a free one.
///
/// An empty or invalid derivation falls back to the literal base
/// `"untitled"` before probing.
pub fn generate_available_slug<F>(title: &str, is_taken: F) -> Result<String, AppError>
where
    F: FnMut(&str) -> Result<bool, AppError>,
{
    let base = generate_slug(title);
    let base = if validate_slug(&base) {
        base
    } else {
        FALLBACK_BASE.to_string()
    };
    find_available_slug(&base, is_taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn taken_set(slugs: &[&str]) -> HashSet<String> {
        slugs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn generates_canonical_slugs() {
        assert_eq!(generate_slug("Hello, World!"), "hello-world");
        assert_eq!(generate_slug("  __multi   space__ "), "multi-space");
        assert_eq!(generate_slug("???"), "");
        assert_eq!(generate_slug(""), "");
        assert_eq!(generate_slug("already-a-slug"), "already-a-slug");
        assert_eq!(generate_slug("CamelCase Title 123"), "camelcase-title-123");
        assert_eq!(generate_slug("trailing punctuation..."), "trailing-punctuation");
    }

    #[test]
    fn generate_slug_is_idempotent() {
        for input in [
            "Hello, World!",
            "  __multi   space__ ",
            "???",
            "",
            "Ünïcode Títle",
            "a--b__c  d",
            "-leading-and-trailing-",
        ] {
            let once = generate_slug(input);
            assert_eq!(generate_slug(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn validates_slug_syntax() {
        assert!(validate_slug("hello-world"));
        assert!(validate_slug("a"));
        assert!(validate_slug("a1-b2-c3"));
        assert!(!validate_slug(""));
        assert!(!validate_slug("-leading"));
        assert!(!validate_slug("trailing-"));
        assert!(!validate_slug("double--hyphen"));
        assert!(!validate_slug("UpperCase"));
        assert!(!validate_slug("with space"));
        assert!(validate_slug(&"a".repeat(100)));
        assert!(!validate_slug(&"a".repeat(101)));
    }

    #[test]
    fn detects_uuid_shapes() {
        assert!(is_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_uuid("550E8400-E29B-41D4-A716-446655440000"));
        assert!(!is_uuid("not-a-uuid"));
        assert!(!is_uuid("hello-world"));
        // version nibble 0 and bad variant are not canonical
        assert!(!is_uuid("550e8400-e29b-01d4-a716-446655440000"));
        assert!(!is_uuid("550e8400-e29b-41d4-c716-446655440000"));
    }

    #[test]
    fn free_base_is_returned_unchanged() {
        let taken = taken_set(&[]);
        let slug = find_available_slug("base", |s| Ok(taken.contains(s))).unwrap();
        assert_eq!(slug, "base");
    }

    #[test]
    fn probes_numbered_suffixes_in_order() {
        let taken = taken_set(&["base", "base-2", "base-3"]);
        let slug = find_available_slug("base", |s| Ok(taken.contains(s))).unwrap();
        assert_eq!(slug, "base-4");
    }

    #[test]
    fn falls_back_to_timestamp_when_all_numbered_taken() {
        let mut taken = taken_set(&["base"]);
        for n in 2..=100 {
            taken.insert(format!("base-{}", n));
        }
        let slug = find_available_slug("base", |s| Ok(taken.contains(s))).unwrap();
        assert!(slug.starts_with("base-"), "got {}", slug);
        let suffix = &slug["base-".len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn empty_titles_fall_back_to_untitled() {
        let taken = taken_set(&[]);
        let slug = generate_available_slug("???", |s| Ok(taken.contains(s))).unwrap();
        assert_eq!(slug, "untitled");

        let taken = taken_set(&["untitled"]);
        let slug = generate_available_slug("", |s| Ok(taken.contains(s))).unwrap();
        assert_eq!(slug, "untitled-2");
    }

    #[test]
    fn titles_derive_before_probing() {
        let taken = taken_set(&["hello-world"]);
        let slug = generate_available_slug("Hello, World!", |s| Ok(taken.contains(s))).unwrap();
        assert_eq!(slug, "hello-world-2");
    }
}
