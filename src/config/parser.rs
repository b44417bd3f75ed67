//! INI parsing logic for converting `Ini` → [`DictionarySettings`].
//!
//! Starts from defaults and overlays any values found in the INI. This is
//! the single place where INI key names are mapped to struct fields, and
//! where options that are invalid for cache layouts are rejected.

use ini::Ini;
use std::time::Duration;

use super::settings::{DictionarySettings, Lifetime, StorageSettings, UpdateQueueSettings};
use crate::error::DictionaryError;

/// Parses settings from INI text.
pub fn parse_str(text: &str) -> Result<DictionarySettings, DictionaryError> {
    let ini = Ini::load_from_str(text).map_err(|e| DictionaryError::BadConfiguration {
        reason: format!("malformed configuration: {e}"),
    })?;
    parse_ini(&ini)
}

/// Parses an `Ini` object into validated [`DictionarySettings`].
///
/// Recognized sections and keys:
///
/// * `[cache]` — `size_in_cells` (required), `strict_max_lifetime_seconds`,
///   `allow_read_expired_keys`, `max_update_queue_size`,
///   `max_threads_for_updates`, `update_queue_push_timeout_milliseconds`,
///   `query_wait_timeout_milliseconds`
/// * `[lifetime]` — `min_sec`, `max_sec`
///
/// `require_nonempty` and `range_min`/`range_max` are rejected: they belong
/// to other dictionary layouts.
pub fn parse_ini(ini: &Ini) -> Result<DictionarySettings, DictionaryError> {
    reject_foreign_options(ini)?;

    // [lifetime] section
    let mut lifetime_min = 0u64;
    let mut lifetime_max = 0u64;
    if let Some(section) = ini.section(Some("lifetime")) {
        if let Some(v) = section.get("min_sec") {
            lifetime_min = parse_u64("lifetime", "min_sec", v)?;
        }
        if let Some(v) = section.get("max_sec") {
            lifetime_max = parse_u64("lifetime", "max_sec", v)?;
        }
    }
    let lifetime = Lifetime::from_secs(lifetime_min, lifetime_max)?;

    // [cache] section
    let section = ini
        .section(Some("cache"))
        .ok_or_else(|| DictionaryError::BadConfiguration {
            reason: "missing [cache] section".to_string(),
        })?;

    let size_in_cells = match section.get("size_in_cells") {
        Some(v) => parse_u64("cache", "size_in_cells", v)? as usize,
        None => {
            return Err(DictionaryError::BadConfiguration {
                reason: "size_in_cells is required for cache layouts".to_string(),
            })
        }
    };

    let mut storage = StorageSettings::new(size_in_cells, lifetime);
    if let Some(v) = section.get("strict_max_lifetime_seconds") {
        let secs = parse_u64("cache", "strict_max_lifetime_seconds", v)?;
        storage = storage.with_strict_max_lifetime(Duration::from_secs(secs));
    }

    let mut queue = UpdateQueueSettings::default();
    if let Some(v) = section.get("max_update_queue_size") {
        queue = queue
            .with_max_update_queue_size(parse_u64("cache", "max_update_queue_size", v)? as usize);
    }
    if let Some(v) = section.get("max_threads_for_updates") {
        queue = queue
            .with_max_threads_for_updates(parse_u64("cache", "max_threads_for_updates", v)? as usize);
    }
    if let Some(v) = section.get("update_queue_push_timeout_milliseconds") {
        let ms = parse_u64("cache", "update_queue_push_timeout_milliseconds", v)?;
        queue = queue.with_push_timeout(Duration::from_millis(ms));
    }
    if let Some(v) = section.get("query_wait_timeout_milliseconds") {
        let ms = parse_u64("cache", "query_wait_timeout_milliseconds", v)?;
        queue = queue.with_query_wait_timeout(Duration::from_millis(ms));
    }

    let mut settings = DictionarySettings::new(storage).with_queue(queue);
    if let Some(v) = section.get("allow_read_expired_keys") {
        settings = settings
            .with_allow_read_expired_keys(parse_bool("cache", "allow_read_expired_keys", v)?);
    }

    settings.validate()?;
    Ok(settings)
}

/// Options recognized by other layouts but invalid here.
fn reject_foreign_options(ini: &Ini) -> Result<(), DictionaryError> {
    for section_name in ["cache", "structure", "dictionary"] {
        if let Some(section) = ini.section(Some(section_name)) {
            if section.get("require_nonempty").is_some() {
                return Err(DictionaryError::BadConfiguration {
                    reason: "cache layouts cannot have 'require_nonempty' set".to_string(),
                });
            }
            if section.get("range_min").is_some() || section.get("range_max").is_some() {
                return Err(DictionaryError::BadConfiguration {
                    reason: "range_min and range_max should be defined only for \
                             range-hashed layouts"
                        .to_string(),
                });
            }
        }
    }
    Ok(())
}

fn parse_u64(section: &str, key: &str, value: &str) -> Result<u64, DictionaryError> {
    value
        .trim()
        .parse()
        .map_err(|_| DictionaryError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be a non-negative integer".to_string(),
        })
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, DictionaryError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(DictionaryError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be a boolean".to_string(),
        }),
    }
}
