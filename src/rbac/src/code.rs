//! Resource code generation and `whole_id` helpers
//!
//! Resource codes are canonical, type-prefixed identifiers derived from a
//! resource path, or from a manual suffix for Module resources:
//!
//! | Type   | Input                     | Code                 |
//! |--------|---------------------------|----------------------|
//! | Menu   | `/system/users`           | `MENU_system_users`  |
//! | Page   | `/system/users`           | `PAGE_system_users`  |
//! | Api    | `/api/users/:id`          | `API_users_id`       |
//! | Module | suffix `user_export`      | `MODULE_user_export` |
//!
//! # Example
//!
//! ```rust
//! use cretoai_rbac::code;
//! use cretoai_rbac::ResourceType;
//!
//! let res_code = code::generate(ResourceType::Api, "/api/users/:id", None).unwrap();
//! assert_eq!(res_code, "API_users_id");
//! assert!(code::validate(&res_code));
//! assert_eq!(code::extract_type(&res_code), Some(ResourceType::Api));
//! assert_eq!(code::extract_suffix(&res_code), "users_id");
//! ```

use crate::error::{RbacError, Result};
use crate::types::ResourceType;
use regex::Regex;
use std::sync::OnceLock;

/// Separator between `whole_id` segments
pub const WHOLE_ID_SEPARATOR: char = '.';

/// Prefix stripped from API paths
const API_PATH_PREFIX: &str = "api/";

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(MENU|PAGE|API|MODULE)_[A-Za-z0-9_]+$").expect("resource code pattern is valid")
    })
}

/// Generate the resource code for a type and path (or suffix)
///
/// `path` is ignored for Module resources, which require `custom_suffix`.
///
/// # Errors
///
/// - `InvalidInput` if the normalized path is empty, contains characters
///   outside `[A-Za-z0-9_]`, or a Module has no suffix
pub fn generate(
    resource_type: ResourceType,
    path: &str,
    custom_suffix: Option<&str>,
) -> Result<String> {
    let suffix = match resource_type {
        ResourceType::Menu | ResourceType::Page => normalize_path(path)?,
        ResourceType::Api => {
            let trimmed = path.trim_start_matches('/');
            let trimmed = trimmed.strip_prefix(API_PATH_PREFIX).unwrap_or(trimmed);
            normalize_path(trimmed)?
        }
        ResourceType::Module => {
            let suffix = custom_suffix.map(str::trim).unwrap_or("");
            if suffix.is_empty() {
                return Err(RbacError::InvalidInput(
                    "Module resources require a custom suffix".to_string(),
                ));
            }
            check_identifier(suffix, suffix)?;
            suffix.to_string()
        }
    };

    Ok(format!("{}_{}", resource_type.prefix(), suffix))
}

/// Same as [`generate`], with the type given by name or legacy code
///
/// # Errors
///
/// - `UnknownResourceType` if `resource_type` is not a known type
pub fn generate_from_name(
    resource_type: &str,
    path: &str,
    custom_suffix: Option<&str>,
) -> Result<String> {
    let resource_type = match resource_type.trim().parse::<u8>() {
        Ok(legacy) => ResourceType::try_from(legacy)?,
        Err(_) => resource_type.parse::<ResourceType>()?,
    };
    generate(resource_type, path, custom_suffix)
}

/// Normalize a path into a code suffix
///
/// Separators become `_`, parameter markers (`:id`) lose their colon, and
/// empty segments are dropped.
fn normalize_path(path: &str) -> Result<String> {
    let segments: Vec<String> = path
        .split('/')
        .map(|segment| segment.replace(':', ""))
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.is_empty() {
        return Err(RbacError::InvalidInput(format!(
            "Path '{}' is empty after normalization",
            path
        )));
    }

    let normalized = segments.join("_");
    check_identifier(&normalized, path)?;
    Ok(normalized)
}

fn check_identifier(identifier: &str, original: &str) -> Result<()> {
    if let Some(bad) = identifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(RbacError::InvalidInput(format!(
            "'{}' contains unsupported character '{}'",
            original, bad
        )));
    }
    Ok(())
}

/// Check that a string is a well-formed resource code
pub fn validate(res_code: &str) -> bool {
    code_pattern().is_match(res_code)
}

/// Resource type named by the code prefix
pub fn extract_type(res_code: &str) -> Option<ResourceType> {
    let (prefix, _) = res_code.split_once('_')?;
    ResourceType::ALL.into_iter().find(|t| t.prefix() == prefix)
}

/// Portion of the code after the first underscore
pub fn extract_suffix(res_code: &str) -> &str {
    res_code
        .split_once('_')
        .map(|(_, suffix)| suffix)
        .unwrap_or("")
}

/// Join ancestor ids and `self_id` into a `whole_id`
///
/// Empty ancestor entries are skipped.
pub fn derive_whole_id<I, S>(ancestor_ids: I, self_id: &str) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut whole_id = String::new();
    for ancestor in ancestor_ids {
        let ancestor = ancestor.as_ref();
        if ancestor.is_empty() {
            continue;
        }
        whole_id.push_str(ancestor);
        whole_id.push(WHOLE_ID_SEPARATOR);
    }
    whole_id.push_str(self_id);
    whole_id
}

/// Ids in a `whole_id`, root first
pub fn whole_id_segments(whole_id: &str) -> impl Iterator<Item = &str> {
    whole_id
        .split(WHOLE_ID_SEPARATOR)
        .filter(|segment| !segment.is_empty())
}

/// Whether the resource with `whole_id` lies strictly below `ancestor_id`
pub fn is_descendant_of(whole_id: &str, ancestor_id: &str) -> bool {
    let segments: Vec<&str> = whole_id_segments(whole_id).collect();
    match segments.split_last() {
        Some((_, ancestors)) => ancestors.contains(&ancestor_id),
        None => false,
    }
}

/// Replace the `old_prefix` chain of `whole_id` with `new_prefix`
///
/// Returns `None` when `whole_id` is neither `old_prefix` nor below it.
pub fn rebase_whole_id(whole_id: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if whole_id == old_prefix {
        return Some(new_prefix.to_string());
    }
    let rest = whole_id
        .strip_prefix(old_prefix)?
        .strip_prefix(WHOLE_ID_SEPARATOR)?;
    Some(format!("{}{}{}", new_prefix, WHOLE_ID_SEPARATOR, rest))
}
