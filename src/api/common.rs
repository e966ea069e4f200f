//! Common API utilities and shared types
//!
//! Pagination defaults shared by the list endpoints. Query structs embed
//! `page`/`per_page` directly because flattened structs lose numeric
//! parsing in query strings.

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for most list endpoints
pub fn default_per_page() -> u32 {
    20
}

/// Default page size for the user directory
pub fn default_user_per_page() -> u32 {
    50
}
