//! Target channel names.

/// Lowercase, spaces to hyphens, drop anything outside `[a-z0-9-]`.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

pub fn puzzle_channel_name(name: &str, solved: bool) -> String {
    if solved {
        format!("solved-{}", slug(name))
    } else {
        slug(name)
    }
}

pub fn round_category_name(name: &str) -> String {
    slug(name)
}

pub fn round_index_name(name: &str) -> String {
    format!("{}-puzzles", slug(name))
}
