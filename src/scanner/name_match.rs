/// Placeholder for missing artist and album tags.
pub const UNKNOWN_NAME: &str = "<Unknown>";

/// Key used to decide whether two artist or album names are the same.
pub fn name_match(name: &str) -> String {
    let stripped = name
        .strip_prefix("The ")
        .or_else(|| name.strip_prefix("A "))
        .unwrap_or(name);
    stripped.replace(" and ", " & ")
}
