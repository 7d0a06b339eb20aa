//! Parsing of the roster-listing response.

/// Extracts player names from a `list` response such as
/// `"There are 3 of a max of 20 players online: Alice, Bob, Carol"`.
///
/// Everything after the first colon is split on commas; entries are trimmed
/// and empties dropped. A response without a colon yields no names.
pub fn parse_roster(response: &str) -> Vec<String> {
    let Some((_, names)) = response.split_once(':') else {
        return Vec::new();
    };

    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
