// naming.rs — Default name generation for new change sets.
//
// Looks at every known name, takes the last whitespace-separated token and
// tries to read it as an integer. The next name is one past the largest
// number found, so "Change Set 1", "Change Set 3", "Foo" yields
// "Change Set 4".

/// Prefix of generated change set names.
pub const DEFAULT_NAME_PREFIX: &str = "Change Set";

/// Generate the next default change set name from the known names.
pub fn generate_name<'a, I>(names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let latest = names
        .into_iter()
        .filter_map(|name| name.split_whitespace().last())
        .filter_map(|token| token.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{} {}", DEFAULT_NAME_PREFIX, latest.saturating_add(1))
}
