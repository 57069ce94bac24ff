/// `singular` for one, otherwise `singular` plus "s".
pub fn pluralize(count: usize, singular: &str) -> String {
    if count == 1 {
        singular.to_string()
    } else {
        format!("{singular}s")
    }
}

/// "1 block", "3 blocks".
pub fn counted(count: usize, singular: &str) -> String {
    format!("{count} {}", pluralize(count, singular))
}
