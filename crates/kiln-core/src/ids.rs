use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate an opaque 8-character lowercase identifier.
///
/// Used for run ids and asset ids. Lowercased so ids are safe as
/// directory names on case-insensitive filesystems.
pub fn new_id() -> String {
    let id: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    id.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_eight_lowercase_chars() {
        for _ in 0..32 {
            let id = new_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }
}
