//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new random identifier in its hyphenated string form.
///
/// Used for the ids of cuts produced by truncation, extension and padding.
pub fn random_id() -> String {
    generate().to_string()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_round_trips_through_parse() {
        let id = random_id();
        assert_eq!(id.len(), 36);
        assert!(parse(&id).is_ok());
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(random_id(), random_id());
    }
}
