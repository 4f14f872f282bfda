//! Address normalization against configured city prefixes.

use std::cmp::Reverse;

/// Removes `?` characters and surrounding whitespace.
#[must_use]
pub fn clean_address(raw: &str) -> String {
    raw.replace('?', "").trim().to_string()
}

/// Literal address prefixes, longest first.
///
/// Prefixes of equal length keep their configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressPrefixes {
    prefixes: Vec<String>,
}

impl AddressPrefixes {
    /// Sorts the configured prefixes longest first.
    #[must_use]
    pub fn new(prefixes: &[String]) -> Self {
        let mut prefixes = prefixes.to_vec();
        prefixes.sort_by_key(|p| Reverse(p.chars().count()));
        Self { prefixes }
    }

    /// Prefixes in matching order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.prefixes
    }

    /// Strips the first (longest) matching prefix, then commas and spaces
    /// from both ends of the remainder.
    ///
    /// Returns `None` when no prefix matches.
    #[must_use]
    pub fn suffix<'a>(&self, address: &'a str) -> Option<&'a str> {
        self.prefixes.iter().find_map(|prefix| {
            address
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.trim_matches([',', ' ']))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes(list: &[&str]) -> AddressPrefixes {
        AddressPrefixes::new(&list.iter().map(ToString::to_string).collect::<Vec<_>>())
    }

    #[test]
    fn longest_prefix_wins() {
        let prefixes = prefixes(&["Paris", "Paris, Rue de la Paix"]);
        assert_eq!(prefixes.suffix("Paris, Rue de la Paix 5"), Some("5"));
        assert_eq!(prefixes.suffix("Paris, Avenue Foch 2"), Some("Avenue Foch 2"));
    }

    #[test]
    fn trailing_separators_are_stripped() {
        let prefixes = prefixes(&["Paris"]);
        assert_eq!(prefixes.suffix("Paris, Rue 5,"), Some("Rue 5"));
        assert_eq!(prefixes.suffix("Paris, Rue 5 , "), Some("Rue 5"));
        assert_eq!(prefixes.suffix("Paris,"), Some(""));
    }

    #[test]
    fn equal_length_prefixes_keep_their_order() {
        let prefixes = prefixes(&["AB", "Paris", "CD"]);
        assert_eq!(prefixes.as_slice(), ["Paris", "AB", "CD"]);
    }

    #[test]
    fn unmatched_address_has_no_suffix() {
        let prefixes = prefixes(&["Санкт-Петербург"]);
        assert_eq!(prefixes.suffix("Москва, Тверская 1"), None);
        assert_eq!(
            prefixes.suffix("Санкт-Петербург, Невский пр., 10"),
            Some("Невский пр., 10")
        );
    }

    #[test]
    fn cleaning_drops_question_marks() {
        assert_eq!(clean_address("  Paris?, Rue 5 ? "), "Paris, Rue 5");
    }
}
