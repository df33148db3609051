/// Well-known predicates. Rules, extraction patterns and consistency
/// settings refer to these by name.
pub mod defaults {
    pub const IS_A: &str = "is-a";
    pub const SUBCLASS_OF: &str = "subclass-of";
    pub const PART_OF: &str = "part-of";
    pub const LOCATED_IN: &str = "located-in";
    pub const CAPITAL_OF: &str = "capital-of";
    pub const HAS_CAPITAL: &str = "has-capital";
    pub const WORKS_FOR: &str = "works-for";
    pub const LIVES_IN: &str = "lives-in";
    pub const SIBLING_OF: &str = "sibling-of";
    pub const HAS: &str = "has";
    pub const USES: &str = "uses";
    pub const OWNS: &str = "owns";

    /// Predicates whose graph must stay acyclic.
    pub fn acyclic() -> Vec<String> {
        vec![IS_A.to_string(), SUBCLASS_OF.to_string(), PART_OF.to_string()]
    }

    pub fn all() -> Vec<&'static str> {
        vec![
            IS_A,
            SUBCLASS_OF,
            PART_OF,
            LOCATED_IN,
            CAPITAL_OF,
            HAS_CAPITAL,
            WORKS_FOR,
            LIVES_IN,
            SIBLING_OF,
            HAS,
            USES,
            OWNS,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::defaults;
    use crate::types::normalize_label;

    #[test]
    fn test_default_predicates_are_normalized() {
        for p in defaults::all() {
            assert_eq!(normalize_label(p), p);
        }
    }
}
