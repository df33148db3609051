/// Entity type tags shipped with noema.
/// Extraction and consolidation assign these; callers may use any other tag.
pub mod defaults {
    pub const CONCEPT: &str = "concept";
    pub const PERSON: &str = "person";
    /// Capitalised name whose category is unknown.
    pub const PROPER: &str = "proper";
    pub const PLACE: &str = "place";
    pub const ORGANIZATION: &str = "organization";
    pub const NUMBER: &str = "number";
    pub const DATE: &str = "date";
    pub const EMAIL: &str = "email";
    pub const URL: &str = "url";

    pub fn all() -> Vec<&'static str> {
        vec![CONCEPT, PERSON, PROPER, PLACE, ORGANIZATION, NUMBER, DATE, EMAIL, URL]
    }
}
