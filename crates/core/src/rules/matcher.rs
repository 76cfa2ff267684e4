use crate::domain::indicator::IndicatorReading;

/// Lab indicator categories the rule catalog knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalIndicator {
    VitaminD,
    Ferritin,
    Glucose,
    Cholesterol,
    Alt,
    Ast,
    Hemoglobin,
}

/// Maps a free-text lab name to a canonical indicator.
pub trait IndicatorMatcher: Send + Sync {
    fn classify(&self, name: &str) -> Option<CanonicalIndicator>;
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Substring(&'static str),
    /// Whole-token match, for short lab codes that would otherwise hit unrelated words.
    Token(&'static str),
}

/// Case-insensitive name matching against a fixed pattern table.
///
/// Entries are checked in order, so more specific indicators come before the
/// broad hemoglobin `hb` pattern.
#[derive(Debug, Clone)]
pub struct SubstringMatcher {
    table: Vec<(CanonicalIndicator, Vec<Pattern>)>,
}

impl Default for SubstringMatcher {
    fn default() -> Self {
        use CanonicalIndicator::*;
        use Pattern::*;

        Self {
            table: vec![
                (
                    VitaminD,
                    vec![Substring("vitamin d"), Substring("25-oh"), Substring("кальцидиол")],
                ),
                (Ferritin, vec![Substring("ферритин"), Substring("ferritin")]),
                (
                    Glucose,
                    vec![Substring("глюкоза"), Substring("сахар"), Substring("glucose")],
                ),
                (
                    Cholesterol,
                    vec![Substring("холестерин"), Substring("cholesterol")],
                ),
                (
                    Alt,
                    vec![
                        Token("alt"),
                        Token("алт"),
                        Substring("аланинаминотрансфераза"),
                        Substring("alanine aminotransferase"),
                    ],
                ),
                (
                    Ast,
                    vec![
                        Token("ast"),
                        Token("аст"),
                        Substring("аспартатаминотрансфераза"),
                        Substring("aspartate aminotransferase"),
                    ],
                ),
                (Hemoglobin, vec![Substring("гемоглобин"), Substring("hb")]),
            ],
        }
    }
}

impl IndicatorMatcher for SubstringMatcher {
    fn classify(&self, name: &str) -> Option<CanonicalIndicator> {
        let lowered = name.to_lowercase();
        self.table
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| pattern_matches(*p, &lowered)))
            .map(|(indicator, _)| *indicator)
    }
}

fn pattern_matches(pattern: Pattern, lowered: &str) -> bool {
    match pattern {
        Pattern::Substring(needle) => lowered.contains(needle),
        Pattern::Token(token) => lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|t| t == token),
    }
}

/// Readings classified as `indicator`, in input order.
pub fn readings_of<'a>(
    matcher: &'a dyn IndicatorMatcher,
    readings: &'a [IndicatorReading],
    indicator: CanonicalIndicator,
) -> impl Iterator<Item = &'a IndicatorReading> + 'a {
    readings
        .iter()
        .filter(move |r| matcher.classify(&r.name) == Some(indicator))
}
