/// A topic subscription pattern with AMQP-style wildcard matching.
///
/// Patterns and routing keys are dot-separated words. `*` matches exactly
/// one word, `#` matches zero or more words:
///
/// - `order.*` matches `order.created` but not `order.payment.failed`
/// - `order.#` matches `order.created` and `order.payment.failed`
/// - `#` matches everything
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    pattern: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Star,
    Hash,
}

impl TopicPattern {
    /// Creates a pattern from its dot-separated string form.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let segments = pattern
            .split('.')
            .map(|word| match word {
                "*" => Segment::Star,
                "#" => Segment::Hash,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();
        Self { pattern, segments }
    }

    /// Returns the pattern's string form.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the routing key matches this pattern.
    pub fn matches(&self, routing_key: &str) -> bool {
        let words: Vec<&str> = routing_key.split('.').collect();
        Self::matches_at(&self.segments, &words)
    }

    fn matches_at(segments: &[Segment], words: &[&str]) -> bool {
        match segments.split_first() {
            None => words.is_empty(),
            Some((Segment::Literal(literal), rest)) => words
                .split_first()
                .is_some_and(|(word, remaining)| word == literal && Self::matches_at(rest, remaining)),
            Some((Segment::Star, rest)) => words
                .split_first()
                .is_some_and(|(_, remaining)| Self::matches_at(rest, remaining)),
            Some((Segment::Hash, rest)) => (0..=words.len())
                .any(|skip| Self::matches_at(rest, &words[skip..])),
        }
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl From<&str> for TopicPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exactly() {
        let pattern = TopicPattern::new("order.created");
        assert!(pattern.matches("order.created"));
        assert!(!pattern.matches("order.cancelled"));
        assert!(!pattern.matches("order.created.v2"));
    }

    #[test]
    fn star_matches_exactly_one_word() {
        let pattern = TopicPattern::new("order.*");
        assert!(pattern.matches("order.created"));
        assert!(pattern.matches("order.cancelled"));
        assert!(!pattern.matches("order"));
        assert!(!pattern.matches("order.payment.failed"));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        let pattern = TopicPattern::new("order.#");
        assert!(pattern.matches("order"));
        assert!(pattern.matches("order.created"));
        assert!(pattern.matches("order.payment.failed"));
        assert!(!pattern.matches("payment.authorized"));
    }

    #[test]
    fn bare_hash_matches_everything() {
        let pattern = TopicPattern::new("#");
        assert!(pattern.matches("order.created"));
        assert!(pattern.matches("a.b.c.d"));
    }

    #[test]
    fn hash_in_the_middle() {
        let pattern = TopicPattern::new("order.#.failed");
        assert!(pattern.matches("order.failed"));
        assert!(pattern.matches("order.payment.failed"));
        assert!(pattern.matches("order.payment.retry.failed"));
        assert!(!pattern.matches("order.payment.succeeded"));
    }

    #[test]
    fn display_preserves_pattern() {
        let pattern = TopicPattern::new("order.*");
        assert_eq!(pattern.to_string(), "order.*");
        assert_eq!(pattern.as_str(), "order.*");
    }
}
