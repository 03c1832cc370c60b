//! Hierarchical step identifier patterns.
//!
//! A pattern is a dot-separated identifier where a `*` segment stands for
//! exactly one non-empty segment. Matching is case-insensitive and anchored
//! at both ends: `Build.*` matches `build.compile` but neither `build` nor
//! `build.compile.cache`.

/// A single compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// A set of patterns combined with OR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMatcher {
    patterns: Vec<Vec<Segment>>,
}

impl IdMatcher {
    /// Compile `patterns`. Returns `None` for an empty list so callers can
    /// tell "no filter" apart from "a filter that matches nothing".
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Option<Self> {
        if patterns.is_empty() {
            return None;
        }

        let patterns = patterns
            .iter()
            .map(|pattern| compile_pattern(pattern.as_ref()))
            .collect();

        Some(Self { patterns })
    }

    /// True when any pattern accounts for every segment of `id`.
    pub fn matches(&self, id: &str) -> bool {
        let id = id.to_lowercase();
        let segments: Vec<&str> = id.split('.').collect();
        self.patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, &segments))
    }
}

fn compile_pattern(pattern: &str) -> Vec<Segment> {
    let lowered = pattern.to_lowercase();
    split_on_dot_runs(&lowered)
        .into_iter()
        .map(|part| {
            if part == "*" {
                Segment::Wildcard
            } else {
                Segment::Literal(part.to_string())
            }
        })
        .collect()
}

/// Split on runs of one or more dots. Leading and trailing runs still yield
/// an empty segment, so `.a` compiles to `["", "a"]`.
fn split_on_dot_runs(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut chars = value.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if ch != '.' {
            continue;
        }
        parts.push(&value[start..index]);
        let mut end = index + 1;
        while let Some(&(next_index, '.')) = chars.peek() {
            end = next_index + 1;
            chars.next();
        }
        start = end;
    }
    parts.push(&value[start..]);
    parts
}

fn pattern_matches(pattern: &[Segment], segments: &[&str]) -> bool {
    pattern.len() == segments.len()
        && pattern
            .iter()
            .zip(segments)
            .all(|(expected, actual)| match expected {
                Segment::Wildcard => !actual.is_empty(),
                Segment::Literal(literal) => literal == actual,
            })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> IdMatcher {
        IdMatcher::compile(patterns).unwrap()
    }

    #[test]
    fn empty_list_compiles_to_none() {
        let none: [&str; 0] = [];
        assert!(IdMatcher::compile(&none).is_none());
    }

    #[test]
    fn wildcard_matches_exactly_one_segment() {
        let m = matcher(&["Build.*"]);
        assert!(m.matches("build.compile"));
        assert!(m.matches("Build.Package"));
        assert!(!m.matches("build.compile.cache"));
        assert!(!m.matches("build"));
        assert!(!m.matches("build."));
    }

    #[test]
    fn literal_match_is_case_insensitive_and_anchored() {
        let m = matcher(&["Webpack.BuildWebApp"]);
        assert!(m.matches("webpack.buildwebapp"));
        assert!(m.matches("WEBPACK.BUILDWEBAPP"));
        assert!(!m.matches("Webpack.BuildWebApp.Cache"));
        assert!(!m.matches("Quilt.Webpack.BuildWebApp"));
        assert!(!m.matches("Webpack.Build"));
    }

    #[test]
    fn patterns_are_combined_with_or() {
        let m = matcher(&["Jest.Run", "TypeScript.*"]);
        assert!(m.matches("jest.run"));
        assert!(m.matches("typescript.check"));
        assert!(!m.matches("babel.compile"));
    }

    #[test]
    fn repeated_dots_in_pattern_collapse() {
        let m = matcher(&["Build..Compile"]);
        assert!(m.matches("build.compile"));
    }

    #[test]
    fn wildcard_in_middle_position() {
        let m = matcher(&["SewingKit.*.Compile"]);
        assert!(m.matches("sewingkit.buildpackage.compile"));
        assert!(!m.matches("sewingkit.compile"));
        assert!(!m.matches("sewingkit.a.b.compile"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let m = matcher(&["Build+.Step"]);
        assert!(m.matches("build+.step"));
        assert!(!m.matches("buildd.step"));
    }

    #[test]
    fn split_keeps_edge_segments() {
        assert_eq!(split_on_dot_runs(".a..b."), vec!["", "a", "b", ""]);
        assert_eq!(split_on_dot_runs("a"), vec!["a"]);
    }
}
