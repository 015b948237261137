// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Symbol name patterns with shell-style wildcard support.
//!
//! Requests for symbol names accept `fnmatch(3)`-style wildcards: `*` matches
//! any run of characters (including none) and `?` matches exactly one
//! character. There is no special treatment of `::` or other separators, so
//! `std*` matches everything in a `std::` namespace. Character classes
//! (`[a-z]`) are not supported.

/// A symbol name pattern from a lookup request.
///
/// Whether a pattern is a plain name or a wildcard pattern is decided once at
/// construction time: callers treat the two quite differently during
/// resolution (an exact name resolves in place, a wildcard fans out into one
/// request per matching symbol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolPattern {
    /// Pattern without wildcard characters, compared with string equality.
    Exact(String),
    /// Pattern containing `*` or `?`, compared with [`glob_match`].
    Glob(String),
}

impl SymbolPattern {
    /// Classifies `pattern` as exact or wildcard.
    pub fn new(pattern: &str) -> Self {
        if pattern.contains(['*', '?']) {
            Self::Glob(pattern.to_owned())
        } else {
            Self::Exact(pattern.to_owned())
        }
    }

    /// Checks whether `name` is matched by this pattern.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(text) => text == name,
            Self::Glob(text) => glob_match(text, name),
        }
    }

    /// Whether this pattern contains wildcard characters.
    pub fn is_glob(&self) -> bool {
        matches!(self, Self::Glob(_))
    }

    /// The pattern as originally given.
    pub fn text(&self) -> &str {
        match self {
            Self::Exact(text) | Self::Glob(text) => text,
        }
    }
}

/// Matches `text` against a wildcard `pattern`.
///
/// Iterative backtracking: on mismatch we return to the most recent `*`,
/// extend the range of characters it swallows by one and retry. This keeps
/// the worst case at `O(len(pattern) * len(text))` instead of the exponential
/// blowup of naive recursion.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    let mut p = 0;
    let mut t = 0;

    // Pattern position after the most recent `*`, and the text position that
    // this `*` has currently consumed up to.
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p + 1);
            mark = t;
            p += 1;
        } else if let Some(resume) = star {
            p = resume;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }

    // Any trailing stars match the empty remainder.
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }

    p == pat.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(!SymbolPattern::new("malloc").is_glob());
        assert!(SymbolPattern::new("malloc*").is_glob());
        assert!(SymbolPattern::new("m?lloc").is_glob());
        assert_eq!(SymbolPattern::new("free").text(), "free");
    }

    #[test]
    fn exact() {
        let pat = SymbolPattern::new("malloc");
        assert!(pat.matches("malloc"));
        assert!(!pat.matches("mallocx"));
        assert!(!pat.matches("allocate_malloc"));
    }

    #[test]
    fn star() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("malloc*", "malloc"));
        assert!(glob_match("malloc*", "malloc_usable_size"));
        assert!(!glob_match("malloc*", "calloc"));
        assert!(glob_match("*alloc", "malloc"));
        assert!(glob_match("*alloc", "xcalloc"));
        assert!(!glob_match("*alloc", "allocx"));
        assert!(glob_match("m*size", "malloc_usable_size"));
    }

    #[test]
    fn question_mark() {
        assert!(glob_match("?alloc", "malloc"));
        assert!(glob_match("?alloc", "calloc"));
        assert!(!glob_match("?alloc", "alloc"));
        assert!(!glob_match("?alloc", "xmalloc"));
        assert!(glob_match("v??", "v42"));
    }

    #[test]
    fn star_crosses_separators() {
        assert!(glob_match("std*", "std::vector<int>::push_back(int&&)"));
        assert!(glob_match("*push_back*", "std::vector<int>::push_back(int&&)"));
    }

    #[test]
    fn backtracking() {
        // First `*` must give characters back for the suffix to match.
        assert!(glob_match("*ab", "aab"));
        assert!(glob_match("a*b*c", "aXbYbZc"));
        assert!(!glob_match("a*b*c", "aXbYbZ"));
        assert!(glob_match("**a", "ba"));
    }

    #[test]
    fn empty_inputs() {
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
        assert!(!glob_match("a", ""));
        assert!(glob_match("*", ""));
    }
}
