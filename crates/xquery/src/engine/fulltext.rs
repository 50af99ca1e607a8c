//! Tokenization and term matching for `&=`, `|=` and the `text:` functions.
//!
//! The full-text index in the store tokenizes with [`tokenize`] too, so an
//! index lookup and a plain scan agree on what a term is.

use crate::runtime::{Error, FancyRegexProvider, TermPattern};

/// Lowercased runs of alphanumeric characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Split a query string into terms; `*` and `?` make a term a wildcard.
pub fn query_terms(query: &str) -> Vec<TermPattern> {
    query
        .split(|c: char| !(c.is_alphanumeric() || c == '*' || c == '?'))
        .filter(|t| !t.is_empty())
        .map(|t| {
            let t = t.to_lowercase();
            if t.contains(['*', '?']) {
                TermPattern::Wildcard(t)
            } else {
                TermPattern::Word(t)
            }
        })
        .collect()
}

/// Glob match where `*` is any run and `?` a single character.
pub fn wildcard_match(pattern: &str, token: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = token.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// A compiled term, ready to test tokens.
pub enum TermMatcher {
    Word(String),
    Wildcard(String),
    Regex(fancy_regex::Regex),
}

impl TermMatcher {
    pub fn new(term: &TermPattern) -> Result<Self, Error> {
        Ok(match term {
            TermPattern::Word(w) => Self::Word(w.clone()),
            TermPattern::Wildcard(w) => Self::Wildcard(w.clone()),
            TermPattern::Regex(r) => Self::Regex(FancyRegexProvider::build_with_flags(&format!("^(?:{r})$"), "i")?),
        })
    }

    pub fn matches(&self, token: &str) -> bool {
        match self {
            Self::Word(w) => w == token,
            Self::Wildcard(w) => wildcard_match(w, token),
            Self::Regex(re) => re.is_match(token).unwrap_or(false),
        }
    }
}

pub fn compile_terms(terms: &[TermPattern]) -> Result<Vec<TermMatcher>, Error> {
    terms.iter().map(TermMatcher::new).collect()
}

/// Does `text` contain all (or any) of the terms? No terms never match.
pub fn text_matches(text: &str, terms: &[TermMatcher], all: bool) -> bool {
    if terms.is_empty() {
        return false;
    }
    let tokens = tokenize(text);
    let hit = |m: &TermMatcher| tokens.iter().any(|t| m.matches(t));
    if all {
        terms.iter().all(hit)
    } else {
        terms.iter().any(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_lowercased_words() {
        assert_eq!(tokenize("To be, or NOT to-be!"), vec!["to", "be", "or", "not", "to", "be"]);
    }

    #[test]
    fn wildcards() {
        assert!(wildcard_match("lo*", "love"));
        assert!(wildcard_match("l?ve", "love"));
        assert!(!wildcard_match("l?ve", "leave"));
        assert!(wildcard_match("*ve", "love"));
        assert_eq!(
            query_terms("Love lo*"),
            vec![TermPattern::Word("love".into()), TermPattern::Wildcard("lo*".into())]
        );
    }

    #[test]
    fn all_versus_any() {
        let terms = compile_terms(&query_terms("love hate")).unwrap();
        assert!(!text_matches("all you need is love", &terms, true));
        assert!(text_matches("all you need is love", &terms, false));
        let re = compile_terms(&[TermPattern::Regex("lo.e".into())]).unwrap();
        assert!(text_matches("Love me do", &re, true));
    }
}
