//! Splits a response into the numeric stream used for Benford analysis and the
//! word stream used for Zipf analysis.
//!
//! Embedded numbers: a digit run that touches a letter on either side (`A4`,
//! `3rd`, `10km`) or hangs off a word through a hyphen or slash (`COVID-19`,
//! `GPT-4`) is an identifier, not a quantity, and is left out of the numeric
//! stream. Word tokens are letters only, so no digit ever reaches the Zipf side.
//!
//! Scientific notation (`1.5e3`, `6.02E+23`) is one number and keeps its
//! exponent; the `e` does not count as a letter touching the digits and is
//! not emitted as a word.

use regex::Regex;
use std::sync::LazyLock;

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?(?:[eE][-+]?\d+)?").expect("number pattern is valid")
});

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{L}+(?:['’]\p{L}+)*").expect("word pattern is valid"));

/// Numeric and textual features of one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    /// Numeric substrings in order of appearance, separators removed
    pub numbers: Vec<String>,
    /// Lowercased word tokens in order of appearance
    pub words: Vec<String>,
}

pub fn extract(text: &str) -> Features {
    let normalized = strip_currency(text);
    Features {
        numbers: numbers_in(&normalized),
        words: words_in(&NUMBER_RE.replace_all(&normalized, " ")),
    }
}

fn strip_currency(text: &str) -> String {
    text.chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c))
        .collect()
}

fn numbers_in(text: &str) -> Vec<String> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| classify_match(text, m.start(), m.end()))
        .collect()
}

fn words_in(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn classify_match(text: &str, start: usize, end: usize) -> Option<String> {
    let matched = &text[start..end];
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();

    if after.is_some_and(is_word_char) {
        return None;
    }

    let (sign, digits) = match matched.strip_prefix(['-', '+']) {
        Some(rest) => {
            let joiner = &matched[..1];
            match before {
                // "COVID-19", "GPT-4": the hyphen ties the digits to a word
                Some(c) if c.is_alphabetic() => return None,
                // "2025-09-23": the hyphen separates fields, it is not a sign
                Some(c) if c.is_ascii_digit() || c == '.' => ("", rest),
                Some(c) if c.is_whitespace() || "([{:;=,".contains(c) => (joiner, rest),
                None => (joiner, rest),
                Some(_) => ("", rest),
            }
        }
        None => {
            if before.is_some_and(is_word_char) {
                return None;
            }
            if let Some(joiner @ ('-' | '/')) = before {
                let prior = text[..start - joiner.len_utf8()].chars().next_back();
                if prior.is_some_and(char::is_alphabetic) {
                    return None;
                }
            }
            let accounting_negative = before == Some('(') && after == Some(')');
            (if accounting_negative { "-" } else { "" }, matched)
        }
    };

    let sign = if sign == "+" { "" } else { sign };
    Some(format!("{sign}{}", digits.replace(',', "")))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_and_thousands_separator() {
        let features = extract("Total: $1,234.56 was charged.");
        assert_eq!(features.numbers, vec!["1234.56"]);
        assert_eq!(features.words, vec!["total", "was", "charged"]);
    }

    #[test]
    fn test_negative_and_parentheses() {
        let features = extract("Adjustment: -42 and (1,000) recorded.");
        assert_eq!(features.numbers, vec!["-42", "-1000"]);
    }

    #[test]
    fn test_embedded_numbers_are_excluded() {
        let features = extract("COVID-19 cases hit 300 while GPT-4 used A4 paper on the 3rd of 10km runs");
        assert_eq!(features.numbers, vec!["300"]);
        assert!(features.words.contains(&"covid".to_string()));
        assert!(features.words.contains(&"gpt".to_string()));
    }

    #[test]
    fn test_scientific_notation_is_one_number() {
        let features = extract("Avogadro gives 6.02E+23 particles; the sample held 1.5e3 cells and 2e-4 grams");
        assert_eq!(features.numbers, vec!["6.02E+23", "1.5e3", "2e-4"]);
        assert!(!features.words.contains(&"e".to_string()));
        assert!(features.words.contains(&"cells".to_string()));
    }

    #[test]
    fn test_dates_and_times_split_into_fields() {
        let features = extract("On 2025-09-23 at 12:34:56 the value 3.14 was noted");
        assert_eq!(
            features.numbers,
            vec!["2025", "09", "23", "12", "34", "56", "3.14"]
        );
        assert!(features.words.iter().all(|w| w.chars().all(char::is_alphabetic)));
    }

    #[test]
    fn test_currency_sign_between_sign_and_digits() {
        let features = extract("Refund of -$5.00 and €12 fee");
        assert_eq!(features.numbers, vec!["-5.00", "12"]);
    }

    #[test]
    fn test_words_are_lowercased_and_keep_inner_apostrophes() {
        let features = extract("Don't PANIC, it's only 42 words' worth");
        assert_eq!(
            features.words,
            vec!["don't", "panic", "it's", "only", "words", "worth"]
        );
    }

    #[test]
    fn test_slash_joined_code_is_excluded() {
        let features = extract("Ref INV/2041 paid, 7/8 done");
        assert_eq!(features.numbers, vec!["7", "8"]);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(extract(""), Features::default());
    }
}
