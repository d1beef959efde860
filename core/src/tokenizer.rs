use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

/// Tokenize text into index terms: NFKC normalization, lowercase, English stemming.
///
/// Stopwords are kept on purpose: most idioms are built out of them.
/// Non-ASCII words (e.g. Vietnamese meanings) are not stemmed.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    WORD.find_iter(&normalized)
        .map(|m| normalize_term(m.as_str()))
        .collect()
}

fn normalize_term(word: &str) -> String {
    let word = word.trim_end_matches('\'');
    let word = word.strip_suffix("'s").unwrap_or(word);
    if word.is_ascii() {
        STEMMER.stem(word).into_owned()
    } else {
        word.to_string()
    }
}
