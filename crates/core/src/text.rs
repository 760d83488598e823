use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercases, trims and strips diacritics so user replies compare the same
/// whether the accent was typed precomposed, typed as a combining mark, or not
/// typed at all.
pub fn fold(input: &str) -> String {
    input.trim().nfkd().filter(|ch| !is_combining_mark(*ch)).flat_map(char::to_lowercase).collect()
}

/// Collapses runs of whitespace into single spaces.
pub fn squash_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
