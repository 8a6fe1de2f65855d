//! Emoji tokenizer
//!
//! Extracts emoji from free-form message text in exact order of appearance.
//! Two disjoint pattern classes are recognized:
//! - single Unicode scalars inside the pictograph/symbol/dingbat blocks
//! - platform-custom glyph markup `<:name:id>` / `<a:name:id>` with a
//!   17-20 digit numeric id
//!
//! Adjacent matches joined by U+200D (zero-width joiner) are folded into one
//! token so compound glyphs (family sequences, flag sequences) resolve as a
//! single unit. Trailing variation selectors are stripped from the finished
//! token. Folding is kind-agnostic: a joiner between a Unicode glyph and
//! custom markup folds the same way. Such input does not occur in practice
//! but is not rejected.

use std::fmt;

/// Zero-width joiner, the glue between parts of a compound glyph.
const ZWJ: char = '\u{200D}';
/// Text-presentation variation selector (U+FE0E).
const VS_TEXT: char = '\u{FE0E}';
/// Emoji-presentation variation selector (U+FE0F).
const VS_EMOJI: char = '\u{FE0F}';

/// Classification of a parsed emoji occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// One or more Unicode pictograph scalars.
    Unicode,
    /// Platform-custom glyph markup.
    Custom,
}

/// Parsed fields of custom glyph markup `<:name:id>` / `<a:name:id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomGlyph {
    /// Glyph name (word characters).
    pub name: String,
    /// Numeric id, 17-20 digits. Kept as text; ids may exceed 64 bits.
    pub id: String,
    /// Animated-glyph flag (`<a:...>` form).
    pub animated: bool,
}

impl CustomGlyph {
    /// Reconstruct the markup string for this glyph.
    pub fn markup(&self) -> String {
        if self.animated {
            format!("<a:{}:{}>", self.name, self.id)
        } else {
            format!("<:{}:{}>", self.name, self.id)
        }
    }
}

/// A parsed emoji occurrence, the unit of sound resolution.
///
/// Identity, equality and hashing are by the raw grapheme sequence
/// (including joiners). Immutable once produced.
#[derive(Debug, Clone)]
pub struct EmojiToken {
    raw: String,
    custom: Option<CustomGlyph>,
}

impl EmojiToken {
    pub(crate) fn new(raw: String) -> Self {
        let custom = if raw.starts_with('<') {
            parse_custom_prefix(&raw)
        } else {
            None
        };
        EmojiToken { raw, custom }
    }

    /// Parse the first emoji token out of `text`, if any.
    pub fn parse(text: &str) -> Option<Self> {
        tokenize(text).into_iter().next()
    }

    /// The full raw grapheme sequence, including joiners.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this token is a Unicode glyph or custom markup.
    pub fn kind(&self) -> TokenKind {
        if self.custom.is_some() {
            TokenKind::Custom
        } else {
            TokenKind::Unicode
        }
    }

    /// Parsed custom-glyph fields, when the token is custom markup.
    pub fn custom(&self) -> Option<&CustomGlyph> {
        self.custom.as_ref()
    }

    /// Human-readable hint for sound discovery: the custom glyph name.
    pub fn discovery_hint(&self) -> Option<&str> {
        self.custom.as_ref().map(|c| c.name.as_str())
    }
}

impl PartialEq for EmojiToken {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for EmojiToken {}

impl std::hash::Hash for EmojiToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for EmojiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Byte range of one pattern match inside the scanned text.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

/// Extract all emoji from `text` in exact order of appearance.
///
/// Joiner-linked runs come back as one token; tokens that are nothing but
/// joiners and variation selectors after cleanup are dropped.
///
/// ```
/// use chime::token::tokenize;
///
/// let tokens = tokenize("🔥🔥");
/// assert_eq!(tokens.len(), 2);
/// assert_eq!(tokens[0].raw(), "🔥");
/// ```
pub fn tokenize(text: &str) -> Vec<EmojiToken> {
    let mut matches = scan_unicode(text);
    matches.extend(scan_custom(text));
    matches.sort_by_key(|m| m.start);

    let mut tokens = Vec::new();
    let mut i = 0;
    while i < matches.len() {
        let mut combined = text[matches[i].start..matches[i].end].to_string();
        let mut prev_end = matches[i].end;
        let mut j = i + 1;
        // Fold joiner-linked matches into a single compound token
        while j < matches.len() {
            let between = &text[prev_end..matches[j].start];
            if !between.contains(ZWJ) {
                break;
            }
            combined.push_str(between);
            combined.push_str(&text[matches[j].start..matches[j].end]);
            prev_end = matches[j].end;
            j += 1;
        }
        i = j;

        // Trim trailing variation selectors
        let cleaned = combined.trim_end_matches(|c| c == VS_TEXT || c == VS_EMOJI);
        if cleaned
            .chars()
            .any(|c| c != ZWJ && c != VS_TEXT && c != VS_EMOJI)
        {
            tokens.push(EmojiToken::new(cleaned.to_string()));
        }
    }
    tokens
}

fn scan_unicode(text: &str) -> Vec<Span> {
    text.char_indices()
        .filter(|&(_, c)| is_pictograph(c))
        .map(|(i, c)| Span {
            start: i,
            end: i + c.len_utf8(),
        })
        .collect()
}

/// Scalar blocks treated as emoji.
///
/// The final arm spans every block between U+24C2 and U+1F251, enclosed
/// alphanumerics through enclosed ideographs included; narrowing it changes
/// which messages trigger sounds.
fn is_pictograph(c: char) -> bool {
    matches!(c,
        '\u{1F600}'..='\u{1F64F}'   // Emoticons
        | '\u{1F300}'..='\u{1F5FF}' // Symbols & Pictographs
        | '\u{1F680}'..='\u{1F6FF}' // Transport & Map
        | '\u{1F700}'..='\u{1F77F}' // Alchemical
        | '\u{1F780}'..='\u{1F7FF}' // Geometric Shapes
        | '\u{1F800}'..='\u{1F8FF}' // Supplemental Arrows
        | '\u{1F900}'..='\u{1F9FF}' // Supplemental Symbols
        | '\u{1FA00}'..='\u{1FA6F}' // Chess Symbols
        | '\u{1FA70}'..='\u{1FAFF}' // Symbols & Pictographs Extended-A
        | '\u{2702}'..='\u{27B0}'   // Dingbats
        | '\u{24C2}'..='\u{1F251}'  // Enclosed characters (wide span)
    )
}

fn scan_custom(text: &str) -> Vec<Span> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    // Non-overlapping, left to right
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some(len) = custom_len(&bytes[i..]) {
                out.push(Span {
                    start: i,
                    end: i + len,
                });
                i += len;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Length of custom glyph markup at the start of `bytes`, if present.
///
/// Grammar: `<` `a`? `:` word+ `:` digit{17,20} `>`.
fn custom_len(bytes: &[u8]) -> Option<usize> {
    if bytes.first() != Some(&b'<') {
        return None;
    }
    let mut i = 1;
    if bytes.get(i) == Some(&b'a') {
        i += 1;
    }
    if bytes.get(i) != Some(&b':') {
        return None;
    }
    i += 1;
    let name_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    if bytes.get(i) != Some(&b':') {
        return None;
    }
    i += 1;
    let id_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if !(17..=20).contains(&(i - id_start)) {
        return None;
    }
    if bytes.get(i) != Some(&b'>') {
        return None;
    }
    Some(i + 1)
}

/// Parse the leading custom markup of a token whose raw text starts with `<`.
fn parse_custom_prefix(raw: &str) -> Option<CustomGlyph> {
    let len = custom_len(raw.as_bytes())?;
    let body = &raw[1..len - 1];
    let (animated, rest) = match body.strip_prefix("a:") {
        Some(rest) => (true, rest),
        None => (false, body.strip_prefix(':')?),
    };
    let (name, id) = rest.split_once(':')?;
    Some(CustomGlyph {
        name: name.to_string(),
        id: id.to_string(),
        animated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_glyphs_stay_separate() {
        let tokens = tokenize("🔥🔥");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].raw(), "🔥");
        assert_eq!(tokens[1].raw(), "🔥");
        assert_eq!(tokens[0].kind(), TokenKind::Unicode);
    }

    #[test]
    fn test_family_sequence_folds_into_one_token() {
        let family = "👨\u{200D}👩\u{200D}👧\u{200D}👦";
        let tokens = tokenize(family);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].raw(), family);
    }

    #[test]
    fn test_custom_glyphs_in_order_and_roundtrip() {
        let tokens = tokenize("<:pog:123456789012345678> hi <a:wow:987654321098765432>");
        assert_eq!(tokens.len(), 2);

        let pog = tokens[0].custom().expect("custom fields");
        assert_eq!(pog.name, "pog");
        assert_eq!(pog.id, "123456789012345678");
        assert!(!pog.animated);
        assert_eq!(pog.markup(), tokens[0].raw());

        let wow = tokens[1].custom().expect("custom fields");
        assert_eq!(wow.name, "wow");
        assert!(wow.animated);
        assert_eq!(wow.markup(), tokens[1].raw());
        assert_eq!(tokens[1].kind(), TokenKind::Custom);
    }

    #[test]
    fn test_trailing_variation_selector_stripped() {
        let tokens = tokenize("✂\u{FE0F}");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].raw(), "✂");
    }

    #[test]
    fn test_unjoined_glyphs_do_not_fold() {
        let tokens = tokenize("🔥 🔥");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_cross_kind_joiner_folds() {
        let text = "🔥\u{200D}<:pog:123456789012345678>";
        let tokens = tokenize(text);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].raw(), text);
        assert_eq!(tokens[0].kind(), TokenKind::Unicode);
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        assert!(tokenize("just words, no glyphs").is_empty());
    }

    #[test]
    fn test_id_length_bounds() {
        // 16 digits: one short of valid
        assert!(tokenize("<:pog:1234567890123456>").is_empty());
        // 21 digits: one past valid
        assert!(tokenize("<:pog:123456789012345678901>").is_empty());
        // 20 digits: widest accepted form
        let tokens = tokenize("<:pog:12345678901234567890>");
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_token_identity_is_by_raw() {
        let a = EmojiToken::parse("🔥").unwrap();
        let b = EmojiToken::parse("🔥 extra text").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_animated_flag_requires_colon() {
        // "ab" is not the animated marker; the name may still contain 'a'
        assert!(tokenize("<ab:name:123456789012345678>").is_empty());
        let tokens = tokenize("<a:ab:123456789012345678>");
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].custom().unwrap().animated);
    }
}
