//! Amount normalisation for OCR'd payment receipts.
//!
//! Converts raw numeric-looking substrings (e.g., "20.000,50", "$ 3.500", "1O0")
//! into `f64` values, resolving locale separator ambiguity and the digit/letter
//! confusions OCR engines routinely make.
//!
//! # Separator conventions
//!
//! - Dot thousands, comma decimals (es-AR): 20.000,50
//! - Comma thousands, dot decimals (en-US): 20,000.50
//! - Space thousands: 20 000 (any space variant, including NBSP and narrow NBSP)
//! - A lone separator followed by exactly three digits is read as thousands:
//!   "10.000" is ten thousand, never ten.

use std::sync::OnceLock;

use regex::Regex;

/// Space variants treated as thousands separators and dropped.
const SPACE_VARIANTS: &[char] = &[' ', '\u{00A0}', '\u{202F}', '\u{2007}', '\u{2009}'];

fn dotted_grouping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{1,3}(?:\.\d{3})+\.\d{1,2}$").expect("invalid dotted grouping regex")
    })
}

fn comma_grouping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{1,3}(?:,\d{3})+(?:,\d{1,2})?$").expect("invalid comma grouping regex")
    })
}

fn dot_zeros_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.0{3,}").expect("invalid dot zeros regex"))
}

/// Normalise a raw amount substring into a decimal value.
///
/// Returns `None` when nothing parseable remains or the result is not finite.
///
/// # Algorithm
///
/// 1. Keep digits, `.`, `,` and `o`/`O`; drop space variants and everything else.
/// 2. A trailing group like "0O0" (three zero-looking characters, at least one a
///    letter) marks an in-thousands amount: all separators are stripped.
/// 3. Letters `o`/`O` touching a digit become `0`; stray letters are dropped.
/// 4. Resolve separators by which of `.` and `,` appear (see the helpers below).
///
/// The "×1000 when a dot is followed by three or more zeros" correction in the
/// dot-only branch is a best-effort guess and does produce false corrections.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let filtered: Vec<char> = raw
        .chars()
        .filter(|c| !SPACE_VARIANTS.contains(c))
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | 'o' | 'O'))
        .collect();

    let trimmed = trim_trailing_separators(&filtered);
    if trimmed.is_empty() {
        return None;
    }

    if has_letter_zero_thousands(trimmed) {
        let digits: String = correct_letter_zeros(trimmed)
            .into_iter()
            .filter(|c| !is_separator(*c))
            .collect();
        return finite(digits.parse::<f64>().ok()?);
    }

    let corrected = correct_letter_zeros(trimmed);
    let s: String = trim_trailing_separators(&corrected).iter().collect();
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let value = match (s.contains('.'), s.contains(',')) {
        (true, true) => parse_mixed(&s),
        (true, false) => parse_dotted(&s),
        (false, true) => parse_commas(&s),
        (false, false) => s.parse::<f64>().ok(),
    }?;
    finite(value)
}

/// Both separators present: the one that appears last is the decimal point,
/// unless it is followed by exactly three digits.
fn parse_mixed(s: &str) -> Option<f64> {
    let idx = s.rfind(['.', ','])?;
    let tail = &s[idx + 1..];
    if is_three_digits(tail) {
        return strip_separators(s).parse().ok();
    }
    let head = strip_separators(&s[..idx]);
    format!("{head}.{tail}").parse().ok()
}

fn parse_dotted(s: &str) -> Option<f64> {
    let (_, last) = s.rsplit_once('.')?;
    if is_three_digits(last) {
        return strip_separators(s).parse().ok();
    }

    if dotted_grouping_re().is_match(s) {
        let (head, tail) = s.rsplit_once('.')?;
        return format!("{}.{tail}", strip_separators(head)).parse().ok();
    }

    let value: f64 = s.parse().ok()?;
    if value < 1000.0 && dot_zeros_re().is_match(s) {
        Some(value * 1000.0)
    } else {
        Some(value)
    }
}

fn parse_commas(s: &str) -> Option<f64> {
    let (head, tail) = s.rsplit_once(',')?;
    if comma_grouping_re().is_match(s) {
        if tail.len() <= 2 {
            return format!("{}.{tail}", strip_separators(head)).parse().ok();
        }
        return strip_separators(s).parse().ok();
    }
    // Not a grouping: the (last) comma is the decimal point.
    format!("{}.{tail}", strip_separators(head)).parse().ok()
}

/// Detect the "20.0O0" artifact: a final separator group of three zero-like
/// characters where OCR read at least one zero as a letter.
fn has_letter_zero_thousands(chars: &[char]) -> bool {
    let Some(sep) = chars.iter().rposition(|c| is_separator(*c)) else {
        return false;
    };
    let tail = &chars[sep + 1..];
    sep > 0
        && tail.len() == 3
        && tail.iter().all(|c| matches!(c, '0' | 'o' | 'O'))
        && tail.iter().any(|c| matches!(c, 'o' | 'O'))
}

/// Replace digit-adjacent `o`/`O` with `0` until stable, then drop leftovers.
///
/// Runs to a fixed point so chains such as "1OO" become "100".
fn correct_letter_zeros(chars: &[char]) -> Vec<char> {
    let mut out = chars.to_vec();
    loop {
        let mut changed = false;
        for i in 0..out.len() {
            if !matches!(out[i], 'o' | 'O') {
                continue;
            }
            let prev_digit = i > 0 && out[i - 1].is_ascii_digit();
            let next_digit = out.get(i + 1).is_some_and(|c| c.is_ascii_digit());
            if prev_digit || next_digit {
                out[i] = '0';
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    out.retain(|c| !matches!(c, 'o' | 'O'));
    out
}

fn trim_trailing_separators(chars: &[char]) -> &[char] {
    let end = chars
        .iter()
        .rposition(|c| !is_separator(*c))
        .map_or(0, |i| i + 1);
    &chars[..end]
}

fn is_separator(c: char) -> bool {
    c == '.' || c == ','
}

fn is_three_digits(s: &str) -> bool {
    s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit())
}

fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| !is_separator(*c)).collect()
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}
