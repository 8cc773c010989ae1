//! Amount candidate scanning over free receipt text.
//!
//! Two passes over the normalised text:
//!
//! 1. Currency-tagged runs (`$ 15.000`) on lines without identifier keywords,
//!    all at [`CURRENCY_PRIORITY`].
//! 2. Only if pass 1 found nothing: bare grouped or long digit runs, at
//!    [`BARE_PRIORITY`] plus a proximity bonus for nearby monetary keywords.
//!
//! Candidates outside [`MIN_AMOUNT`]..=[`MAX_AMOUNT`] are discarded, and when any
//! candidate reaches 1000 the sub-1000 ones are dropped as OCR noise.

use std::sync::OnceLock;

use regex::{Captures, NoExpand, Regex};

use crate::amount::parse_amount;

pub const CURRENCY_PRIORITY: u32 = 6;
pub const BARE_PRIORITY: u32 = 2;
pub const MIN_AMOUNT: f64 = 50.0;
pub const MAX_AMOUNT: f64 = 10_000_000.0;

/// Lines mentioning these denote identifiers (tax ids, account keys, operation
/// numbers), so their digits are never amounts. Matched as word prefixes.
const BAD_CONTEXT_PREFIXES: &[&str] = &[
    "cuit",
    "cuil",
    "cvu",
    "cbu",
    "operaci",
    "operation",
    "transacci",
    "transaction",
    "referencia",
    "reference",
    "códig",
    "codig",
    "code",
    "númer",
    "numer",
    "number",
    "nro",
];

const MONETARY_KEYWORDS: &[&str] = &[
    "comprobante",
    "transferencia",
    "motivo",
    "mercado pago",
    "monto",
    "importe",
    "total",
];

const MONETARY_WORDS: &[&str] = &["de", "para"];

const PROXIMITY_WINDOW: usize = 3;

/// One plausible monetary reading found in receipt text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountCandidate {
    pub value: f64,
    pub priority: u32,
}

fn currency_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\s*(\d[\dOo.,]*)").expect("invalid currency run regex"))
}

fn bare_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d[\dOo]{0,2}(?:[.,][\dOo]{3})+(?:[.,][\dOo]{1,2})?|\d{5,})\b")
            .expect("invalid bare run regex")
    })
}

fn grouping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,3}(?:[.,]\d{3})+").expect("invalid grouping regex"))
}

fn s_dollar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bS\$|\bARS\b").expect("invalid currency marker regex"))
}

fn s_digit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bS(\d)").expect("invalid S-digit regex"))
}

/// Canonicalise line endings, quotes, whitespace and currency markers.
pub fn normalize_text(text: &str) -> String {
    let unified: String = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{00B4}' | '`' => '\'',
            '\n' => '\n',
            c if c.is_whitespace() => ' ',
            c => c,
        })
        .collect();

    let marked = s_dollar_re().replace_all(&unified, NoExpand("$"));
    s_digit_re()
        .replace_all(&marked, |caps: &Captures| format!("${}", &caps[1]))
        .into_owned()
}

/// Whether the text shows a thousands-grouping pattern such as "15.000".
pub fn has_grouping(text: &str) -> bool {
    grouping_re().is_match(text)
}

/// Whether a line mentions an identifier keyword (CUIT, CVU, operation code...).
pub fn is_bad_context(line: &str) -> bool {
    line.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| BAD_CONTEXT_PREFIXES.iter().any(|p| word.starts_with(p)))
}

fn is_monetary_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    MONETARY_KEYWORDS.iter().any(|k| lower.contains(k))
        || lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| MONETARY_WORDS.contains(&word))
}

fn in_range(value: f64) -> bool {
    (MIN_AMOUNT..=MAX_AMOUNT).contains(&value)
}

/// Currency-tagged values on one line, in order of appearance.
fn currency_values(line: &str) -> impl Iterator<Item = f64> + '_ {
    currency_run_re()
        .captures_iter(line)
        .filter_map(|caps| parse_amount(&caps[1]))
}

/// Bare grouped or 5+ digit runs on one line. Ungrouped 4-digit runs (years,
/// card suffixes, times) never qualify.
fn bare_values(line: &str) -> impl Iterator<Item = f64> + '_ {
    bare_run_re()
        .find_iter(line)
        .filter_map(|m| parse_amount(m.as_str()))
}

/// Proximity bonus for a keyword `distance` lines away: 3, 2, then 1.
fn proximity_bonus(distance: usize) -> u32 {
    match distance {
        0 => 3,
        1 => 2,
        _ => 1,
    }
}

/// All surviving candidates, after range and sub-1000 filtering.
pub fn scan_candidates(text: &str) -> Vec<AmountCandidate> {
    let normalized = normalize_text(text);
    let lines: Vec<&str> = normalized.lines().collect();

    let mut candidates: Vec<AmountCandidate> = lines
        .iter()
        .filter(|line| line.contains('$') && !is_bad_context(line))
        .flat_map(|line| currency_values(line))
        .map(|value| AmountCandidate {
            value,
            priority: CURRENCY_PRIORITY,
        })
        .collect();

    if candidates.is_empty() {
        let keyword_lines: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| is_monetary_line(line))
            .map(|(i, _)| i)
            .collect();

        for (i, line) in lines.iter().enumerate() {
            if is_bad_context(line) {
                continue;
            }
            let bonus = keyword_lines
                .iter()
                .map(|&k| k.abs_diff(i))
                .filter(|&d| d <= PROXIMITY_WINDOW)
                .map(proximity_bonus)
                .max()
                .unwrap_or(0);
            candidates.extend(bare_values(line).map(|value| AmountCandidate {
                value,
                priority: BARE_PRIORITY + bonus,
            }));
        }
    }

    candidates.retain(|c| in_range(c.value));
    if candidates.iter().any(|c| c.value >= 1000.0) {
        candidates.retain(|c| c.value >= 1000.0);
    }
    candidates
}

/// The single best candidate: highest priority, then highest value.
pub fn best_amount(text: &str) -> Option<AmountCandidate> {
    scan_candidates(text).into_iter().max_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.value.total_cmp(&b.value))
    })
}

/// First plausible amount in a short OCR snippet (one tile's output).
///
/// Tries currency-tagged runs first, then bare grouped or long runs.
pub fn first_amount(snippet: &str) -> Option<f64> {
    let normalized = normalize_text(snippet);
    normalized
        .lines()
        .flat_map(currency_values)
        .chain(normalized.lines().flat_map(bare_values))
        .find(|v| in_range(*v))
}
