//! Keyword vocabularies for the receipt scorer.
//!
//! Phrases are matched on word boundaries against lower-cased text where every
//! non-alphanumeric run is collapsed to a single space (see [`WordText`]).

pub const MERCADO_PAGO: &[&str] = &["mercado pago", "mercadopago"];

/// Argentine banks and wallets that issue transfer receipts.
pub const BANKS_AND_WALLETS: &[&str] = &[
    "banco",
    "santander",
    "galicia",
    "bbva",
    "macro",
    "banco nación",
    "banco nacion",
    "provincia",
    "icbc",
    "hsbc",
    "supervielle",
    "patagonia",
    "credicoop",
    "ciudad",
    "brubank",
    "ualá",
    "uala",
    "naranja x",
    "personal pay",
    "modo",
    "lemon",
    "prex",
    "cuenta dni",
];

pub const COMPROBANTE: &[&str] = &["comprobante"];

pub const TRANSFERENCIA: &[&str] = &["transferencia"];

pub const TRANSACTION: &[&str] = &[
    "pagaste",
    "enviaste",
    "transferiste",
    "código de identificación",
    "codigo de identificacion",
    "número de operación",
    "numero de operacion",
    "nº de operación",
    "n de operación",
    "nro de operación",
];

pub const COUNTERPARTY: &[&str] = &["cuit", "cuil", "cvu", "cbu", "beneficiario", "destinatario"];

/// Lower-cased text with non-alphanumeric runs collapsed to one space and
/// padded with spaces at both ends, so `" phrase "` is a word-bounded match.
pub struct WordText(String);

impl WordText {
    pub fn new(text: &str) -> Self {
        let spaced: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let words: Vec<&str> = spaced.split_whitespace().collect();
        Self(format!(" {} ", words.join(" ")))
    }

    pub fn contains_phrase(&self, phrase: &str) -> bool {
        self.0.contains(&format!(" {phrase} "))
    }

    pub fn contains_any(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.contains_phrase(p))
    }
}
