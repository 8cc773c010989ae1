//! Weighted receipt classifier.
//!
//! Scores caption plus OCR text against a table of receipt signals (provider
//! names, receipt vocabulary, counterparty identifiers, currency formatting and
//! a parseable amount) and accepts the message as a payment receipt when the
//! score reaches the threshold and an amount was found.

use recibo_core::{best_amount, has_grouping, scan::normalize_text};

use crate::signals::{self, WordText};

pub const DEFAULT_THRESHOLD: u32 = 6;

pub const MERCADO_PAGO_PROVIDER: &str = "Mercado Pago";

/// One receipt signal the scorer can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    MercadoPago,
    BankOrWallet,
    Comprobante,
    Transferencia,
    TransactionKeyword,
    Counterparty,
    CurrencySymbol,
    Grouping,
    ValidAmount,
}

impl Signal {
    pub const ALL: [Signal; 9] = [
        Self::MercadoPago,
        Self::BankOrWallet,
        Self::Comprobante,
        Self::Transferencia,
        Self::TransactionKeyword,
        Self::Counterparty,
        Self::CurrencySymbol,
        Self::Grouping,
        Self::ValidAmount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MercadoPago => "mercado_pago",
            Self::BankOrWallet => "bank_or_wallet",
            Self::Comprobante => "comprobante",
            Self::Transferencia => "transferencia",
            Self::TransactionKeyword => "transaction_keyword",
            Self::Counterparty => "counterparty",
            Self::CurrencySymbol => "currency_symbol",
            Self::Grouping => "grouping",
            Self::ValidAmount => "valid_amount",
        }
    }
}

/// Score contributed by each signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Weights {
    pub mercado_pago: u32,
    pub bank_or_wallet: u32,
    pub comprobante: u32,
    pub transferencia: u32,
    pub transaction_keyword: u32,
    pub counterparty: u32,
    pub currency_symbol: u32,
    pub grouping: u32,
    pub valid_amount: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            mercado_pago: 3,
            bank_or_wallet: 2,
            comprobante: 2,
            transferencia: 2,
            transaction_keyword: 2,
            counterparty: 1,
            currency_symbol: 1,
            grouping: 1,
            valid_amount: 4,
        }
    }
}

impl Weights {
    pub fn weight(&self, signal: Signal) -> u32 {
        match signal {
            Signal::MercadoPago => self.mercado_pago,
            Signal::BankOrWallet => self.bank_or_wallet,
            Signal::Comprobante => self.comprobante,
            Signal::Transferencia => self.transferencia,
            Signal::TransactionKeyword => self.transaction_keyword,
            Signal::Counterparty => self.counterparty,
            Signal::CurrencySymbol => self.currency_symbol,
            Signal::Grouping => self.grouping,
            Signal::ValidAmount => self.valid_amount,
        }
    }
}

/// Outcome of scoring one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptVerdict {
    pub score: u32,
    pub amount: Option<f64>,
    /// `"Mercado Pago"` when that signal fired.
    pub provider: Option<String>,
    pub accepted: bool,
    /// Signals that fired, in table order.
    pub signals: Vec<Signal>,
}

impl ReceiptVerdict {
    pub fn fired(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    weights: Weights,
    threshold: u32,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl Classifier {
    pub fn new(threshold: u32) -> Self {
        Self {
            weights: Weights::default(),
            threshold,
        }
    }

    /// Replace the weight table.
    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Score text whose amount, if any, comes from the text itself.
    pub fn classify(&self, text: &str) -> ReceiptVerdict {
        self.classify_with_amount(text, None)
    }

    /// Score text, falling back to an externally found amount (tiled OCR)
    /// when the text yields none.
    pub fn classify_with_amount(&self, text: &str, fallback: Option<f64>) -> ReceiptVerdict {
        let normalized = normalize_text(text);
        let words = WordText::new(&normalized);
        let amount = best_amount(&normalized).map(|c| c.value).or(fallback);

        let signals: Vec<Signal> = Signal::ALL
            .into_iter()
            .filter(|signal| match signal {
                Signal::MercadoPago => words.contains_any(signals::MERCADO_PAGO),
                Signal::BankOrWallet => words.contains_any(signals::BANKS_AND_WALLETS),
                Signal::Comprobante => words.contains_any(signals::COMPROBANTE),
                Signal::Transferencia => words.contains_any(signals::TRANSFERENCIA),
                Signal::TransactionKeyword => words.contains_any(signals::TRANSACTION),
                Signal::Counterparty => words.contains_any(signals::COUNTERPARTY),
                Signal::CurrencySymbol => normalized.contains('$'),
                Signal::Grouping => has_grouping(&normalized),
                Signal::ValidAmount => amount.is_some(),
            })
            .collect();

        let score = signals.iter().map(|&s| self.weights.weight(s)).sum();
        let provider = signals
            .contains(&Signal::MercadoPago)
            .then(|| MERCADO_PAGO_PROVIDER.to_string());

        ReceiptVerdict {
            score,
            amount,
            provider,
            accepted: score >= self.threshold && amount.is_some(),
            signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercado_pago_caption_accepted() {
        let v = Classifier::default().classify(
            "Mercado Pago \u{2014} Transferencia enviada $ 15.000, comprobante N\u{00BA} 123456",
        );
        assert!(v.accepted);
        assert_eq!(v.amount, Some(15_000.0));
        assert_eq!(v.provider.as_deref(), Some(MERCADO_PAGO_PROVIDER));
        assert!(v.score >= DEFAULT_THRESHOLD);
        // 3 + 2 + 2 + 1 + 1 + 4
        assert_eq!(v.score, 13);
    }

    #[test]
    fn identifiers_only_rejected() {
        let v = Classifier::default().classify("CUIT 20-12345678-9, CVU 000123456789");
        assert!(!v.accepted);
        assert_eq!(v.amount, None);
        assert_eq!(v.signals, vec![Signal::Counterparty]);
        assert_eq!(v.score, 1);
    }

    #[test]
    fn high_score_without_amount_rejected() {
        let v = Classifier::default()
            .classify("Comprobante de transferencia Banco Galicia, destinatario Juan");
        assert!(v.score >= DEFAULT_THRESHOLD);
        assert_eq!(v.amount, None);
        assert!(!v.accepted);
        assert!(v.provider.is_none());
    }

    #[test]
    fn amount_needs_formatting_to_reach_threshold() {
        let v = Classifier::default().classify("$ 5.000");
        // currency + grouping + amount
        assert_eq!(v.score, 6);
        assert!(v.accepted);

        let v = Classifier::default().classify("te debo 50000");
        assert_eq!(v.amount, Some(50_000.0));
        assert_eq!(v.score, 4);
        assert!(!v.accepted);
    }

    #[test]
    fn fallback_amount_counts_as_valid() {
        let text = "Transferencia exitosa, Brubank";
        let without = Classifier::default().classify(text);
        assert!(!without.accepted);

        let with = Classifier::default().classify_with_amount(text, Some(12_000.0));
        assert_eq!(with.amount, Some(12_000.0));
        assert!(with.fired(Signal::ValidAmount));
        assert!(with.accepted);
    }

    #[test]
    fn text_amount_preferred_over_fallback() {
        let v = Classifier::default().classify_with_amount("Pagaste $ 3.500", Some(99_000.0));
        assert_eq!(v.amount, Some(3_500.0));
    }

    #[test]
    fn custom_weights_and_threshold() {
        let weights = Weights {
            valid_amount: 10,
            ..Weights::default()
        };
        let classifier = Classifier::new(10).with_weights(weights);
        assert_eq!(classifier.threshold(), 10);
        assert!(classifier.classify("te debo 50000").accepted);
        assert!(!Classifier::new(10).classify("te debo 50000").accepted);
    }

    #[test]
    fn empty_text() {
        let v = Classifier::default().classify("");
        assert_eq!(v.score, 0);
        assert!(v.signals.is_empty());
        assert!(!v.accepted);
    }
}
