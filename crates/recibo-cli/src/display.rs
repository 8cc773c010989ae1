//! Vertical card display for receipt verdicts and pipeline outcomes.

use recibo_ai::{ReceiptVerdict, Signal};
use recibo_core::AmountCandidate;
use recibo_pipeline::{EmissionKind, EmissionReport, Outcome};

const MAX_TEXT_LINES: usize = 12;

// ── Public API ──

/// Print a scored receipt as a card: verdict, signals, candidates, text excerpt.
pub fn print_verdict_card(
    title: &str,
    verdict: &ReceiptVerdict,
    candidates: &[AmountCandidate],
    tile_amount: Option<f64>,
    text: &str,
) {
    println!("=== {title} ===");
    println!();

    println!("Verdict");
    println!("  {:<18} {}", "accepted", yes_no(verdict.accepted));
    println!("  {:<18} {}", "score", verdict.score);
    println!("  {:<18} {}", "amount", format_amount(verdict.amount));
    if let Some(provider) = &verdict.provider {
        println!("  {:<18} {}", "provider", provider);
    }
    if let Some(amount) = tile_amount {
        println!("  {:<18} {}", "tile amount", format_amount(Some(amount)));
    }
    println!();

    print_signals(verdict);

    if !candidates.is_empty() {
        println!("Candidates");
        for c in candidates {
            println!("  {:<18} priority {}", format_amount(Some(c.value)), c.priority);
        }
        println!();
    }

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if !lines.is_empty() {
        println!("Text");
        for line in lines.iter().take(MAX_TEXT_LINES) {
            println!("  {}", line.trim());
        }
        if lines.len() > MAX_TEXT_LINES {
            println!("  ... {} more lines", lines.len() - MAX_TEXT_LINES);
        }
        println!();
    }
}

/// One line per handled message.
pub fn print_outcome(message_id: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Emitted(report) => println!("{message_id:<24} {}", describe_report(report)),
        Outcome::Skipped(reason) => println!("{message_id:<24} skipped   {reason}"),
        Outcome::Failed(e) => println!("{message_id:<24} failed    {e}"),
    }
}

// ── Helpers ──

fn print_signals(verdict: &ReceiptVerdict) {
    println!("Signals");
    for signal in Signal::ALL {
        let mark = if verdict.fired(signal) { "x" } else { " " };
        println!("  [{mark}] {}", signal.as_str());
    }
    println!();
}

fn describe_report(report: &EmissionReport) -> String {
    match report.kind {
        EmissionKind::ChatStart => format!(
            "chat      campaign={} line={} webhook={}",
            report.campaign_id,
            report.line,
            report.webhook.as_str()
        ),
        EmissionKind::Conversion => format!(
            "converted campaign={} amount={} via={} webhook={} capi={} upload={}",
            report.campaign_id,
            format_amount(report.amount),
            report.attribution.map(|a| a.as_str()).unwrap_or("-"),
            report.webhook.as_str(),
            report.revenue.as_str(),
            report.upload.as_str()
        ),
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

/// `15000.5` → `$ 15.000,50`, Argentine style.
pub fn format_amount(amount: Option<f64>) -> String {
    let Some(value) = amount else {
        return "-".to_string();
    };
    let cents = (value * 100.0).round() as i64;
    let (whole, frac) = (cents / 100, (cents % 100).abs());
    let digits = whole.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if whole < 0 { "-" } else { "" };
    if frac == 0 {
        format!("$ {sign}{grouped}")
    } else {
        format!("$ {sign}{grouped},{frac:02}")
    }
}
