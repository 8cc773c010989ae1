//! Campaign code candidates in a first chat message.
//!
//! Landing pages prefill the chat with the campaign code, but people edit the
//! text, so both the whole body and each token are tried.

use recibo_core::campaign_code;

pub const MIN_CODE_LEN: usize = 3;
const MAX_TOKENS: usize = 16;

/// Distinct codes in lookup order: whole body first, then tokens.
pub fn candidate_codes(body: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    let whole = std::iter::once(body);
    let tokens = body.split_whitespace().take(MAX_TOKENS);
    for code in whole.chain(tokens).map(campaign_code) {
        if code.chars().count() >= MIN_CODE_LEN && !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}
