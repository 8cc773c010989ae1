//! Two-sided WhatsApp line identifiers.
//!
//! A line is known either by its internal canonical id (a UUID assigned when the
//! line was registered) or by the transport's external id (the session or phone
//! label the messaging layer reports). Attribution signals are always keyed by the
//! canonical form; the [`LineRef`] type keeps the two namespaces apart so only one
//! resolver ever translates between them.

use std::fmt;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LineRef {
    /// Internal id, recognised by its UUID shape.
    Canonical(Uuid),
    /// Transport-side id that still needs resolving.
    External(String),
}

impl LineRef {
    /// Classify a raw line id by shape.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if !is_hyphenated_uuid(raw) {
            return Self::External(raw.to_string());
        }
        match Uuid::parse_str(raw) {
            Ok(id) => Self::Canonical(id),
            Err(_) => Self::External(raw.to_string()),
        }
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Canonical(_))
    }

    /// The string stored in signal and dedup tables.
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

/// `8-4-4-4-12` hex groups. `Uuid::parse_str` alone would also take the
/// simple, braced and URN forms.
fn is_hyphenated_uuid(raw: &str) -> bool {
    raw.len() == 36
        && raw.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canonical(id) => write!(f, "{}", id.hyphenated()),
            Self::External(raw) => f.write_str(raw),
        }
    }
}

impl From<Uuid> for LineRef {
    fn from(id: Uuid) -> Self {
        Self::Canonical(id)
    }
}
