//! Customer contact fields.

use serde::{Deserialize, Serialize};

/// Contact details captured at checkout.
///
/// Copied by value into orders and invoices so later edits to one document
/// never retroactively alter another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFields {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub comment: Option<String>,
}

impl CustomerFields {
    /// Normalize form input: trim whitespace, drop empty strings.
    pub fn normalized(name: &str, phone: &str, comment: &str) -> Self {
        fn clean(s: &str) -> Option<String> {
            let t = s.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
        Self {
            name: clean(name),
            phone: clean(phone),
            comment: clean(comment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_drops_blank_fields() {
        let c = CustomerFields::normalized("  Alia  ", "", "   ");
        assert_eq!(c.name.as_deref(), Some("Alia"));
        assert_eq!(c.phone, None);
        assert_eq!(c.comment, None);
    }
}
