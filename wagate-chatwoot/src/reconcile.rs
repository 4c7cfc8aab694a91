//! Contact matching rules.
//!
//! Brazilian mobile numbers exist in two forms: with the 9th digit added in
//! 2012-2016 (`+55 11 9xxxx-xxxx`, 14 characters) and without it (13
//! characters). WhatsApp may report either, so a lookup searches both and,
//! when Chatwoot holds one contact for each, merges them.

use crate::types::Contact;

const BRAZIL_PREFIX: &str = "+55";
const WITH_NINTH_DIGIT: usize = 14;
const WITHOUT_NINTH_DIGIT: usize = 13;
/// Position of the 9th digit, right after `+55` and the area code.
const NINTH_DIGIT_AT: usize = 5;

/// The query plus its Brazilian twin, if any.
pub fn phone_variants(query: &str) -> Vec<String> {
    let mut variants = vec![query.to_string()];
    if !query.starts_with(BRAZIL_PREFIX) || !query.is_ascii() {
        return variants;
    }
    match query.len() {
        WITH_NINTH_DIGIT => {
            let mut twin = query.to_string();
            twin.remove(NINTH_DIGIT_AT);
            variants.push(twin);
        }
        WITHOUT_NINTH_DIGIT => {
            let mut twin = query.to_string();
            twin.insert(NINTH_DIGIT_AT, '9');
            variants.push(twin);
        }
        _ => {}
    }
    variants
}

/// What to do with the contacts a phone lookup returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactChoice {
    Existing(Contact),
    /// Two Brazilian twins: keep `base` (9-digit form), fold `mergee` into it.
    Merge { base: Contact, mergee: Contact },
}

impl ContactChoice {
    /// The contact that survives.
    pub fn contact(&self) -> &Contact {
        match self {
            Self::Existing(contact) => contact,
            Self::Merge { base, .. } => base,
        }
    }
}

fn normalized_phone(contact: &Contact) -> Option<String> {
    contact.phone_number.as_deref().map(|p| {
        let digits: String = p.chars().filter(char::is_ascii_digit).collect();
        format!("+{digits}")
    })
}

/// Pick among the contacts matching `query` or its twin.
///
/// Twins are merged first when merging is enabled; otherwise an exact match
/// wins over a twin.
pub fn pick_contact(query: &str, contacts: &[Contact], merge_brazil: bool) -> Option<ContactChoice> {
    let variants = phone_variants(query);
    let matching: Vec<(&Contact, String)> = contacts
        .iter()
        .filter_map(|c| {
            let phone = normalized_phone(c)?;
            variants.contains(&phone).then_some((c, phone))
        })
        .collect();

    if merge_brazil && variants.len() == 2 {
        let long = matching.iter().find(|(_, p)| p.len() == WITH_NINTH_DIGIT);
        let short = matching.iter().find(|(_, p)| p.len() == WITHOUT_NINTH_DIGIT);
        if let (Some((base, _)), Some((mergee, _))) = (long, short) {
            if base.id != mergee.id {
                return Some(ContactChoice::Merge {
                    base: (*base).clone(),
                    mergee: (*mergee).clone(),
                });
            }
        }
    }

    matching
        .iter()
        .find(|(_, p)| p == query)
        .or_else(|| matching.first())
        .map(|(c, _)| ContactChoice::Existing((*c).clone()))
}
