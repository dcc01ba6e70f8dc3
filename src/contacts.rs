use crate::api::models::Contact;

/// Phone number part of a jid such as `628123456789@s.whatsapp.net`.
/// Device suffixes (`628123:12@s.whatsapp.net`) are dropped.
pub fn phone_from_jid(jid: &str) -> Option<String> {
    let user = jid.split('@').next()?;
    let user = user.split(':').next()?;
    if user.is_empty() || !user.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(user.to_string())
}

impl Contact {
    pub fn display_name(&self) -> String {
        [&self.full_name, &self.first_name, &self.push_name, &self.business_name]
            .into_iter()
            .find(|name| !name.trim().is_empty())
            .cloned()
            .or_else(|| phone_from_jid(&self.jid))
            .unwrap_or_else(|| self.jid.clone())
    }

    fn matches(&self, needle: &str) -> bool {
        [&self.full_name, &self.first_name, &self.push_name, &self.business_name, &self.jid]
            .into_iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

pub fn filter_contacts<'a>(contacts: &'a [Contact], query: &str) -> Vec<&'a Contact> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return contacts.iter().collect();
    }
    contacts.iter().filter(|c| c.matches(&needle)).collect()
}
