//! Field references and entry placeholders
//!
//! `{REF:<wanted>@<search-in>:<text>}` pulls a field out of another entry.
//! `wanted` and `search-in` are one of `T` (title), `U` (user name),
//! `P` (password), `A` (URL), `N` (notes) or `I` (UUID, 32 hex digits).
//! `{TITLE}`, `{USERNAME}`, `{PASSWORD}`, `{URL}` and `{NOTES}` expand to the
//! context entry's own fields.

use crate::database::Database;
use crate::entry::Entry;
use crate::meta::{FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME};
use uuid::Uuid;

/// Nesting limit for references whose targets contain references
const MAX_DEPTH: usize = 12;

const REF_PREFIX: &str = "{REF:";

fn field_name(code: char) -> Option<&'static str> {
    match code.to_ascii_uppercase() {
        'T' => Some(FIELD_TITLE),
        'U' => Some(FIELD_USERNAME),
        'P' => Some(FIELD_PASSWORD),
        'A' => Some(FIELD_URL),
        'N' => Some(FIELD_NOTES),
        _ => None,
    }
}

const PLACEHOLDERS: [(&str, &str); 5] = [
    ("{TITLE}", FIELD_TITLE),
    ("{USERNAME}", FIELD_USERNAME),
    ("{PASSWORD}", FIELD_PASSWORD),
    ("{URL}", FIELD_URL),
    ("{NOTES}", FIELD_NOTES),
];

/// A parsed `{REF:W@S:text}` body
struct Reference<'a> {
    wanted: char,
    search_in: char,
    text: &'a str,
}

impl<'a> Reference<'a> {
    /// Parse the part between `{REF:` and `}`
    fn parse(body: &'a str) -> Option<Self> {
        let mut chars = body.chars();
        let wanted = chars.next()?;
        if chars.next()? != '@' {
            return None;
        }
        let search_in = chars.next()?;
        if chars.next()? != ':' {
            return None;
        }
        Some(Self {
            wanted,
            search_in,
            text: chars.as_str(),
        })
    }
}

impl Database {
    /// Expand placeholders and field references in `text`, as seen from
    /// `entry`.
    ///
    /// References that match nothing are left as written. References nested
    /// deeper than twelve levels stay unexpanded.
    pub fn resolve_references(&self, entry: &Entry, text: &str) -> String {
        self.resolve_at(entry, text, 0)
    }

    fn resolve_at(&self, entry: &Entry, text: &str, depth: usize) -> String {
        if depth > MAX_DEPTH || !text.contains('{') {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            rest = &rest[open..];

            let close = match rest.find('}') {
                Some(close) => close,
                None => break,
            };
            let token = &rest[..=close];

            match self.expand(entry, token, depth) {
                Some(value) => {
                    out.push_str(&value);
                    rest = &rest[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &rest[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Expansion of one `{...}` token, or `None` to keep it verbatim
    fn expand(&self, entry: &Entry, token: &str, depth: usize) -> Option<String> {
        for (placeholder, field) in PLACEHOLDERS {
            if token.eq_ignore_ascii_case(placeholder) {
                let value = entry.get(field).unwrap_or_default();
                return Some(self.resolve_at(entry, value, depth + 1));
            }
        }

        let prefix = token.get(..REF_PREFIX.len())?;
        if !prefix.eq_ignore_ascii_case(REF_PREFIX) {
            return None;
        }
        let body = &token[REF_PREFIX.len()..token.len() - 1];
        let reference = Reference::parse(body)?;
        let target = self.find_reference_target(&reference)?;

        if reference.wanted.eq_ignore_ascii_case(&'I') {
            return Some(target.uuid.simple().to_string().to_uppercase());
        }
        let value = target.get(field_name(reference.wanted)?).unwrap_or_default();
        Some(self.resolve_at(target, value, depth + 1))
    }

    /// First entry, in document order, matching the reference's search
    fn find_reference_target(&self, reference: &Reference<'_>) -> Option<&Entry> {
        if reference.search_in.eq_ignore_ascii_case(&'I') {
            let uuid = Uuid::try_parse(reference.text.trim()).ok()?;
            return self.get_entry(&uuid);
        }

        let field = field_name(reference.search_in)?;
        let needle = reference.text.to_lowercase();
        self.groups_in_order()
            .into_iter()
            .flat_map(|group| group.entries.iter())
            .filter_map(|uuid| self.get_entry(uuid))
            .find(|candidate| {
                candidate
                    .get(field)
                    .is_some_and(|value| value.to_lowercase().contains(&needle))
            })
    }
}
