//! Personal data masking for extra parameters
//!
//! Applied after reads, never before writes: the store and the index keep
//! the original values.

use crate::models::ExtraParameters;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a field's value is obscured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    Telephone,
    Name,
}

/// Extra parameter keys that carry personal data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskedField {
    Tel,
    Numara,
    IsimSoyisim,
    NameSurname,
}

impl MaskedField {
    pub const ALL: [MaskedField; 4] = [
        MaskedField::Tel,
        MaskedField::Numara,
        MaskedField::IsimSoyisim,
        MaskedField::NameSurname,
    ];

    pub fn key(self) -> &'static str {
        match self {
            MaskedField::Tel => "tel",
            MaskedField::Numara => "numara",
            MaskedField::IsimSoyisim => "isim-soyisim",
            MaskedField::NameSurname => "name_surname",
        }
    }

    pub fn kind(self) -> MaskKind {
        match self {
            MaskedField::Tel | MaskedField::Numara => MaskKind::Telephone,
            MaskedField::IsimSoyisim | MaskedField::NameSurname => MaskKind::Name,
        }
    }
}

/// Which source channels get masked on read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingPolicy {
    /// Channels to mask; empty masks every channel
    pub channels: Vec<String>,
}

impl MaskingPolicy {
    pub fn applies_to(&self, channel: &str) -> bool {
        self.channels.is_empty() || self.channels.iter().any(|c| c == channel)
    }

    /// Mask `params` if the policy covers `channel`
    pub fn apply(&self, channel: &str, params: Option<ExtraParameters>) -> Option<ExtraParameters> {
        if self.applies_to(channel) {
            params.map(mask_parameters)
        } else {
            params
        }
    }
}

/// Replace every present personal field with its masked form
pub fn mask_parameters(params: ExtraParameters) -> ExtraParameters {
    match params {
        ExtraParameters::Structured(mut map) => {
            for field in MaskedField::ALL {
                if let Some(value) = map.get_mut(field.key()) {
                    let plain = match &*value {
                        Value::String(s) => s.clone(),
                        Value::Null => continue,
                        other => other.to_string(),
                    };
                    let masked = match field.kind() {
                        MaskKind::Telephone => mask_telephone(&plain),
                        MaskKind::Name => mask_name(&plain),
                    };
                    *value = Value::String(masked);
                }
            }
            ExtraParameters::Structured(map)
        }
        opaque => opaque,
    }
}

/// Mask the last four digits of a telephone number.
///
/// Spaces, parentheses and dashes are removed first. Ten digits format as
/// `(53)5555-****`, eight as `2799-****`; other lengths come back stripped
/// but unmasked.
pub fn mask_telephone(input: &str) -> String {
    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '(' | ')' | '-'))
        .collect();
    let chars: Vec<char> = digits.chars().collect();

    match chars.len() {
        10 => format!(
            "({}){}-****",
            chars[0..2].iter().collect::<String>(),
            chars[2..6].iter().collect::<String>()
        ),
        8 => format!("{}-****", chars[0..4].iter().collect::<String>()),
        _ => digits,
    }
}

/// Mask each word of a name, keeping its first letter and tail.
pub fn mask_name(input: &str) -> String {
    if input.contains(' ') {
        return input.split(' ').map(mask_name).collect::<Vec<_>>().join(" ");
    }

    let chars: Vec<char> = input.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 => "**".to_string(),
        2 | 3 => overlay(&chars, 1, 2),
        _ => overlay(&chars, 1, 3),
    }
}

fn overlay(chars: &[char], start: usize, end: usize) -> String {
    let end = end.min(chars.len());
    let mut out: String = chars[..start].iter().collect();
    out.push_str("**");
    out.extend(&chars[end..]);
    out
}
