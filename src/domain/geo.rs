//! Country names and the payment methods known per country.

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("IN", "India"),
    ("PK", "Pakistan"),
    ("ID", "Indonesia"),
    ("MY", "Malaysia"),
    ("EG", "Egypt"),
    ("CI", "Côte d’Ivoire"),
    ("UZ", "Uzbekistan"),
    ("AZ", "Azerbaijan"),
    ("KZ", "Kazakhstan"),
    ("TH", "Thailand"),
    ("AR", "Argentina"),
    ("PH", "Philippines"),
    ("BR", "Brazil"),
    ("MX", "Mexico"),
    ("CO", "Colombia"),
    ("VN", "Vietnam"),
    ("TR", "Turkey"),
    ("BD", "Bangladesh"),
];

const METHODS_BY_COUNTRY: &[(&str, &[&str])] = &[
    ("IN", &["UPI", "PhonePe", "PayTM", "Google Pay", "Amazon Pay"]),
    ("BD", &["bKash", "Nagad", "Rocket", "Upay"]),
    ("PK", &["JazzCash", "Easypaisa", "Nayapay"]),
    (
        "ID",
        &["GoPay", "OVO", "DANA", "LinkAja", "ShopeePay", "GrabPay", "Boost", "QRIS"],
    ),
    ("MY", &["Touch ’n Go", "Boost", "GrabPay", "ShopeePay", "DuitNow"]),
    ("TH", &["PromptPay", "TrueMoney"]),
    ("PH", &["GCash", "PayMaya", "GrabPay", "ShopeePay"]),
    (
        "EG",
        &["Vodafone Cash", "Etisalat Cash", "Orange Money", "Fawry", "Meeza"],
    ),
    ("KZ", &["Kaspi Pay", "Bank Transfer"]),
    ("UZ", &["Payme", "UzCard", "Humo"]),
    ("CI", &["Orange Money", "MTN Money", "Moov Money", "Wave"]),
    ("AR", &["Mercado Pago", "Bank Transfer"]),
];

/// Normalizes a region code: exactly two ASCII letters, upper-cased.
pub fn normalize_geo(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(raw.to_ascii_uppercase())
    } else {
        None
    }
}

pub fn country_name(code: &str) -> Option<&'static str> {
    COUNTRY_NAMES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

/// Regional-indicator flag for a two-letter code, globe otherwise.
pub fn flag(code: &str) -> String {
    match normalize_geo(code) {
        Some(code) => code
            .chars()
            .filter_map(|c| char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32)))
            .collect(),
        None => "🌍".to_string(),
    }
}

/// `🇮🇳 India`, falling back to the bare code for unknown countries.
pub fn format_country(code: &str) -> String {
    let upper = code.trim().to_ascii_uppercase();
    let name = country_name(&upper).unwrap_or(&upper);
    format!("{} {}", flag(&upper), name)
}

pub fn methods_for(geo: &str) -> &'static [&'static str] {
    METHODS_BY_COUNTRY
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(geo))
        .map(|(_, methods)| *methods)
        .unwrap_or(&[])
}

/// Resolves user input to a catalog method title, case-insensitively.
pub fn match_method(geo: &str, input: &str) -> Option<&'static str> {
    let input = input.trim();
    methods_for(geo)
        .iter()
        .find(|m| m.eq_ignore_ascii_case(input))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_geo() {
        assert_eq!(normalize_geo("in"), Some("IN".to_string()));
        assert_eq!(normalize_geo(" Bd "), Some("BD".to_string()));
        assert_eq!(normalize_geo("IND"), None);
        assert_eq!(normalize_geo("1N"), None);
    }

    #[test]
    fn test_format_country() {
        assert_eq!(format_country("in"), "🇮🇳 India");
        assert_eq!(format_country("QQ"), "🇶🇶 QQ");
    }

    #[test]
    fn test_method_lookup() {
        assert_eq!(match_method("IN", "upi"), Some("UPI"));
        assert_eq!(match_method("IN", "bKash"), None);
        assert!(methods_for("FR").is_empty());
    }
}
