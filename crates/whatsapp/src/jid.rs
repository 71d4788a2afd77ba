//! WhatsApp address (JID) normalization.

/// Suffix of individual user addresses.
pub const USER_SUFFIX: &str = "@s.whatsapp.net";
/// Suffix of group addresses.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Normalize a phone number into a user JID.
///
/// `"+62 812-3456"` becomes `"628123456@s.whatsapp.net"`.
pub fn format_phone(phone: &str) -> String {
    if phone.ends_with(USER_SUFFIX) {
        return phone.to_string();
    }
    let mut formatted: String = phone.chars().filter(char::is_ascii_digit).collect();
    formatted.push_str(USER_SUFFIX);
    formatted
}

/// Normalize a group id into a group JID, keeping digits and hyphens.
pub fn format_group(group: &str) -> String {
    if group.ends_with(GROUP_SUFFIX) {
        return group.to_string();
    }
    let mut formatted: String = group
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    formatted.push_str(GROUP_SUFFIX);
    formatted
}

/// Normalize an id whose family is unknown: hyphenated ids are groups.
pub fn whatsapp_id(id: &str) -> String {
    if is_group(id) || is_user(id) {
        return id.to_string();
    }
    if id.contains('-') {
        format_group(id)
    } else {
        format_phone(id)
    }
}

/// Normalize a list of participant ids.
pub fn parse_participants<S: AsRef<str>>(users: &[S]) -> Vec<String> {
    users.iter().map(|u| whatsapp_id(u.as_ref())).collect()
}

pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SUFFIX)
}

pub fn is_user(jid: &str) -> bool {
    jid.ends_with(USER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_gets_user_suffix() {
        assert_eq!(format_phone("6281234567"), "6281234567@s.whatsapp.net");
        assert_eq!(format_phone("+62 812-345 67"), "6281234567@s.whatsapp.net");
    }

    #[test]
    fn suffixed_ids_pass_through() {
        assert_eq!(
            format_phone("6281234567@s.whatsapp.net"),
            "6281234567@s.whatsapp.net"
        );
        assert_eq!(
            format_group("120363012345-67890@g.us"),
            "120363012345-67890@g.us"
        );
        assert_eq!(whatsapp_id("120363012345@g.us"), "120363012345@g.us");
        assert_eq!(whatsapp_id("628@s.whatsapp.net"), "628@s.whatsapp.net");
    }

    #[test]
    fn group_keeps_hyphen() {
        assert_eq!(format_group("120363012345-67890"), "120363012345-67890@g.us");
        assert_eq!(format_group(" 1203 6301-2345x"), "12036301-2345@g.us");
    }

    #[test]
    fn ambiguous_hyphen_means_group() {
        assert_eq!(whatsapp_id("120363012345-67890"), "120363012345-67890@g.us");
        assert_eq!(whatsapp_id("6281234567"), "6281234567@s.whatsapp.net");
    }

    #[test]
    fn participants_are_normalized() {
        let users = ["6281", "6282@s.whatsapp.net"];
        assert_eq!(parse_participants(&users), vec![
            "6281@s.whatsapp.net".to_string(),
            "6282@s.whatsapp.net".to_string(),
        ]);
    }
}
