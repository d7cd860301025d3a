//! Match rules: the comma-separated `key='value'` grammar used by listeners
//! to subscribe to broadcast traffic, plus the predicate it compiles into.

use crate::message::{Message, MessageType};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rule {
    pub r#type: Option<MessageType>,
    pub sender: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub path: Option<String>,
    pub destination: Option<String>,
}

impl Rule {
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(wanted) = self.r#type {
            if wanted != MessageType::Invalid && wanted != message.r#type {
                return false;
            }
        }

        field_matches(&self.sender, &message.sender)
            && field_matches(&self.interface, &message.interface)
            && field_matches(&self.member, &message.member)
            && field_matches(&self.path, &message.path)
            && field_matches(&self.destination, &message.destination)
    }
}

fn field_matches(want: &Option<String>, have: &str) -> bool {
    match want {
        Some(want) => want == have,
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnknownKey(String),
    QuoteMismatch,
    NotImplemented(String),
    Empty,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnknownKey(key) => write!(f, "unknown match rule key: {key}"),
            ParseError::QuoteMismatch => write!(f, "unterminated quote in match rule"),
            ParseError::NotImplemented(key) => write!(f, "match rule key not implemented: {key}"),
            ParseError::Empty => write!(f, "empty match rule"),
        }
    }
}

impl std::error::Error for ParseError {}

pub fn parse_rule(spec: &str) -> Result<Rule, ParseError> {
    if spec.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut rule = Rule::default();

    for pair in split_pairs(spec)? {
        let (key, value) = split_key_value(&pair);
        let value = strip_quotes(value)?;

        match key {
            "type" => rule.r#type = Some(parse_message_type(value)),
            "sender" => rule.sender = Some(value.to_string()),
            "interface" => rule.interface = Some(value.to_string()),
            "member" => rule.member = Some(value.to_string()),
            "path" => rule.path = Some(value.to_string()),
            "path_namespace" => return Err(ParseError::NotImplemented(key.to_string())),
            "destination" => rule.destination = Some(value.to_string()),
            "eavesdrop" => {}
            key if key.starts_with("arg") => {
                return Err(ParseError::NotImplemented(key.to_string()));
            }
            key => return Err(ParseError::UnknownKey(key.to_string())),
        }
    }

    Ok(rule)
}

/// Splits on top-level commas, i.e. ones not inside a `'...'` span.
fn split_pairs(spec: &str) -> Result<Vec<String>, ParseError> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in spec.chars() {
        match ch {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                pairs.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err(ParseError::QuoteMismatch);
    }

    pairs.push(current);
    Ok(pairs.into_iter().filter(|p| !p.is_empty()).collect())
}

fn split_key_value(pair: &str) -> (&str, &str) {
    match pair.split_once('=') {
        Some((key, value)) => (key.trim(), value),
        None => (pair.trim(), ""),
    }
}

fn strip_quotes(value: &str) -> Result<&str, ParseError> {
    if let Some(inner) = value.strip_prefix('\'') {
        inner.strip_suffix('\'').ok_or(ParseError::QuoteMismatch)
    } else {
        Ok(value)
    }
}

fn parse_message_type(value: &str) -> MessageType {
    match value {
        "signal" => MessageType::Signal,
        "method_call" => MessageType::MethodCall,
        "method_return" => MessageType::MethodReturn,
        "error" => MessageType::Error,
        _ => MessageType::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_signal_rule() {
        let rule = parse_rule(
            "type='signal',sender='org.freedesktop.DBus',interface='org.freedesktop.DBus'",
        )
        .unwrap();

        assert_eq!(rule.r#type, Some(MessageType::Signal));
        assert_eq!(rule.sender.as_deref(), Some("org.freedesktop.DBus"));
        assert_eq!(rule.interface.as_deref(), Some("org.freedesktop.DBus"));
        assert_eq!(rule.member, None);
    }

    #[test]
    fn rejects_unknown_key() {
        assert_eq!(
            parse_rule("flavor='vanilla'"),
            Err(ParseError::UnknownKey("flavor".to_string()))
        );
    }

    #[test]
    fn rejects_arg_matching_as_not_implemented() {
        assert_eq!(
            parse_rule("arg0='foo'"),
            Err(ParseError::NotImplemented("arg0".to_string()))
        );
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert_eq!(parse_rule("sender='unterminated"), Err(ParseError::QuoteMismatch));
    }

    #[test]
    fn rejects_empty_spec() {
        assert_eq!(parse_rule("   "), Err(ParseError::Empty));
    }

    #[test]
    fn matches_uses_wildcard_for_absent_fields() {
        let rule = parse_rule("member='NameOwnerChanged'").unwrap();

        let message = Message {
            r#type: MessageType::Signal,
            flags: Default::default(),
            sender: "org.freedesktop.DBus".to_string(),
            destination: String::new(),
            session_id: 0,
            interface: "org.freedesktop.DBus".to_string(),
            member: "NameOwnerChanged".to_string(),
            path: "/org/freedesktop/DBus".to_string(),
            call_serial: 1,
        };

        assert!(rule.matches(&message));
    }
}
