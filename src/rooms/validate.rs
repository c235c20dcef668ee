//! Shape checks for inbound payloads, reported per field.

use serde_json::Value;

use super::msg::FieldErrors;
use crate::game::CODE_LENGTH;

pub const PLAYER_NAME_LENGTH: usize = 10;

const REQUIRED: &str = "This field is required.";

pub trait GetField {
    fn get_str_field(&self, field: &str) -> Option<&str>;
    fn get_int_field(&self, field: &str) -> Option<Result<i64, ()>>;
}

impl GetField for Value {
    fn get_str_field(&self, field: &str) -> Option<&str> {
        self.get(field)?.as_str().filter(|s| !s.trim().is_empty())
    }

    fn get_int_field(&self, field: &str) -> Option<Result<i64, ()>> {
        match self.get(field)? {
            Value::Number(n) => Some(n.as_i64().ok_or(())),
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().parse().map_err(|_| ())),
            Value::Null => None,
            _ => Some(Err(())),
        }
    }
}

/// Collects field errors while a request is being pulled out of a payload.
#[derive(Debug)]
pub struct Form<'a> {
    payload: &'a Value,
    errors: FieldErrors,
}

impl<'a> Form<'a> {
    pub fn new(payload: &'a Value) -> Self {
        Form {
            payload,
            errors: FieldErrors::new(),
        }
    }

    fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_owned()).or_default().push(message.into());
    }

    fn text(&mut self, field: &str) -> Option<&'a str> {
        let value = self.payload.get_str_field(field);
        if value.is_none() {
            self.add_error(field, REQUIRED);
        }
        value.map(str::trim)
    }

    fn max_length(&mut self, field: &str, value: String, max: usize) -> Option<String> {
        if value.chars().count() > max {
            self.add_error(field, format!("Ensure this value has at most {max} characters."));
            return None;
        }
        Some(value)
    }

    /// Lower-cased; letters only.
    pub fn room_code(&mut self) -> Option<String> {
        let code = self.text("room_code")?.to_lowercase();
        let code = self.max_length("room_code", code, CODE_LENGTH)?;
        if !code.bytes().all(|b| b.is_ascii_lowercase()) {
            self.add_error("room_code", "Game codes only contain letters.");
            return None;
        }
        Some(code)
    }

    /// HTML-escaped so it can be echoed into other players' pages.
    pub fn player_name(&mut self) -> Option<String> {
        let name = self.text("player_name")?.to_owned();
        self.max_length("player_name", name, PLAYER_NAME_LENGTH).map(|name| escape(&name))
    }

    pub fn key(&mut self, field: &str) -> Option<i64> {
        match self.payload.get_int_field(field) {
            Some(Ok(key)) => Some(key),
            Some(Err(())) => {
                self.add_error(field, "Enter a whole number.");
                None
            }
            None => {
                self.add_error(field, REQUIRED);
                None
            }
        }
    }

    /// Hands back `value` only if nothing was wrong with any field.
    pub fn finish<T>(self, value: Option<T>) -> Result<T, FieldErrors> {
        match value {
            Some(value) if self.errors.is_empty() => Ok(value),
            _ => Err(self.errors),
        }
    }
}

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn room_codes_are_normalised() {
        let payload = json!({ "room_code": "  AbCd " });
        let mut form = Form::new(&payload);
        let code = form.room_code();
        assert_eq!(form.finish(code).unwrap(), "abcd");
    }

    #[test]
    fn missing_and_oversized_fields_are_reported_per_field() {
        let payload = json!({ "room_code": "abcde", "card_key": "x" });
        let mut form = Form::new(&payload);
        let code = form.room_code();
        let name = form.player_name();
        let card = form.key("card_key");
        let errors = form.finish(code.zip(name).zip(card)).unwrap_err();

        assert_eq!(errors["room_code"], vec!["Ensure this value has at most 4 characters."]);
        assert_eq!(errors["player_name"], vec![REQUIRED]);
        assert_eq!(errors["card_key"], vec!["Enter a whole number."]);
    }

    #[test]
    fn keys_accept_numbers_and_numeric_strings() {
        let payload = json!({ "card_key": 12, "player_key": " 7 " });
        let mut form = Form::new(&payload);
        let card = form.key("card_key");
        let player = form.key("player_key");
        assert_eq!(form.finish(card.zip(player)).unwrap(), (12, 7));
    }

    #[test]
    fn player_names_are_escaped_after_the_length_check() {
        let payload = json!({ "player_name": "<b>tim</b>" });
        let mut form = Form::new(&payload);
        let name = form.player_name();
        assert_eq!(form.finish(name).unwrap(), "&lt;b&gt;tim&lt;/b&gt;");

        let payload = json!({ "player_name": "a-very-long-name" });
        let mut form = Form::new(&payload);
        let name = form.player_name();
        assert!(form.finish(name).is_err());
    }

    #[test]
    fn null_payloads_miss_every_field() {
        let payload = Value::Null;
        let mut form = Form::new(&payload);
        let code = form.room_code();
        assert!(form.finish(code).unwrap_err().contains_key("room_code"));
    }
}
