//! SMS relay payload decoding and classification
//!
//! The phone publishes one JSON object per SMS:
//! `{"sender":"...","smsCode":"...","phoneNumber":"...","smsMsg":"..."}`.
//! Missing fields read as empty strings and unknown fields are ignored.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

/// One relayed SMS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmsEnvelope {
    /// Sending app or contact name
    #[serde(deserialize_with = "string_or_null")]
    pub sender: String,
    /// Verification code extracted on the phone (may be empty)
    #[serde(deserialize_with = "string_or_null")]
    pub sms_code: String,
    /// Originating phone number
    #[serde(deserialize_with = "string_or_null")]
    pub phone_number: String,
    /// Full SMS body (may be empty)
    #[serde(deserialize_with = "string_or_null")]
    pub sms_msg: String,
}

/// What the fan-out should do with an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Carries a verification code; copied to the clipboard
    Code,
    /// Free-form SMS; notification only
    Message,
}

/// `null` reads the same as an omitted field
fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl SmsEnvelope {
    /// A non-empty code always wins over the message body
    pub fn classification(&self) -> Classification {
        if self.sms_code.is_empty() {
            Classification::Message
        } else {
            Classification::Code
        }
    }

    fn validate(&self) -> Result<()> {
        if self.phone_number.is_empty() {
            bail!("Payload has no phoneNumber");
        }
        if self.sms_code.is_empty() && self.sms_msg.is_empty() {
            bail!("Payload has neither smsCode nor smsMsg");
        }
        Ok(())
    }
}

/// Decode raw bytes into a classified envelope
pub fn decode(payload: &[u8]) -> Result<(SmsEnvelope, Classification)> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).context("Payload is not valid JSON")?;

    // Arrays would otherwise be accepted positionally by the derived impl
    if !value.is_object() {
        bail!("Payload is not a JSON object");
    }

    let envelope: SmsEnvelope =
        serde_json::from_value(value).context("Payload fields must be strings")?;
    envelope.validate()?;

    let classification = envelope.classification();
    Ok((envelope, classification))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(sender: &str, code: &str, phone: &str, msg: &str) -> SmsEnvelope {
        SmsEnvelope {
            sender: sender.to_string(),
            sms_code: code.to_string(),
            phone_number: phone.to_string(),
            sms_msg: msg.to_string(),
        }
    }

    #[test]
    fn test_decode_code_payload() {
        let raw = br#"{"sender":"Bank","smsCode":"123456","phoneNumber":"+15550001","smsMsg":""}"#;
        let (env, class) = decode(raw).unwrap();
        assert_eq!(class, Classification::Code);
        assert_eq!(env, envelope("Bank", "123456", "+15550001", ""));
    }

    #[test]
    fn test_decode_message_payload() {
        let raw = br#"{"sender":"","smsCode":"","phoneNumber":"+15550002","smsMsg":"Hello"}"#;
        let (env, class) = decode(raw).unwrap();
        assert_eq!(class, Classification::Message);
        assert_eq!(env.sms_msg, "Hello");
    }

    #[test]
    fn test_code_wins_over_message() {
        let raw = br#"{"sender":"X","smsCode":"42","phoneNumber":"+1","smsMsg":"ignored"}"#;
        let (_, class) = decode(raw).unwrap();
        assert_eq!(class, Classification::Code);
    }

    #[test]
    fn test_missing_fields_default_empty() {
        let (env, class) = decode(br#"{"phoneNumber":"+1","smsMsg":"hi"}"#).unwrap();
        assert_eq!(env.sender, "");
        assert_eq!(env.sms_code, "");
        assert_eq!(class, Classification::Message);
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let (env, class) =
            decode(br#"{"sender":null,"smsCode":null,"phoneNumber":"+1","smsMsg":"hi"}"#).unwrap();
        assert_eq!(env.sender, "");
        assert_eq!(class, Classification::Message);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let raw = br#"{"smsCode":"9","phoneNumber":"+1","simSlot":2,"extra":{"a":1}}"#;
        let (env, _) = decode(raw).unwrap();
        assert_eq!(env.sms_code, "9");
    }

    #[test]
    fn test_not_json_rejected() {
        assert!(decode(b"not json").is_err());
        assert!(decode(b"").is_err());
        assert!(decode(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(decode(br#"["Bank","123","+1",""]"#).is_err());
        assert!(decode(br#""just a string""#).is_err());
        assert!(decode(b"42").is_err());
        assert!(decode(b"null").is_err());
    }

    #[test]
    fn test_non_string_field_rejected() {
        assert!(decode(br#"{"smsCode":123456,"phoneNumber":"+1"}"#).is_err());
    }

    #[test]
    fn test_empty_phone_number_rejected() {
        assert!(decode(br#"{"smsCode":"1","phoneNumber":""}"#).is_err());
        assert!(decode(br#"{"smsCode":"1"}"#).is_err());
    }

    #[test]
    fn test_no_code_and_no_message_rejected() {
        assert!(decode(br#"{"sender":"A","phoneNumber":"+1"}"#).is_err());
    }

    #[test]
    fn test_serialized_envelope_decodes_to_same_tuple() {
        let samples = [
            envelope("Bank", "123456", "+15550001", ""),
            envelope("", "", "+15550002", "Hello\nworld"),
            envelope("Ünïcode ✓", "AB-12", "+44 20", "\"quoted\" text"),
        ];
        for original in samples {
            let json = serde_json::to_vec(&original).unwrap();
            let (decoded, _) = decode(&json).unwrap();
            assert_eq!(decoded, original);
        }
    }
}
