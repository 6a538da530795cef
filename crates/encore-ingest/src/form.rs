//! The submission payload accepted from chat integrations and the REST
//! endpoint.

use chrono::{DateTime, Utc};
use encore_types::{Priority, RequestType};
use serde::Deserialize;
use validator::Validate;

/// A raw song request, before link resolution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionForm {
    /// Requester's login; matched case-insensitively.
    #[validate(length(min = 1, max = 64))]
    pub requester_login: String,

    /// Name to show on the overlay. Defaults to the login.
    #[validate(length(min = 1, max = 64))]
    pub requester_display_name: Option<String>,

    /// Link to the song.
    #[validate(url, length(max = 2048))]
    pub song_link: String,

    /// Title override. Required when the link cannot be resolved.
    #[validate(length(min = 1, max = 300))]
    pub song_title: Option<String>,

    /// How the request was paid for.
    #[serde(rename = "type")]
    pub request_type: RequestType,

    /// Explicit priority; omitted derives it from `type`.
    #[serde(default)]
    pub priority: Option<Priority>,

    /// When the viewer redeemed, if the integration knows.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SubmissionForm {
    /// A minimal form for the given login and link.
    pub fn new(login: &str, song_link: &str, request_type: RequestType) -> Self {
        Self {
            requester_login: login.to_owned(),
            requester_display_name: None,
            song_link: song_link.to_owned(),
            song_title: None,
            request_type,
            priority: None,
            submitted_at: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_payload() {
        let form: SubmissionForm = serde_json::from_str(
            r#"{"requesterLogin":"Alice","songLink":"https://youtu.be/dQw4w9WgXcQ","type":"donation"}"#,
        )
        .unwrap();
        assert_eq!(form.request_type, RequestType::Donation);
        assert!(form.priority.is_none());
        assert!(form.validate().is_ok());
    }

    #[test]
    fn rejects_non_url_and_empty_login() {
        let mut form = SubmissionForm::new("", "not a link", RequestType::ChannelPoints);
        let errors = form.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("requester_login"));
        assert!(fields.contains_key("song_link"));

        form.requester_login = String::from("bob");
        form.song_link = String::from("https://youtu.be/dQw4w9WgXcQ");
        form.song_title = Some(String::new());
        assert!(form.validate().unwrap_err().field_errors().contains_key("song_title"));
    }
}
