//! Song link recognition.
//!
//! Only YouTube links are resolved. Every accepted form is rewritten to
//! the canonical watch URL so duplicate detection compares like with like.

use reqwest::Url;

const VIDEO_ID_LEN: usize = 11;

/// A recognised YouTube video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoLink {
    /// The 11-character video id.
    pub video_id: String,
}

impl VideoLink {
    /// `https://www.youtube.com/watch?v=<id>`
    pub fn canonical_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

/// Recognise `youtube.com/watch?v=`, `youtu.be/`, `/shorts/`, `/embed/`,
/// and `/live/` links on the usual hosts.
pub fn parse_video_link(link: &str) -> Option<VideoLink> {
    let url = Url::parse(link.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let candidate = match host {
        "youtu.be" => url.path_segments()?.next().map(ToOwned::to_owned),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("shorts" | "embed" | "live") => segments.next().map(ToOwned::to_owned),
                _ => None,
            }
        }
        _ => None,
    }?;

    is_video_id(&candidate).then_some(VideoLink {
        video_id: candidate,
    })
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == VIDEO_ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
