use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribute key client apps route on
pub const TYPE_ATTRIBUTE: &str = "type";

/// Longest body (in chars) a builder will emit
pub const MAX_BODY_CHARS: usize = 240;

const ANONYMOUS_ACTOR: &str = "Someone";

/// Kind of domain event a notification was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewFollower,
    NewComment,
    CommentReply,
    PostLiked,
    Promotion,
    CouponIssued,
}

impl NotificationKind {
    /// Value of the `type` attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewFollower => "new_follower",
            NotificationKind::NewComment => "new_comment",
            NotificationKind::CommentReply => "comment_reply",
            NotificationKind::PostLiked => "post_liked",
            NotificationKind::Promotion => "promotion",
            NotificationKind::CouponIssued => "coupon_issued",
        }
    }

    /// Title used when the caller supplies none
    pub fn default_title(&self) -> &'static str {
        match self {
            NotificationKind::NewFollower => "New follower",
            NotificationKind::NewComment => "New comment on your post",
            NotificationKind::CommentReply => "New reply to your comment",
            NotificationKind::PostLiked => "Someone liked your post",
            NotificationKind::Promotion => "Special offer",
            NotificationKind::CouponIssued => "Coupon issued",
        }
    }
}

/// Content of a push notification.
///
/// Built once and never mutated afterwards. Builders guarantee a non-blank
/// title; a payload decoded from the wire may still carry a blank one, which
/// is what [`super::NotificationEvent::has_valid_content`] checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl NotificationPayload {
    pub fn builder(kind: NotificationKind) -> PayloadBuilder {
        PayloadBuilder::new(kind)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The routing `type` attribute, if present
    pub fn kind(&self) -> Option<&str> {
        self.attribute(TYPE_ATTRIBUTE)
    }

    /// JSON form stored as a retry snapshot
    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_snapshot(snapshot: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(snapshot)
    }
}

/// Builder for [`NotificationPayload`].
///
/// The domain constructors (`new_follower`, `comment_reply`, ...) are pure
/// functions of their arguments.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    kind: NotificationKind,
    title: Option<String>,
    body: Option<String>,
    image_url: Option<String>,
    attributes: BTreeMap<String, String>,
}

impl PayloadBuilder {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            title: None,
            body: None,
            image_url: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> NotificationPayload {
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.kind.default_title().to_string());

        let body = self
            .body
            .map(|b| truncate_chars(b.trim(), MAX_BODY_CHARS))
            .filter(|b| !b.is_empty());

        let image_url = self
            .image_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let mut attributes = self.attributes;
        attributes.insert(TYPE_ATTRIBUTE.to_string(), self.kind.as_str().to_string());

        NotificationPayload {
            title,
            body,
            image_url,
            attributes,
        }
    }

    pub fn new_follower(follower_nickname: &str, follower_id: &str) -> NotificationPayload {
        Self::new(NotificationKind::NewFollower)
            .body(format!("{} started following you", actor(follower_nickname)))
            .attribute("follower_id", follower_id)
            .build()
    }

    pub fn new_comment(
        commenter_nickname: &str,
        post_id: &str,
        excerpt: &str,
    ) -> NotificationPayload {
        Self::new(NotificationKind::NewComment)
            .body(format!("{}: {}", actor(commenter_nickname), excerpt.trim()))
            .attribute("post_id", post_id)
            .build()
    }

    pub fn comment_reply(
        replier_nickname: &str,
        post_id: &str,
        comment_id: &str,
        excerpt: &str,
    ) -> NotificationPayload {
        Self::new(NotificationKind::CommentReply)
            .body(format!("{}: {}", actor(replier_nickname), excerpt.trim()))
            .attribute("post_id", post_id)
            .attribute("comment_id", comment_id)
            .build()
    }

    pub fn post_liked(liker_nickname: &str, post_id: &str) -> NotificationPayload {
        Self::new(NotificationKind::PostLiked)
            .body(format!("{} liked your post", actor(liker_nickname)))
            .attribute("post_id", post_id)
            .build()
    }

    /// Promotional broadcast for a venue. A blank title falls back to the
    /// kind's default title.
    pub fn promotion(
        title: &str,
        body: &str,
        image_url: Option<&str>,
        venue_id: &str,
    ) -> NotificationPayload {
        let mut builder = Self::new(NotificationKind::Promotion)
            .title(title)
            .body(body)
            .attribute("venue_id", venue_id);
        if let Some(url) = image_url {
            builder = builder.image_url(url);
        }
        builder.build()
    }

    pub fn coupon_issued(
        venue_name: &str,
        coupon_id: &str,
        expires_at: DateTime<Utc>,
    ) -> NotificationPayload {
        let venue = if venue_name.trim().is_empty() {
            "a venue"
        } else {
            venue_name.trim()
        };
        Self::new(NotificationKind::CouponIssued)
            .body(format!(
                "You received a coupon from {}. Valid until {}",
                venue,
                expires_at.format("%Y-%m-%d")
            ))
            .attribute("coupon_id", coupon_id)
            .attribute("expires_at", expires_at.to_rfc3339())
            .build()
    }
}

fn actor(nickname: &str) -> &str {
    let trimmed = nickname.trim();
    if trimmed.is_empty() {
        ANONYMOUS_ACTOR
    } else {
        trimmed
    }
}

/// Cut `text` to at most `max_chars` characters, ending with an ellipsis
/// when shortened.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_follower_sets_type_and_title() {
        let payload = PayloadBuilder::new_follower("mina", "member-42");

        assert_eq!(payload.title(), "New follower");
        assert_eq!(payload.body(), Some("mina started following you"));
        assert_eq!(payload.kind(), Some("new_follower"));
        assert_eq!(payload.attribute("follower_id"), Some("member-42"));
    }

    #[test]
    fn test_blank_nickname_uses_anonymous_actor() {
        let payload = PayloadBuilder::post_liked("   ", "post-1");
        assert_eq!(payload.body(), Some("Someone liked your post"));
    }

    #[test]
    fn test_comment_reply_attributes() {
        let payload = PayloadBuilder::comment_reply("jun", "post-7", "cmt-3", " nice place! ");

        assert_eq!(payload.kind(), Some("comment_reply"));
        assert_eq!(payload.body(), Some("jun: nice place!"));
        assert_eq!(payload.attribute("post_id"), Some("post-7"));
        assert_eq!(payload.attribute("comment_id"), Some("cmt-3"));
    }

    #[test]
    fn test_promotion_blank_title_falls_back() {
        let payload = PayloadBuilder::promotion("  ", "2 for 1 tonight", None, "venue-9");

        assert_eq!(payload.title(), "Special offer");
        assert!(payload.image_url().is_none());
        assert_eq!(payload.attribute("venue_id"), Some("venue-9"));
    }

    #[test]
    fn test_promotion_keeps_image() {
        let payload = PayloadBuilder::promotion(
            "Happy hour",
            "Half price",
            Some("https://cdn.example.com/a.png"),
            "venue-1",
        );
        assert_eq!(payload.title(), "Happy hour");
        assert_eq!(payload.image_url(), Some("https://cdn.example.com/a.png"));
    }

    #[test]
    fn test_coupon_issued_body_and_expiry() {
        let expires = Utc.with_ymd_and_hms(2026, 12, 31, 23, 0, 0).unwrap();
        let payload = PayloadBuilder::coupon_issued("Blue Door Cafe", "cp-1", expires);

        assert_eq!(
            payload.body(),
            Some("You received a coupon from Blue Door Cafe. Valid until 2026-12-31")
        );
        assert_eq!(payload.attribute("expires_at"), Some(expires.to_rfc3339().as_str()));
    }

    #[test]
    fn test_type_attribute_cannot_be_overridden() {
        let payload = NotificationPayload::builder(NotificationKind::NewComment)
            .attribute("type", "spoofed")
            .build();
        assert_eq!(payload.kind(), Some("new_comment"));
    }

    #[test]
    fn test_long_body_is_truncated() {
        let long = "a".repeat(MAX_BODY_CHARS + 50);
        let payload = NotificationPayload::builder(NotificationKind::Promotion)
            .body(long)
            .build();

        let body = payload.body().unwrap();
        assert_eq!(body.chars().count(), MAX_BODY_CHARS);
        assert!(body.ends_with('…'));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("안녕하세요", 3), "안녕…");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_snapshot_uses_camel_case() {
        let payload = PayloadBuilder::promotion("Hi", "x", Some("https://img"), "v");
        let snapshot = payload.to_snapshot().unwrap();

        assert!(snapshot.contains("\"imageUrl\""));
        assert_eq!(NotificationPayload::from_snapshot(&snapshot).unwrap(), payload);
    }
}
