//! Local post payload.
//!
//! Maps a stored post onto the provider's `localPosts` vocabulary.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use gbp_db::entities::post::{self, CallToAction, PostType};
use serde::Serialize;
use thiserror::Error;

/// Why a post could not be turned into a payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{0} post is missing a title")]
    MissingTitle(&'static str),

    #[error("{0} post is missing its start or end time")]
    MissingSchedule(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicType {
    Standard,
    Event,
    Offer,
}

impl From<PostType> for TopicType {
    fn from(value: PostType) -> Self {
        match value {
            PostType::WhatsNew => Self::Standard,
            PostType::Event => Self::Event,
            PostType::Offer => Self::Offer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Book,
    Order,
    Buy,
    LearnMore,
    SignUp,
    Call,
    Directions,
}

impl ActionType {
    /// `None` for [`CallToAction::NoAction`].
    #[must_use]
    pub const fn from_call_to_action(cta: CallToAction) -> Option<Self> {
        match cta {
            CallToAction::NoAction => None,
            CallToAction::Book => Some(Self::Book),
            CallToAction::Order => Some(Self::Order),
            CallToAction::Shop => Some(Self::Buy),
            CallToAction::LearnMore => Some(Self::LearnMore),
            CallToAction::SignUp => Some(Self::SignUp),
            CallToAction::CallNow => Some(Self::Call),
            CallToAction::GetDirections => Some(Self::Directions),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionButton {
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Date {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeOfDay {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub nanos: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    pub start_date: Date,
    pub start_time: TimeOfDay,
    pub end_date: Date,
    pub end_time: TimeOfDay,
}

impl TimeInterval {
    fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let date = |t: DateTime<Utc>| Date {
            year: t.year(),
            month: t.month(),
            day: t.day(),
        };
        let time = |t: DateTime<Utc>| TimeOfDay {
            hours: t.hour(),
            minutes: t.minute(),
            seconds: t.second(),
            nanos: t.nanosecond(),
        };
        Self {
            start_date: date(start),
            start_time: time(start),
            end_date: date(end),
            end_time: time(end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventBlock {
    pub title: String,
    pub schedule: TimeInterval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaFormat {
    Photo,
    Video,
}

impl MediaFormat {
    /// `.mp4` (any case) is video; everything else is a photo.
    #[must_use]
    pub fn classify(url: &str) -> Self {
        if url.to_ascii_lowercase().ends_with(".mp4") {
            Self::Video
        } else {
            Self::Photo
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub media_format: MediaFormat,
    pub source_url: String,
}

/// Request body for `POST accounts/{a}/locations/{l}/localPosts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPost {
    pub language_code: String,
    pub summary: String,
    pub topic_type: TopicType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_to_action: Option<ActionButton>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_details: Option<OfferDetails>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaItem>,
}

fn utc(t: Option<DateTime<FixedOffset>>) -> Option<DateTime<Utc>> {
    t.map(|t| t.with_timezone(&Utc))
}

/// Longest event title the provider accepts.
const MAX_TITLE_CHARS: usize = 58;

/// The post title, or the first line of its content when untitled.
fn event_title(post: &post::Model) -> Option<String> {
    post.title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| post.content.lines().map(str::trim).find(|l| !l.is_empty()))
        .map(|t| t.chars().take(MAX_TITLE_CHARS).collect())
}

fn event_block(
    kind: &'static str,
    title: Option<String>,
    start: Option<DateTime<FixedOffset>>,
    end: Option<DateTime<FixedOffset>>,
) -> Result<EventBlock, PayloadError> {
    let title = title.ok_or(PayloadError::MissingTitle(kind))?;
    let (Some(start), Some(end)) = (utc(start), utc(end)) else {
        return Err(PayloadError::MissingSchedule(kind));
    };
    Ok(EventBlock {
        title,
        schedule: TimeInterval::new(start, end),
    })
}

/// Build the provider payload for a post.
pub fn build_local_post(post: &post::Model, language_code: &str) -> Result<LocalPost, PayloadError> {
    let (event, offer_details) = match post.post_type {
        PostType::WhatsNew => (None, None),
        PostType::Event => (
            Some(event_block(
                "EVENT",
                event_title(post),
                post.event_start,
                post.event_end,
            )?),
            None,
        ),
        // Offers carry their window in the event block.
        PostType::Offer => (
            Some(event_block(
                "OFFER",
                event_title(post),
                post.offer_start,
                post.offer_end,
            )?),
            Some(OfferDetails {
                coupon_code: post.coupon_code.clone().filter(|c| !c.trim().is_empty()),
            }),
        ),
    };

    let call_to_action = post
        .call_to_action
        .and_then(ActionType::from_call_to_action)
        .map(|action_type| ActionButton {
            action_type,
            url: post
                .call_to_action_url
                .clone()
                .filter(|u| !u.trim().is_empty()),
        });

    let media = post
        .media_urls()
        .into_iter()
        .map(|url| MediaItem {
            media_format: MediaFormat::classify(&url),
            source_url: url,
        })
        .collect();

    Ok(LocalPost {
        language_code: language_code.to_string(),
        summary: post.content.clone(),
        topic_type: post.post_type.into(),
        call_to_action,
        event,
        offer_details,
        media,
    })
}
