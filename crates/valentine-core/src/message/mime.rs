//! Multipart assembly for the invite email.
//!
//! The message has one fixed shape:
//!
//! ```text
//! multipart/mixed
//! └── multipart/alternative
//!     ├── text/plain
//!     ├── multipart/related
//!     │   ├── text/html
//!     │   └── image/gif (inline, cid:valentine-gif)
//!     └── text/calendar (invite.ics)
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};

use super::calendar::build_invite;
use super::{CRLF, INLINE_IMAGE_CID, MessageBuildError, MessageConfig};

const BASE64_LINE_WIDTH: usize = 76;
const INTRO: &str = "We are officially booked for our valentine date!";

/// Boundary tokens for the three multipart levels, derived from the message uid.
///
/// Body content is not checked for collisions with these tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundaries {
    pub mixed: String,
    pub alternative: String,
    pub related: String,
}

impl Boundaries {
    pub fn from_uid(uid: &str) -> Self {
        Self {
            mixed: format!("mixed_{uid}"),
            alternative: format!("alt_{uid}"),
            related: format!("rel_{uid}"),
        }
    }
}

/// Build the complete raw message.
///
/// Fails without producing output if the image is empty or the event date is
/// invalid.
pub fn build_message(
    config: &MessageConfig,
    image: &[u8],
    now: DateTime<Utc>,
    uid: &str,
) -> Result<String, MessageBuildError> {
    if image.is_empty() {
        return Err(MessageBuildError::EmptyImage);
    }

    let invite = build_invite(config, now, uid)?;
    let boundaries = Boundaries::from_uid(uid);

    let mut out = String::with_capacity(image.len() * 2 + invite.len() + 2048);

    push_line(&mut out, &format!("From: {}", config.sender));
    push_line(&mut out, &format!("To: {}", config.recipients.join(", ")));
    push_line(&mut out, &format!("Subject: {}", config.subject));
    push_line(&mut out, "MIME-Version: 1.0");
    push_line(&mut out, &multipart_header("mixed", &boundaries.mixed));
    out.push_str(CRLF);

    push_delimiter(&mut out, &boundaries.mixed);
    push_line(&mut out, &multipart_header("alternative", &boundaries.alternative));
    out.push_str(CRLF);

    push_delimiter(&mut out, &boundaries.alternative);
    push_line(&mut out, "Content-Type: text/plain; charset=\"UTF-8\"");
    out.push_str(CRLF);
    push_line(&mut out, &plain_body(config));

    push_delimiter(&mut out, &boundaries.alternative);
    push_line(&mut out, &multipart_header("related", &boundaries.related));
    out.push_str(CRLF);

    push_delimiter(&mut out, &boundaries.related);
    push_line(&mut out, "Content-Type: text/html; charset=\"UTF-8\"");
    out.push_str(CRLF);
    push_line(&mut out, &html_body(config));

    push_delimiter(&mut out, &boundaries.related);
    push_line(&mut out, "Content-Type: image/gif");
    push_line(&mut out, "Content-Transfer-Encoding: base64");
    push_line(&mut out, &format!("Content-ID: <{INLINE_IMAGE_CID}>"));
    push_line(&mut out, "Content-Disposition: inline; filename=\"valentine.gif\"");
    out.push_str(CRLF);
    out.push_str(&wrap_base64(image));
    push_close_delimiter(&mut out, &boundaries.related);

    push_delimiter(&mut out, &boundaries.alternative);
    push_line(&mut out, "Content-Type: text/calendar; charset=\"UTF-8\"; method=REQUEST");
    push_line(&mut out, "Content-Transfer-Encoding: 7bit");
    push_line(&mut out, "Content-Class: urn:content-classes:calendarmessage");
    push_line(&mut out, "Content-Disposition: attachment; filename=\"invite.ics\"");
    out.push_str(CRLF);
    out.push_str(&invite);
    push_close_delimiter(&mut out, &boundaries.alternative);

    push_close_delimiter(&mut out, &boundaries.mixed);

    Ok(out)
}

/// Standard base64 with every line, including the last, at most 76 columns and
/// CRLF terminated.
pub fn wrap_base64(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let line_count = encoded.len().div_ceil(BASE64_LINE_WIDTH);
    let mut wrapped = String::with_capacity(encoded.len() + line_count * CRLF.len());

    // base64 output is ASCII, so any byte offset is a char boundary.
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(BASE64_LINE_WIDTH));
        wrapped.push_str(line);
        wrapped.push_str(CRLF);
        rest = tail;
    }
    wrapped
}

fn plain_body(config: &MessageConfig) -> String {
    [
        INTRO.to_string(),
        format!("Date: {}", config.date),
        String::new(),
        "Cute gif:".to_string(),
        config.gif_url.clone(),
    ]
    .join(CRLF)
}

fn html_body(config: &MessageConfig) -> String {
    [
        format!("<p>{INTRO}</p>"),
        format!("<p><strong>Date:</strong> {}</p>", config.date),
        format!("<p><img src=\"cid:{INLINE_IMAGE_CID}\" alt=\"Valentine gif\"></p>"),
    ]
    .join(CRLF)
}

fn multipart_header(subtype: &str, boundary: &str) -> String {
    format!("Content-Type: multipart/{subtype}; boundary=\"{boundary}\"")
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str(CRLF);
}

fn push_delimiter(out: &mut String, boundary: &str) {
    push_line(out, &format!("--{boundary}"));
}

fn push_close_delimiter(out: &mut String, boundary: &str) {
    push_line(out, &format!("--{boundary}--"));
}
