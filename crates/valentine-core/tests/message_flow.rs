use chrono::{TimeZone, Utc};
use valentine_core::{
    EmbeddedImage, MessageBuildError, MessageBuilder, MessageConfig, build_message,
};

const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

fn valentine_config() -> MessageConfig {
    MessageConfig {
        sender: "sender@example.com".into(),
        recipients: vec!["r@example.com".into()],
        subject: "Valentine Date".into(),
        date: "March 14, 2026".into(),
        gif_url: "https://example.com/gif".into(),
        event_title: "Valentine Date".into(),
        event_description: "Can't wait".into(),
        event_date: "2026-03-14".into(),
        all_day: true,
        time_zone: "Asia/Kuala_Lumpur".into(),
    }
}

#[test]
fn builds_valentine_invite_end_to_end() {
    let now = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
    let builder = MessageBuilder::new(EmbeddedImage::new(GIF).expect("image"));

    let raw = builder
        .build(&valentine_config(), now, "test-uid")
        .expect("message builds");

    assert!(raw.contains("DTSTART;VALUE=DATE:20260314"));
    assert!(raw.contains("DTEND;VALUE=DATE:20260315"));
    assert!(raw.contains("DTSTAMP:20260215T000000Z"));
    assert!(raw.contains("UID:test-uid"));
    assert!(raw.contains("DESCRIPTION:Can't wait"));
    assert!(raw.contains("ATTENDEE;CN=r@example.com;"));
    assert_eq!(raw.matches("Content-Type: text/calendar").count(), 1);
    assert_eq!(raw.matches("Content-Type: image/gif").count(), 1);
    assert!(raw.contains("R0lGODlhAQABAAAAADs=\r\n"));

    let again = builder
        .build(&valentine_config(), now, "test-uid")
        .expect("message builds");
    assert_eq!(raw, again);
}

#[test]
fn rejects_empty_image_and_invalid_date() {
    let now = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();

    let err = build_message(&valentine_config(), &[], now, "uid").expect_err("empty image");
    assert!(matches!(err, MessageBuildError::EmptyImage));

    let mut config = valentine_config();
    config.event_date = "2026-13-99".into();
    let err = build_message(&config, GIF, now, "uid").expect_err("invalid date");
    assert!(matches!(err, MessageBuildError::InvalidDate { .. }));
    assert!(err.to_string().contains("2026-13-99"));
}
