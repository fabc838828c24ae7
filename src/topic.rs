// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! MQTT topic filter validation and matching.
//!
//! Validation follows the rules Home Assistant applies to a configured subscribe topic, so that a
//! configuration accepted by the bridge would also be accepted by the host platform.

use crate::errors::ServiceError;

/// Max length of a topic in bytes, UTF-8 encoded.
const MAX_TOPIC_LEN: usize = 65535;

/// Validate a topic name or filter without checking wildcard placement.
pub fn valid_topic(topic: &str) -> Result<(), ServiceError> {
    if topic.is_empty() {
        return Err(ServiceError::BadRequest(
            "MQTT topic name/filter must not be empty".into(),
        ));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ServiceError::BadRequest(
            "MQTT topic name/filter must not be longer than 65535 encoded bytes".into(),
        ));
    }
    if topic.contains('\0') {
        return Err(ServiceError::BadRequest(
            "MQTT topic name/filter must not contain null character".into(),
        ));
    }
    if topic
        .chars()
        .any(|c| matches!(c, '\u{1}'..='\u{1f}' | '\u{7f}'..='\u{9f}'))
    {
        return Err(ServiceError::BadRequest(
            "MQTT topic name/filter must not contain control characters".into(),
        ));
    }
    if topic.chars().any(is_noncharacter) {
        return Err(ServiceError::BadRequest(
            "MQTT topic name/filter must not contain non-characters".into(),
        ));
    }
    Ok(())
}

/// Unicode non-character: U+FDD0..U+FDEF and the last two code points of every plane.
fn is_noncharacter(c: char) -> bool {
    let cp = c as u32;
    (0xFDD0..=0xFDEF).contains(&cp) || cp & 0xFFFE == 0xFFFE
}

/// Validate a subscribe topic filter.
///
/// Besides the generic [`valid_topic`] rules, the single-level wildcard `+` must occupy an entire
/// level and the multi-level wildcard `#` must occupy the last level.
pub fn valid_subscribe_topic(topic: &str) -> Result<(), ServiceError> {
    valid_topic(topic)?;

    let levels: Vec<&str> = topic.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            return Err(ServiceError::BadRequest(format!(
                "Single-level wildcard must occupy an entire level of the filter: {topic}"
            )));
        }
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(ServiceError::BadRequest(format!(
                "Multi-level wildcard must be the last character in the topic filter: {topic}"
            )));
        }
    }

    Ok(())
}

/// Check if a published topic name matches a subscription filter.
///
/// Topics starting with `$` are reserved and not matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("home-assistant/mqtt_example")]
    #[case("rtu/+/telemetry")]
    #[case("rtu/#")]
    #[case("#")]
    #[case("+")]
    #[case("/leading/slash")]
    #[case("sensor/température")]
    #[case("rtu/\u{fdf0}")]
    fn valid_subscribe_topics(#[case] topic: &str) {
        assert_eq!(Ok(()), valid_subscribe_topic(topic), "{topic}");
    }

    #[rstest]
    #[case("")]
    #[case("rtu/a+/telemetry")]
    #[case("rtu/#/telemetry")]
    #[case("rtu/tele#")]
    #[case("rtu\0null")]
    #[case("rtu/\u{7}bell")]
    #[case("rtu/\u{fdd0}")]
    #[case("rtu/\u{fffe}")]
    #[case("rtu/\u{1ffff}/telemetry")]
    fn invalid_subscribe_topics(#[case] topic: &str) {
        assert!(
            matches!(valid_subscribe_topic(topic), Err(ServiceError::BadRequest(_))),
            "Topic must be rejected: {topic:?}"
        );
    }

    #[test]
    fn too_long_topic_is_rejected() {
        let topic = "a".repeat(MAX_TOPIC_LEN + 1);
        assert!(valid_topic(&topic).is_err());
        assert!(valid_topic(&topic[1..]).is_ok());
    }

    #[rstest]
    #[case("home-assistant/mqtt_example", "home-assistant/mqtt_example", true)]
    #[case("home-assistant/mqtt_example", "home-assistant/other", false)]
    #[case("rtu/+/telemetry", "rtu/0/telemetry", true)]
    #[case("rtu/+/telemetry", "rtu/0/1/telemetry", false)]
    #[case("rtu/#", "rtu", true)]
    #[case("rtu/#", "rtu/0/telemetry", true)]
    #[case("rtu/+", "rtu", false)]
    #[case("#", "$SYS/broker/uptime", false)]
    #[case("$SYS/#", "$SYS/broker/uptime", true)]
    fn match_topic_against_filter(#[case] filter: &str, #[case] topic: &str, #[case] matches: bool) {
        assert_eq!(matches, topic_matches(filter, topic), "{filter} -> {topic}");
    }
}
