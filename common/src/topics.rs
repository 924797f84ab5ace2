pub const TOPIC_STATUS: &str = "greenhouse/status";
pub const TOPIC_SENSORS_STATE: &str = "greenhouse/sensors/state";

pub const TOPIC_RELAY_STATE_PREFIX: &str = "greenhouse/relay/";
pub const TOPIC_CMD_RELAY_PREFIX: &str = "greenhouse/cmnd/relay/";
pub const TOPIC_CMD_RELAY_FILTER: &str = "greenhouse/cmnd/relay/+";

pub fn relay_state_topic(channel: usize) -> String {
    format!("{TOPIC_RELAY_STATE_PREFIX}{channel}/state")
}

/// Channel index addressed by a relay command topic.
pub fn relay_command_channel(topic: &str) -> Option<usize> {
    topic
        .strip_prefix(TOPIC_CMD_RELAY_PREFIX)
        .and_then(|rest| rest.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_topics() {
        assert_eq!(relay_state_topic(1), "greenhouse/relay/1/state");
        assert_eq!(relay_command_channel("greenhouse/cmnd/relay/3"), Some(3));
        assert_eq!(relay_command_channel("greenhouse/cmnd/relay/x"), None);
        assert_eq!(relay_command_channel("greenhouse/relay/3/state"), None);
    }
}
