//! Property tests for MQTT topic filter matching

use mqttlink::transport::mqtt::MessageHandler;
use proptest::prelude::*;

fn level() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,8}"
}

fn topic() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(level(), 1..6)
}

proptest! {
    #[test]
    fn test_topic_matches_itself(levels in topic()) {
        let topic = levels.join("/");
        prop_assert!(MessageHandler::topic_matches(&topic, &topic));
    }

    #[test]
    fn test_hash_matches_everything(levels in topic()) {
        prop_assert!(MessageHandler::topic_matches("#", &levels.join("/")));
    }

    #[test]
    fn test_prefix_hash_matches_descendants(prefix in topic(), suffix in topic()) {
        let filter = format!("{}/#", prefix.join("/"));
        let topic = format!("{}/{}", prefix.join("/"), suffix.join("/"));
        prop_assert!(MessageHandler::topic_matches(&filter, &topic));
        prop_assert!(MessageHandler::topic_matches(&filter, &prefix.join("/")));
    }

    #[test]
    fn test_plus_replaces_exactly_one_level(levels in topic(), index in any::<prop::sample::Index>()) {
        let i = index.index(levels.len());
        let mut filter_levels = levels.clone();
        filter_levels[i] = "+".to_string();
        let filter = filter_levels.join("/");

        prop_assert!(MessageHandler::topic_matches(&filter, &levels.join("/")));

        let longer = format!("{}/extra", levels.join("/"));
        prop_assert!(!MessageHandler::topic_matches(&filter, &longer));
    }

    #[test]
    fn test_different_level_count_never_matches_exact(levels in topic()) {
        let topic = levels.join("/");
        let longer = format!("{topic}/tail");
        prop_assert!(!MessageHandler::topic_matches(&topic, &longer));
        prop_assert!(!MessageHandler::topic_matches(&longer, &topic));
    }
}
