//! Function triggers.

use serde::{Deserialize, Serialize};

/// Trigger keys accepted in a function's `events` list.
pub const SUPPORTED_EVENTS: &[&str] = &[EventTrigger::HTTP_KEY, EventTrigger::EVENT_KEY];

/// The single trigger of a function, decided once during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTrigger {
    /// Direct HTTPS invocation.
    Http {
        /// Declared trigger URL.
        url: String,
    },
    /// Event-bus subscription.
    Event(EventSubscription),
}

impl EventTrigger {
    /// Key of the HTTP trigger in the service definition.
    pub const HTTP_KEY: &'static str = "http";
    /// Key of the event trigger in the service definition.
    pub const EVENT_KEY: &'static str = "event";

    /// Whether this is an HTTP trigger.
    #[must_use]
    pub const fn is_http(&self) -> bool {
        matches!(self, Self::Http { .. })
    }

    /// Key this trigger was declared under.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Http { .. } => Self::HTTP_KEY,
            Self::Event(_) => Self::EVENT_KEY,
        }
    }
}

/// An event subscription as declared under the `event` key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscription {
    /// Event type, e.g. `providers/cloud.pubsub/eventTypes/topic.publish`.
    pub event_type: String,
    /// Resource the subscription listens on.
    pub resource: String,
    /// Optional sub-path within the resource.
    #[serde(default)]
    pub path: Option<String>,
    /// Failure policy.
    #[serde(default)]
    pub failure_policy: Option<FailurePolicySpec>,
}

impl EventSubscription {
    /// Whether failed invocations should be retried.
    #[must_use]
    pub fn retry(&self) -> bool {
        self.failure_policy
            .as_ref()
            .is_some_and(FailurePolicySpec::retries)
    }
}

/// Declared failure policy. `retry = {}` and `retry = true` both enable retries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FailurePolicySpec {
    /// Retry marker.
    #[serde(default)]
    pub retry: Option<serde_json::Value>,
}

impl FailurePolicySpec {
    fn retries(&self) -> bool {
        match &self.retry {
            None | Some(serde_json::Value::Null | serde_json::Value::Bool(false)) => false,
            Some(_) => true,
        }
    }
}

/// `httpsTrigger` block of a compiled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpsTriggerBlock {
    /// Trigger URL.
    pub url: String,
}

/// `eventTrigger` block of a compiled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTriggerBlock {
    /// Event type.
    pub event_type: String,
    /// Optional sub-path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Watched resource.
    pub resource: String,
    /// Retry policy, present only when retries were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicyBlock>,
}

/// `failurePolicy` block; `retry` is an empty marker object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailurePolicyBlock {
    /// Empty retry marker.
    pub retry: RetryMarker,
}

/// Serialises as `{}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryMarker {}

impl From<&EventSubscription> for EventTriggerBlock {
    fn from(sub: &EventSubscription) -> Self {
        Self {
            event_type: sub.event_type.clone(),
            path: sub.path.clone(),
            resource: sub.resource.clone(),
            failure_policy: sub.retry().then_some(FailurePolicyBlock {
                retry: RetryMarker {},
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription(value: serde_json::Value) -> EventSubscription {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn retry_marker_variants() {
        let none = subscription(json!({"eventType": "t", "resource": "r"}));
        assert!(!none.retry());

        let empty = subscription(json!({
            "eventType": "t", "resource": "r", "failurePolicy": {"retry": {}}
        }));
        assert!(empty.retry());

        let yes = subscription(json!({
            "eventType": "t", "resource": "r", "failurePolicy": {"retry": true}
        }));
        assert!(yes.retry());

        let no = subscription(json!({
            "eventType": "t", "resource": "r", "failurePolicy": {"retry": false}
        }));
        assert!(!no.retry());
    }

    #[test]
    fn event_block_serialisation() {
        let sub = subscription(json!({
            "eventType": "providers/cloud.pubsub/eventTypes/topic.publish",
            "resource": "projects/p/topics/t",
            "failurePolicy": {"retry": {}}
        }));

        let block = EventTriggerBlock::from(&sub);
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({
                "eventType": "providers/cloud.pubsub/eventTypes/topic.publish",
                "resource": "projects/p/topics/t",
                "failurePolicy": {"retry": {}}
            })
        );
    }

    #[test]
    fn trigger_keys() {
        let http = EventTrigger::Http {
            url: "foo".to_owned(),
        };
        assert!(http.is_http());
        assert_eq!(http.key(), "http");
        assert_eq!(SUPPORTED_EVENTS, &["http", "event"]);
    }
}
