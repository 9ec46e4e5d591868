//! Fail-fast validation of a service definition.
//!
//! Validation is a pure pass. It runs before compilation and before any
//! network call, and the first violation aborts the pipeline.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{CompileResult, ConfigError};
use crate::iam::IamBinding;
use crate::service::{FunctionSpec, ServiceDefinition};
use crate::trigger::{EventSubscription, EventTrigger, SUPPORTED_EVENTS};

static VPC_CONNECTOR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^projects/[^/]+/locations/[^/]+/connectors/[^/]+$").ok()
});

/// Validates service and function declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the whole definition and decide the trigger of every function.
    ///
    /// Triggers are returned in function-name order.
    pub fn validate_service(
        &self,
        definition: &ServiceDefinition,
    ) -> CompileResult<Vec<(String, EventTrigger)>> {
        self.validate_service_name(&definition.service)?;
        IamBinding::parse_all("provider", &definition.provider.iam.bindings)?;
        if let Some(connector) = &definition.provider.vpc {
            validate_vpc_connector("provider", connector)?;
        }

        definition
            .functions
            .iter()
            .map(|(name, spec)| Ok((name.clone(), self.validate(name, spec)?)))
            .collect()
    }

    /// Check the service name rules.
    pub fn validate_service_name(&self, name: &str) -> CompileResult<()> {
        if name.contains("goog") {
            return Err(ConfigError::InvalidServiceName {
                name: name.to_owned(),
                reason: "must not contain the string \"goog\"",
            });
        }
        if name.contains('_') {
            return Err(ConfigError::InvalidServiceName {
                name: name.to_owned(),
                reason: "must not include underscores",
            });
        }
        Ok(())
    }

    /// Validate one function and return its trigger.
    pub fn validate(&self, name: &str, spec: &FunctionSpec) -> CompileResult<EventTrigger> {
        if spec.handler.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingHandler {
                function: name.to_owned(),
            });
        }

        let trigger = match spec.events.as_deref() {
            None | Some([]) => {
                return Err(ConfigError::MissingEvents {
                    function: name.to_owned(),
                })
            }
            Some([event]) => parse_trigger(name, event)?,
            Some(events) => {
                return Err(ConfigError::TooManyEvents {
                    function: name.to_owned(),
                    count: events.len(),
                })
            }
        };

        if let Some(connector) = &spec.vpc {
            validate_vpc_connector(name, connector)?;
        }

        IamBinding::parse_all(&format!("function \"{name}\""), &spec.iam.bindings)?;

        Ok(trigger)
    }
}

fn parse_trigger(function: &str, event: &Map<String, Value>) -> CompileResult<EventTrigger> {
    let mut keys = event.iter();
    let (key, body) = match (keys.next(), keys.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(ConfigError::InvalidEvent {
                function: function.to_owned(),
                event: event.keys().cloned().collect::<Vec<_>>().join(","),
                reason: "an event entry must have exactly one trigger key".to_owned(),
            })
        }
    };

    match key.as_str() {
        EventTrigger::HTTP_KEY => match body {
            Value::String(url) => Ok(EventTrigger::Http { url: url.clone() }),
            _ => Err(ConfigError::InvalidEvent {
                function: function.to_owned(),
                event: key.clone(),
                reason: "expected the trigger URL as a string".to_owned(),
            }),
        },
        EventTrigger::EVENT_KEY => serde_json::from_value::<EventSubscription>(body.clone())
            .map(EventTrigger::Event)
            .map_err(|e| ConfigError::InvalidEvent {
                function: function.to_owned(),
                event: key.clone(),
                reason: e.to_string(),
            }),
        _ => Err(ConfigError::UnsupportedEvent {
            function: function.to_owned(),
            event: key.clone(),
            supported: SUPPORTED_EVENTS,
        }),
    }
}

fn validate_vpc_connector(function: &str, connector: &str) -> CompileResult<()> {
    // Bare names are the short form and are accepted untouched.
    let qualified = VPC_CONNECTOR
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(connector));
    if connector.contains('/') && !qualified {
        return Err(ConfigError::InvalidVpcConnector {
            function: function.to_owned(),
            connector: connector.to_owned(),
        });
    }
    Ok(())
}
