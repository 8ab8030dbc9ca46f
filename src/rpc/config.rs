use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::rpc::error::RpcError;
use crate::rpc::pending_calls::PendingCalls;
use crate::signaling::peer_id::Recipient;

/// The effective options of a single call, after merging all configuration layers.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcConfig {
    /// raises the call's log messages from `trace` to `info` level, on both sides
    pub debug: bool,
    /// in seconds, `0` (or any non-positive number) disables the timeout
    pub timeout: f64,
    pub to: Recipient,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            debug: false,
            timeout: 0.0,
            to: Recipient::All,
        }
    }
}

impl RpcConfig {
    /// Layers the given partial configurations over the built-in defaults, later layers
    ///  overriding earlier ones key by key.
    ///
    /// A non-finite timeout (infinity or NaN) has no wire representation, it is treated as 'no
    ///  timeout' and normalized to `0`.
    pub fn merged<'a>(layers: impl IntoIterator<Item = &'a PartialRpcConfig>) -> RpcConfig {
        let merged = merge(layers);
        let defaults = RpcConfig::default();
        RpcConfig {
            debug: merged.debug.unwrap_or(defaults.debug),
            timeout: merged.timeout
                .filter(|t| t.is_finite())
                .unwrap_or(defaults.timeout),
            to: merged.to.unwrap_or(defaults.to),
        }
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        if self.timeout > 0.0 {
            Duration::try_from_secs_f64(self.timeout).ok()
        }
        else {
            None
        }
    }
}

/// A configuration layer: `None` means 'inherit from the layer below'.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PartialRpcConfig {
    pub debug: Option<bool>,
    pub timeout: Option<f64>,
    pub to: Option<Recipient>,
}

impl PartialRpcConfig {
    pub fn new() -> PartialRpcConfig {
        Default::default()
    }

    pub fn with_debug(mut self, debug: bool) -> PartialRpcConfig {
        self.debug = Some(debug);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> PartialRpcConfig {
        self.with_timeout_secs(timeout.as_secs_f64())
    }

    pub fn with_timeout_secs(mut self, timeout: f64) -> PartialRpcConfig {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_to(mut self, to: impl Into<Recipient>) -> PartialRpcConfig {
        self.to = Some(to.into());
        self
    }

    /// Returns a new layer with `other`'s values overriding this layer's; neither input is
    ///  modified.
    pub fn overlay(&self, other: &PartialRpcConfig) -> PartialRpcConfig {
        PartialRpcConfig {
            debug: other.debug.or(self.debug),
            timeout: other.timeout.or(self.timeout),
            to: other.to.clone().or_else(|| self.to.clone()),
        }
    }

    /// Parses a configuration object with the keys `debug`, `timeout` and `to`. Unknown keys are
    ///  ignored, and so are `null` values.
    pub fn from_json(value: &Value) -> Result<PartialRpcConfig, RpcError> {
        if !value.is_object() {
            return Err(RpcError::InvalidCallArguments(format!("configuration must be an object, was {}", value)));
        }
        PartialRpcConfig::deserialize(value)
            .map_err(|e| RpcError::InvalidCallArguments(format!("invalid configuration object: {}", e)))
    }
}

pub fn merge<'a>(layers: impl IntoIterator<Item = &'a PartialRpcConfig>) -> PartialRpcConfig {
    layers.into_iter()
        .fold(PartialRpcConfig::default(), |union, layer| union.overlay(layer))
}


/// Endpoint-wide settings that are fixed for the endpoint's lifetime, as opposed to the
///  per-call options in [RpcConfig].
#[derive(Debug, Clone)]
pub struct RpcEndpointConfig {
    /// the type tag of RPC signals on the channel - other signal types are ignored
    pub signal_type: String,
    /// encoded calls exceeding this size are rejected without being sent, oversized responses are
    ///  replaced by an error response
    pub max_signal_size: usize,
    pub fault_channel_capacity: usize,
    /// the number of resolved calls that are remembered for recognizing late or duplicate
    ///  responses, see [crate::rpc::pending_calls::PendingCalls]
    pub done_call_retention: usize,
    /// the initial endpoint-level configuration layer, see [crate::rpc::endpoint::RpcEndpoint::configure]
    pub call_defaults: PartialRpcConfig,
}

impl Default for RpcEndpointConfig {
    fn default() -> Self {
        RpcEndpointConfig::new()
    }
}

impl RpcEndpointConfig {
    pub const DEFAULT_SIGNAL_TYPE: &'static str = "rpc";

    pub fn new() -> RpcEndpointConfig {
        RpcEndpointConfig {
            signal_type: Self::DEFAULT_SIGNAL_TYPE.to_string(),
            max_signal_size: 8192,
            fault_channel_capacity: 128,
            done_call_retention: PendingCalls::DEFAULT_DONE_RETENTION,
            call_defaults: PartialRpcConfig::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(RpcConfig::merged(&Vec::<PartialRpcConfig>::new()), RpcConfig {
            debug: false,
            timeout: 0.0,
            to: Recipient::All,
        });
    }

    #[test]
    fn test_call_level_wins_and_unspecified_keys_inherit() {
        let endpoint = PartialRpcConfig::new().with_timeout_secs(2.0).with_debug(true);
        let call = PartialRpcConfig::new().with_timeout_secs(5.0);

        let config = RpcConfig::merged([&endpoint, &call]);
        assert_eq!(config, RpcConfig {
            debug: true,
            timeout: 5.0,
            to: Recipient::All,
        });
    }

    #[test]
    fn test_overlay_does_not_modify_inputs() {
        let a = PartialRpcConfig::new().with_to("x");
        let b = PartialRpcConfig::new().with_to("y").with_debug(true);
        let merged = a.overlay(&b);

        assert_eq!(merged, PartialRpcConfig::new().with_to("y").with_debug(true));
        assert_eq!(a, PartialRpcConfig::new().with_to("x"));
        assert_eq!(b, PartialRpcConfig::new().with_to("y").with_debug(true));
    }

    #[test]
    fn test_merge_many_layers() {
        let layers = [
            PartialRpcConfig::new().with_debug(true),
            PartialRpcConfig::new().with_to("p1").with_timeout_secs(1.0),
            PartialRpcConfig::new(),
            PartialRpcConfig::new().with_to("p2"),
        ];
        assert_eq!(RpcConfig::merged(&layers), RpcConfig {
            debug: true,
            timeout: 1.0,
            to: Recipient::from("p2"),
        });
    }

    #[rstest]
    #[case::infinite(f64::INFINITY)]
    #[case::negative_infinite(f64::NEG_INFINITY)]
    #[case::nan(f64::NAN)]
    fn test_non_finite_timeout_means_no_timeout(#[case] timeout: f64) {
        let endpoint = PartialRpcConfig::new().with_timeout_secs(2.0);
        let call = PartialRpcConfig::new().with_timeout_secs(timeout);

        let config = RpcConfig::merged([&endpoint, &call]);
        assert_eq!(config.timeout, 0.0);
        assert_eq!(config.timeout_duration(), None);
    }

    #[rstest]
    #[case::zero(0.0, None)]
    #[case::negative(-1.0, None)]
    #[case::nan(f64::NAN, None)]
    #[case::millis(0.25, Some(Duration::from_millis(250)))]
    #[case::seconds(5.0, Some(Duration::from_secs(5)))]
    fn test_timeout_duration(#[case] timeout: f64, #[case] expected: Option<Duration>) {
        let config = RpcConfig { timeout, ..Default::default() };
        assert_eq!(config.timeout_duration(), expected);
    }

    #[rstest]
    #[case::empty(json!({}), Some(PartialRpcConfig::new()))]
    #[case::all_keys(json!({"debug": true, "timeout": 2.5, "to": "all"}), Some(PartialRpcConfig::new().with_debug(true).with_timeout_secs(2.5).with_to(Recipient::All)))]
    #[case::peer(json!({"to": "abc"}), Some(PartialRpcConfig::new().with_to("abc")))]
    #[case::unknown_keys_ignored(json!({"foo": 1, "timeout": 3}), Some(PartialRpcConfig::new().with_timeout_secs(3.0)))]
    #[case::null_is_inherit(json!({"debug": null}), Some(PartialRpcConfig::new()))]
    #[case::wrong_type(json!({"timeout": "soon"}), None)]
    #[case::not_an_object(json!([1, 2]), None)]
    fn test_from_json(#[case] value: Value, #[case] expected: Option<PartialRpcConfig>) {
        match PartialRpcConfig::from_json(&value) {
            Ok(actual) => assert_eq!(actual, expected.unwrap()),
            Err(e) => {
                assert!(matches!(e, RpcError::InvalidCallArguments(_)));
                assert!(expected.is_none());
            }
        }
    }
}
