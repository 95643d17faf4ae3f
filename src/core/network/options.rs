use serde_json::Value;

use super::endpoint::IF_PREFIX;
use crate::core::{
    error::{DriverError, DriverResult},
    msg::{CreateNetworkRequest, IpamData, GENERIC_OPTIONS},
};

/// Generic option naming the switch, e.g. `-o sock=vde:///tmp/myswitch`.
pub const OPT_SOCK: &str = "sock";
/// Generic option overriding the in-container interface prefix.
pub const OPT_IF_PREFIX: &str = "if";

/// Longest accepted prefix; the orchestrator appends an index to it.
const MAX_IF_PREFIX_LEN: usize = 12;

/// Validated CreateNetwork input.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkOptions {
    pub sock: String,
    pub if_prefix: String,
    pub ipv4: IpamData,
    pub ipv6: Option<IpamData>,
}

impl NetworkOptions {
    pub fn parse(req: &CreateNetworkRequest) -> DriverResult<Self> {
        if req.network_id.is_empty() {
            return Err(DriverError::bad_request("NetworkID missing"));
        }

        let ipv4 = req
            .ipv4_data
            .as_ref()
            .and_then(|data| data.first())
            .filter(|data| !data.pool.is_empty())
            .ok_or(DriverError::bad_request("Network IPv4Data config missing"))?
            .clone();

        let ipv6 = req
            .ipv6_data
            .as_ref()
            .and_then(|data| data.first())
            .cloned();

        let generic = match req.options.as_ref().and_then(|opts| opts.get(GENERIC_OPTIONS)) {
            None | Some(Value::Null) => None,
            Some(Value::Object(generic)) => Some(generic),
            Some(other) => {
                return Err(DriverError::bad_request(format!(
                    "Malformed {GENERIC_OPTIONS} options: {other}"
                )))
            }
        };

        let sock = string_option(generic, OPT_SOCK)?
            .ok_or(DriverError::bad_request("Switch socket option `sock` missing"))?;

        let if_prefix = match string_option(generic, OPT_IF_PREFIX)? {
            Some(prefix) => {
                validate_if_prefix(&prefix)?;
                prefix
            }
            None => IF_PREFIX.to_string(),
        };

        Ok(NetworkOptions {
            sock,
            if_prefix,
            ipv4,
            ipv6,
        })
    }
}

/// Non-empty string option `key`; absent and empty are the same thing.
fn string_option(
    generic: Option<&serde_json::Map<String, Value>>,
    key: &str,
) -> DriverResult<Option<String>> {
    match generic.and_then(|generic| generic.get(key)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DriverError::bad_request(format!(
            "Option `{key}` must be a string, got {other}"
        ))),
    }
}

fn validate_if_prefix(prefix: &str) -> DriverResult<()> {
    if prefix.len() > MAX_IF_PREFIX_LEN {
        return Err(DriverError::bad_request(format!(
            "Interface prefix {prefix} longer than {MAX_IF_PREFIX_LEN} bytes"
        )));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(DriverError::bad_request(format!(
            "Interface prefix {prefix} contains invalid characters"
        )));
    }

    Ok(())
}
