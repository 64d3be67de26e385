//! Route and connection value types.

use crate::error::{SwitchError, SwitchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered channel sequence realized by closing one relay per hop.
///
/// The textual form lists hops: `"CH1->CH2, CH2->CH3"`.
///
/// ```rust
/// use rust_ivi::switch::Path;
///
/// let path: Path = "CH1->CH2, CH2->CH3".parse().unwrap();
/// assert_eq!(path.channels(), ["CH1", "CH2", "CH3"]);
/// assert_eq!(path.to_string(), "CH1->CH2, CH2->CH3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(Vec<String>);

impl Path {
    /// Wrap a channel sequence without validation.
    pub fn new<S: Into<String>>(channels: impl IntoIterator<Item = S>) -> Self {
        Self(channels.into_iter().map(Into::into).collect())
    }

    /// Channels in traversal order.
    pub fn channels(&self) -> &[String] {
        &self.0
    }

    /// Number of relays along the path.
    pub fn hop_count(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Consecutive channel pairs.
    pub fn hops(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.windows(2).map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }

    /// First channel.
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Last channel.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Whether `channel` lies anywhere on the path.
    pub fn contains(&self, channel: &str) -> bool {
        self.0.iter().any(|c| c == channel)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hops: Vec<String> = self.hops().map(|(a, b)| format!("{a}->{b}")).collect();
        write!(f, "{}", hops.join(", "))
    }
}

impl FromStr for Path {
    type Err = SwitchError;

    fn from_str(s: &str) -> SwitchResult<Self> {
        let mut channels: Vec<String> = Vec::new();
        for hop in s.split(',').map(str::trim).filter(|hop| !hop.is_empty()) {
            let (from, to) = hop.split_once("->").ok_or_else(|| SwitchError::InvalidPath {
                reason: format!("hop '{hop}' is not of the form A->B"),
            })?;
            let (from, to) = (from.trim(), to.trim());
            if from.is_empty() || to.is_empty() {
                return Err(SwitchError::InvalidPath {
                    reason: format!("hop '{hop}' has an empty channel"),
                });
            }
            match channels.last() {
                None => channels.push(from.to_string()),
                Some(last) if last == from => {}
                Some(last) => {
                    return Err(SwitchError::InvalidPath {
                        reason: format!("hop '{hop}' does not continue from '{last}'"),
                    })
                }
            }
            channels.push(to.to_string());
        }
        if channels.is_empty() {
            return Err(SwitchError::InvalidPath {
                reason: "path is empty".into(),
            });
        }
        Ok(Path(channels))
    }
}

/// A live routing between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    /// Endpoint names, in the order the caller gave them.
    pub endpoints: (String, String),
    /// Route realizing the connection.
    pub path: Path,
    /// `true` for caller-requested connections, `false` for a pair that is
    /// only joined as a sub-segment of another connection's path.
    pub explicit: bool,
}

impl Connection {
    /// Whether the connection joins `a` and `b` in either order.
    pub fn joins(&self, a: &str, b: &str) -> bool {
        let (x, y) = (&self.endpoints.0, &self.endpoints.1);
        (x == a && y == b) || (x == b && y == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_hop() {
        let path: Path = "CH1->CH2".parse().unwrap();
        assert_eq!(path.channels(), ["CH1", "CH2"]);
        assert_eq!(path.hop_count(), 1);
    }

    #[test]
    fn rejects_discontinuous_hops() {
        let err = "CH1->CH2, CH3->CH4".parse::<Path>().unwrap_err();
        assert!(matches!(err, SwitchError::InvalidPath { .. }));
        assert!("CH1-CH2".parse::<Path>().is_err());
        assert!("".parse::<Path>().is_err());
        assert!("CH1->".parse::<Path>().is_err());
    }

    #[test]
    fn connection_endpoints_are_unordered() {
        let connection = Connection {
            endpoints: ("CH1".into(), "CH3".into()),
            path: Path::new(["CH1", "CH2", "CH3"]),
            explicit: true,
        };
        assert!(connection.joins("CH3", "CH1"));
        assert!(!connection.joins("CH1", "CH2"));
        assert!(connection.path.contains("CH2"));
    }
}
