use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Gauge => write!(f, "gauge"),
            MetricType::Counter => write!(f, "counter"),
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricType::Gauge),
            "counter" => Ok(MetricType::Counter),
            _ => Err(MetricError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("invalid metric type")]
    InvalidType,
    #[error("invalid metric name")]
    InvalidName,
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("delta required for counter")]
    MissingDelta,
    #[error("value required for gauge")]
    MissingValue,
}

/// A single metric. `value` is set iff the type is gauge, `delta` iff counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: MetricType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricType::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricType::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Builds a metric from the textual `{type}/{name}/{value}` URL form.
    ///
    /// Counter values must be integral: `1.2` is rejected even though it
    /// parses as a float.
    pub fn from_url_parts(mtype: &str, name: &str, raw: &str) -> Result<Self, MetricError> {
        let mtype: MetricType = mtype.parse()?;
        if name.is_empty() {
            return Err(MetricError::InvalidName);
        }
        let parsed: f64 = raw
            .parse()
            .map_err(|_| MetricError::InvalidValue(raw.to_string()))?;
        match mtype {
            MetricType::Gauge => Ok(Metric::gauge(name, parsed)),
            MetricType::Counter => {
                if parsed != (parsed as i64) as f64 {
                    return Err(MetricError::InvalidValue(raw.to_string()));
                }
                Ok(Metric::counter(name, parsed as i64))
            }
        }
    }

    /// Checks the gauge/counter field invariants on a decoded metric.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::InvalidName);
        }
        match self.mtype {
            MetricType::Gauge if self.value.is_none() => Err(MetricError::MissingValue),
            MetricType::Counter if self.delta.is_none() => Err(MetricError::MissingDelta),
            _ => Ok(()),
        }
    }
}
