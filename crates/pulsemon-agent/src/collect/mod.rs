pub mod host;
pub mod runtime;

use anyhow::Result;
use pulsemon_common::model::Metric;

/// A metric source driven on the poll cadence. Samplers keep their
/// `sysinfo::System` between ticks so CPU utilisation has a previous
/// measurement to diff against.
pub trait Sampler: Send {
    fn name(&self) -> &str;
    fn sample(&mut self) -> Result<Vec<Metric>>;
}
