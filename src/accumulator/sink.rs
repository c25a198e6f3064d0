use crate::datamodel::DataPoints;

/// Downstream consumer of flushed aggregates.
pub trait DataPointSink: Send + Sync {
    fn accept(&self, points: DataPoints) -> anyhow::Result<()>;
}

impl<F> DataPointSink for F
where
    F: Fn(DataPoints) -> anyhow::Result<()> + Send + Sync,
{
    fn accept(&self, points: DataPoints) -> anyhow::Result<()> {
        self(points)
    }
}
