mod running;
mod snapshot;
mod stats;

pub use running::RunningStats;
pub use snapshot::{CustomStatReport, DistributionReport, Report, RpsReport, StatsSnapshot};
pub use stats::SessionStats;
