pub mod series;
pub mod entry;
pub mod overheat;
pub mod reversal;
pub mod sell;

pub use entry::{EntryScore, ScoreComponent};
pub use overheat::OverheatReport;
pub use reversal::ReversalReport;
pub use sell::SellSignalReport;
