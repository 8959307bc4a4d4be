pub mod location_processor;
pub mod sequencer;

pub use sequencer::ReportSequencer;
