// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

pub mod sim;

pub use sim::{SimTone, SimTuner, SimVfo, StaticFrequencyManager};
