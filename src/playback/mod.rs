pub mod output;
pub mod primitive;
pub mod progress;
pub mod sequencer;
