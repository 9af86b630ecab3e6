//! Defines [Window]s which perform operations on subintervals of a waveform.
//!
//! # Example
//!
//! The following example smooths the amplitudes of a shot with a centred window of length ten.
//! ```rust
//!     let smoothed = rows
//!        .iter()
//!        .map(|sample| sample.amplitude)
//!        .window(CenteredMean::new(10, 3))
//!        .collect::<Vec<Option<Real>>>();
//! ```
mod centered_mean;

pub(crate) use centered_mean::CenteredMean;

/// Consumes values from a waveform, and outputs a waveform after processing.
pub(crate) trait Window: Clone {
    type InputType: Copy;
    type OutputType;

    /// Pushes a value into the window, returns true if an output is available.
    fn push(&mut self, value: Self::InputType) -> bool;

    /// Advances the window past the end of the data once the source is exhausted.
    /// Returns true if an output is available.
    fn drain(&mut self) -> bool;

    /// Extracts the window's current processed value.
    fn output(&self) -> Self::OutputType;
}
