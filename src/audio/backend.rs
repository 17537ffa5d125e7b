//! Seam between the streaming core and the platform audio backend.
//!
//! The concrete backend owns the hardware device; this crate only gives
//! it an update hook and a pull entrypoint. During a layer update the
//! backend receives a `LayerStream` borrowing the layer, through which it
//! drains converted audio in its own device format.

use crate::audio::{
    format::AudioFormat,
    layer::{AudioLayer, StreamState},
};

/// Implemented by the platform backend that pulls audio from a layer.
pub trait AudioBackend: Send {
    /// Called once per layer update tick. The backend decides how much
    /// data to pull through `stream`, if any.
    fn update(&mut self, stream: &mut LayerStream<'_>);
}

/// Pull handle the backend receives during an update tick.
pub struct LayerStream<'a> {
    pub(crate) layer: &'a AudioLayer,
    pub(crate) stream: &'a mut StreamState,
}

impl LayerStream<'_> {
    /// The format the layer is currently streaming in.
    #[must_use]
    pub fn streaming_format(&self) -> AudioFormat {
        self.stream.streaming_format
    }

    /// Pulls up to `frames_requested` frames of converted audio in
    /// `format` into `buffer`. Returns how many frames were written.
    ///
    /// Passing a different `format` than the current streaming format
    /// switches the layer over to it, discarding buffered data.
    pub fn get_data(
        &mut self,
        format: AudioFormat,
        frames_requested: usize,
        buffer: &mut [u8],
    ) -> usize {
        self.layer
            .backend_get_data_locked(self.stream, format, frames_requested, buffer)
    }
}
