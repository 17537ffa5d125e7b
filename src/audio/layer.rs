//! Pull-based streaming layer over a mutable playlist.
//!
//! An `AudioLayer` turns its playlist into a continuous byte stream: each
//! update tick it resolves the current and next track, converts frames
//! into pooled blocks ahead of time, and applies the active volume
//! envelopes. The platform backend drains those blocks through
//! `backend_get_data`, falling back to synchronous generation when the
//! queue runs dry.
//!
//! Nothing on this path throws. Configuration faults are logged and
//! truncated, starvation and dropped blocks are counted, and the layer
//! re-derives its state every cycle, so the worst user-visible failure is
//! an audible glitch.

use std::{collections::VecDeque, sync::Arc};

use {
    async_channel::{Receiver, Sender, unbounded},
    parking_lot::Mutex,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    audio::{
        backend::{AudioBackend, LayerStream},
        block::{BlockPool, DataBlock},
        converter::resample_quality,
        envelope::{CrossFadeModulation, VolumeModulation, volume_to_multiplier},
        format::AudioFormat,
        pcm,
        track::{AudioAsset, AudioTrack},
    },
    config::settings::AudioSettings,
};

/// Playback status of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    /// Nothing queued, or the playlist drained.
    NotPlaying,
    /// Actively producing audio.
    Playing,
    /// Suspended; the playlist is kept.
    Paused,
}

/// Notifications a layer emits as playback progresses.
#[derive(Debug, Clone)]
pub enum LayerEvent {
    /// The current track changed. `to` is `None` when the playlist drained.
    TrackChanged {
        from: Option<Arc<AudioAsset>>,
        to: Option<Arc<AudioAsset>>,
    },
    /// The current track looped back to its start.
    TrackLooped(Arc<AudioAsset>),
    /// The layer's playback status changed.
    StatusChanged {
        from: PlaybackStatus,
        to: PlaybackStatus,
    },
}

/// Counters for conditions that resolve themselves but are worth watching.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerMetrics {
    /// Frames generated synchronously because no ready block was left.
    pub starved_frames: u64,
    /// Buffered frames dropped because the backend drained too slowly.
    pub backend_missed_frames: u64,
}

/// Control-plane state, mutated by API calls from any thread.
struct ControlState {
    playlist: Vec<Arc<AudioTrack>>,
    status: PlaybackStatus,
    looping: bool,
    volume_modifier: f32,
    /// Current/next derivation is stale and must be recomputed in the
    /// update path.
    refresh_needed: bool,
    trigger_cross_fade: bool,
    trigger_fade_stop: bool,
    trigger_duration: f32,
}

/// A pending fade-to-silence covering the playlist as it was when armed.
struct FadeStop {
    envelope: VolumeModulation,
    snapshot: Vec<Arc<AudioTrack>>,
}

/// Stream-plane state, touched only by the update tick and the backend
/// pull. Guarded as one unit so producer and consumer may run on
/// different threads.
pub(crate) struct StreamState {
    current: Option<Arc<AudioTrack>>,
    next: Option<Arc<AudioTrack>>,
    /// Progress into the current track, in destination-format samples.
    play_head: usize,
    /// Total samples of the current track in the streaming format.
    total_samples: usize,
    loop_count: u32,
    pub(crate) streaming_format: AudioFormat,
    scratch: Vec<f32>,
    cross_fade_scratch: Vec<f32>,
    ready_blocks: VecDeque<DataBlock>,
    fade_in_env: Option<VolumeModulation>,
    fade_out_env: Option<VolumeModulation>,
    user_env: Option<VolumeModulation>,
    cross_fade: Option<CrossFadeModulation>,
    fade_stop: Option<FadeStop>,
    metrics: LayerMetrics,
}

const INITIAL_SCRATCH_SIZE: usize = 4000;

/// A named playback channel: playlist in, continuous byte stream out.
pub struct AudioLayer {
    name: String,
    pool: BlockPool,
    /// Largest amount of time one non-exact update may buffer, in ms.
    max_update_ms: u32,
    /// Granularity at which volume envelopes are evaluated, in seconds.
    volume_interval_secs: f32,
    control: Mutex<ControlState>,
    stream: Mutex<StreamState>,
    backend: Mutex<Option<Box<dyn AudioBackend>>>,
    subscribers: Mutex<Vec<Sender<LayerEvent>>>,
}

impl AudioLayer {
    /// Creates a layer with default settings, drawing blocks from `pool`.
    #[must_use]
    pub fn new(name: impl Into<String>, pool: BlockPool) -> Self {
        Self::with_settings(name, pool, &AudioSettings::default())
    }

    /// Creates a layer with explicit settings.
    #[must_use]
    pub fn with_settings(name: impl Into<String>, pool: BlockPool, settings: &AudioSettings) -> Self {
        AudioLayer {
            name: name.into(),
            pool,
            max_update_ms: settings.max_update_ms,
            volume_interval_secs: settings.volume_interval_secs,
            control: Mutex::new(ControlState {
                playlist: Vec::new(),
                status: PlaybackStatus::NotPlaying,
                looping: false,
                volume_modifier: 1.0,
                refresh_needed: true,
                trigger_cross_fade: false,
                trigger_fade_stop: false,
                trigger_duration: 0.0,
            }),
            stream: Mutex::new(StreamState {
                current: None,
                next: None,
                play_head: 0,
                total_samples: 0,
                loop_count: 0,
                streaming_format: AudioFormat::default(),
                scratch: vec![0.0; INITIAL_SCRATCH_SIZE],
                cross_fade_scratch: vec![0.0; INITIAL_SCRATCH_SIZE],
                ready_blocks: VecDeque::new(),
                fade_in_env: None,
                fade_out_env: None,
                user_env: None,
                cross_fade: None,
                fade_stop: None,
                metrics: LayerMetrics::default(),
            }),
            backend: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// The layer's friendly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs the platform backend whose update hook runs every tick.
    pub fn set_backend(&self, backend: Box<dyn AudioBackend>) {
        *self.backend.lock() = Some(backend);
    }

    /// Subscribes to layer notifications.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<LayerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    // ------------------------------------------------------------------
    // Playlist API
    // ------------------------------------------------------------------

    /// Queues a track to play right after the current one. Starts
    /// playback immediately if the layer is idle and not paused.
    pub fn play_next(&self, track: AudioTrack) {
        let track = Arc::new(track);
        let mut control = self.control.lock();
        if control.playlist.is_empty() {
            control.playlist.push(track);
        } else {
            control.playlist.insert(1, track);
        }
        control.refresh_needed = true;
        if control.status == PlaybackStatus::NotPlaying {
            self.set_status(&mut control, PlaybackStatus::Playing);
        }
    }

    /// Appends a track to the back of the playlist. Starts playback
    /// immediately if the layer is idle and not paused.
    pub fn add_to_queue(&self, track: AudioTrack) {
        let mut control = self.control.lock();
        control.playlist.push(Arc::new(track));
        control.refresh_needed = true;
        if control.status == PlaybackStatus::NotPlaying {
            self.set_status(&mut control, PlaybackStatus::Playing);
        }
    }

    /// Clears the playlist and plays the provided track. Equivalent to
    /// `stop` followed by `play_next` with fewer state transitions.
    pub fn quick_play(&self, track: AudioTrack) {
        let mut control = self.control.lock();
        control.playlist.clear();
        control.playlist.push(Arc::new(track));
        control.refresh_needed = true;
        if control.status == PlaybackStatus::NotPlaying {
            self.set_status(&mut control, PlaybackStatus::Playing);
        }
    }

    /// Resumes playback if paused. Becomes `NotPlaying` when there is
    /// nothing to play.
    pub fn resume(&self) {
        let stream = self.stream.lock();
        let mut control = self.control.lock();
        let has_track = if control.refresh_needed {
            !control.playlist.is_empty()
        } else {
            stream.current.is_some()
        };
        drop(stream);
        let status = if has_track {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::NotPlaying
        };
        self.set_status(&mut control, status);
    }

    /// Pauses playback. Pausing an idle layer still requires a resume.
    pub fn pause(&self) {
        let mut control = self.control.lock();
        self.set_status(&mut control, PlaybackStatus::Paused);
        control.refresh_needed = true;
    }

    /// Stops playback and clears the playlist.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        control.playlist.clear();
        if control.status == PlaybackStatus::Playing {
            self.set_status(&mut control, PlaybackStatus::NotPlaying);
        }
        control.refresh_needed = true;
    }

    /// Arms a crossfade from the current track into the next one,
    /// consumed on the next update. When `duration_seconds` is zero the
    /// current track's own crossfade setting is used.
    pub fn fade_current_track_into_next(&self, duration_seconds: f32) {
        let mut control = self.control.lock();
        control.trigger_duration = duration_seconds;
        control.trigger_cross_fade = true;
    }

    /// Arms a fade-out after which the playlist (as it is now) stops.
    ///
    /// Returns `false` without arming anything when no track is current.
    pub fn stop_with_fade(&self, fade_duration_seconds: f32) -> bool {
        {
            let stream = self.stream.lock();
            if stream.current.is_none() {
                return false;
            }
        }
        let mut control = self.control.lock();
        control.trigger_duration = fade_duration_seconds;
        control.trigger_fade_stop = true;
        true
    }

    /// Ramps the layer volume to `volume_goal` over `ms` milliseconds
    /// (instant when zero). Multiplies the layer and global volume rather
    /// than replacing them.
    pub fn set_volume(&self, volume_goal: f32, ms: u32) {
        let mut stream = self.stream.lock();
        let format = stream.streaming_format;
        let start_volume = stream
            .user_env
            .as_ref()
            .map_or(1.0, |env| env.volume_at(stream.play_head));
        let ramp_samples =
            format.seconds_to_frames(ms as f32 / 1000.0) * usize::from(format.channels);
        let start = stream.play_head;
        stream.user_env = Some(VolumeModulation::new(
            start_volume,
            volume_goal,
            start,
            start + ramp_samples,
        ));
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    /// The current playback status.
    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        self.control.lock().status
    }

    /// Whether the current track loops instead of advancing.
    #[must_use]
    pub fn looping_current(&self) -> bool {
        self.control.lock().looping
    }

    /// Sets whether the current track loops instead of advancing.
    pub fn set_looping_current(&self, looping: bool) {
        let mut control = self.control.lock();
        if control.looping != looping {
            control.looping = looping;
            control.refresh_needed = true;
        }
    }

    /// The layer's volume modifier, applied on top of the envelopes.
    #[must_use]
    pub fn volume_modifier(&self) -> f32 {
        self.control.lock().volume_modifier
    }

    /// Sets the layer's volume modifier.
    pub fn set_volume_modifier(&self, volume: f32) {
        self.control.lock().volume_modifier = volume;
    }

    /// The track currently playing, if any.
    #[must_use]
    pub fn current_track(&self) -> Option<Arc<AudioTrack>> {
        let stream = self.stream.lock();
        let control = self.control.lock();
        if control.refresh_needed {
            control.playlist.first().cloned()
        } else {
            stream.current.clone()
        }
    }

    /// Snapshot of the queued assets. Meant for debugging and UI display;
    /// use [`AudioLayer::current_track`] for the playing track.
    #[must_use]
    pub fn playlist(&self) -> Vec<Arc<AudioAsset>> {
        self.control
            .lock()
            .playlist
            .iter()
            .map(|track| Arc::clone(track.asset()))
            .collect()
    }

    /// Fraction (0 to 1) of the current track already produced.
    #[must_use]
    pub fn progress(&self) -> f32 {
        let stream = self.stream.lock();
        if stream.play_head == 0 || stream.total_samples == 0 {
            return 0.0;
        }
        let control = self.control.lock();
        if control.refresh_needed {
            // Only meaningful when the derivation will keep this track.
            match (control.playlist.first(), &stream.current) {
                (Some(head), Some(current)) if Arc::ptr_eq(head, current) => {
                    stream.play_head as f32 / stream.total_samples as f32
                }
                _ => 0.0,
            }
        } else {
            stream.play_head as f32 / stream.total_samples as f32
        }
    }

    /// Seconds of the current track already produced.
    #[must_use]
    pub fn playback_seconds(&self) -> f32 {
        let duration = {
            let stream = self.stream.lock();
            stream.current.as_ref().map(|t| t.asset().duration())
        };
        duration.map_or(0.0, |d| self.progress() * d)
    }

    /// The volume applied by [`AudioLayer::set_volume`] at the playhead.
    #[must_use]
    pub fn applied_volume(&self) -> f32 {
        let stream = self.stream.lock();
        stream
            .user_env
            .as_ref()
            .map_or(1.0, |env| env.volume_at(stream.play_head))
    }

    /// How many times the current track has looped.
    #[must_use]
    pub fn loop_count(&self) -> u32 {
        self.stream.lock().loop_count
    }

    /// The format the backend currently streams in.
    #[must_use]
    pub fn streaming_format(&self) -> AudioFormat {
        self.stream.lock().streaming_format
    }

    /// Frames buffered ahead across all ready blocks.
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.stream
            .lock()
            .ready_blocks
            .iter()
            .map(DataBlock::frames_available)
            .sum()
    }

    /// Starvation and drop counters.
    #[must_use]
    pub fn metrics(&self) -> LayerMetrics {
        self.stream.lock().metrics
    }

    /// Moves the playhead to the given position in seconds.
    pub fn set_playhead(&self, seconds: f32) {
        let mut stream = self.stream.lock();
        let Some(current) = stream.current.clone() else {
            return;
        };
        let duration = current.asset().duration();
        if duration <= 0.0 {
            return;
        }
        let progress = (seconds / duration).clamp(0.0, 1.0);
        stream.play_head = (stream.total_samples as f32 * progress) as usize;
    }

    // ------------------------------------------------------------------
    // Stream logic
    // ------------------------------------------------------------------

    /// Processes audio ahead of time.
    ///
    /// Re-derives the current track if needed, runs the backend hook,
    /// then pre-buffers `time_passed_ms` worth of frames into a pooled
    /// block. `exact` disables the catch-up ceiling and the thin-queue
    /// doubling; useful for tests.
    pub fn update(&self, time_passed_ms: u32, exact: bool) {
        let mut stream = self.stream.lock();
        self.refresh_tracks(&mut stream);
        self.consume_triggers(&mut stream);

        // The backend pulls through a borrowed handle while we hold the
        // stream lock, so its pulls and our production stay serialized.
        let backend = self.backend.lock().take();
        if let Some(mut backend) = backend {
            backend.update(&mut LayerStream {
                layer: self,
                stream: &mut *stream,
            });
            *self.backend.lock() = Some(backend);
        }

        if self.control.lock().status != PlaybackStatus::Playing || stream.current.is_none() {
            return;
        }

        let mut time_passed_ms = time_passed_ms;
        if time_passed_ms > self.max_update_ms && !exact {
            // Cap catch-up work so a long stall can't snowball.
            time_passed_ms = self.max_update_ms;
        }

        let format = stream.streaming_format;
        let mut frames_to_get = format.seconds_to_frames(time_passed_ms as f32 / 1000.0);

        // A thin queue means the backend is about to starve; request
        // ahead to pre-empt it.
        if !exact {
            let thin = match stream.ready_blocks.front() {
                None => true,
                Some(front) => {
                    stream.ready_blocks.len() == 1 && front.frames_available() < frames_to_get
                }
            };
            if thin {
                frames_to_get *= 2;
            }
        }

        self.buffer_data_in_advance(&mut stream, frames_to_get);
    }

    /// Pulls converted audio for the backend, draining ready blocks first
    /// and generating synchronously when they run out.
    pub fn backend_get_data(
        &self,
        format: AudioFormat,
        frames_requested: usize,
        buffer: &mut [u8],
    ) -> usize {
        let mut stream = self.stream.lock();
        self.backend_get_data_locked(&mut stream, format, frames_requested, buffer)
    }

    pub(crate) fn backend_get_data_locked(
        &self,
        stream: &mut StreamState,
        format: AudioFormat,
        frames_requested: usize,
        buffer: &mut [u8],
    ) -> usize {
        if self.control.lock().status != PlaybackStatus::Playing {
            return 0;
        }

        if format != stream.streaming_format {
            self.change_streaming_format(stream, format);
        }

        let frame_size = format.frame_size();
        if frame_size == 0 {
            return 0;
        }
        let mut frames_requested = frames_requested;
        if buffer.len() / frame_size < frames_requested {
            warn!(
                provided = buffer.len(),
                needed = frames_requested * frame_size,
                "backend buffer smaller than the requested frames, truncating"
            );
            frames_requested = buffer.len() / frame_size;
        }

        let mut frames_gotten = 0usize;
        let mut frames_left = frames_requested;
        let mut write_offset = 0usize;
        while frames_left > 0 && !stream.ready_blocks.is_empty() {
            let drained = {
                let block = stream
                    .ready_blocks
                    .front_mut()
                    .expect("queue checked non-empty");
                let take = block.frames_available().min(frames_left);
                let read_offset = block.frames_read * frame_size;
                let bytes = take * frame_size;
                buffer[write_offset..write_offset + bytes]
                    .copy_from_slice(&block.data[read_offset..read_offset + bytes]);
                block.frames_read += take;
                write_offset += bytes;
                frames_gotten += take;
                frames_left -= take;
                block.frames_available() == 0
            };
            if drained {
                let block = stream
                    .ready_blocks
                    .pop_front()
                    .expect("queue checked non-empty");
                self.pool.give_back(block);
            }
        }

        // Starved: stream straight into the backend buffer. This happens
        // routinely right after a track starts, when the device requests
        // further ahead than the prepared blocks cover.
        if frames_left > 0 && stream.ready_blocks.is_empty() {
            stream.metrics.starved_frames += frames_left as u64;
            frames_gotten += self.fill_buffer(stream, frames_left, &mut buffer[write_offset..], 0);
        }

        frames_gotten
    }

    /// Recomputes the current and next track when the derivation is
    /// stale. Runs only inside the update path.
    fn refresh_tracks(&self, stream: &mut StreamState) {
        let mut control = self.control.lock();
        if !control.refresh_needed {
            return;
        }
        control.refresh_needed = false;

        let (current, next) = if control.playlist.is_empty() {
            (None, None)
        } else {
            let current = control.playlist.first().cloned();
            let next = if control.looping {
                current.clone()
            } else {
                control.playlist.get(1).cloned()
            };
            (current, next)
        };

        if current.is_none() {
            self.invalidate_blocks(stream);
            if control.status == PlaybackStatus::Playing {
                self.set_status(&mut control, PlaybackStatus::NotPlaying);
            }
        }

        let current_changed = !same_track(&stream.current, &current);
        let next_changed = !same_track(&stream.next, &next);
        let previous_play_head = stream.play_head;

        // Both changing at once is a wholesale transition: the track ran
        // out and we advanced, or a stop was followed by a fresh
        // playlist. Either way playback restarts at the beginning.
        if current_changed && (next_changed || next.is_none()) {
            stream.play_head = 0;
        }

        if current_changed && let Some(track) = &current {
            stream.total_samples = track
                .asset()
                .converter()
                .sample_count_in_format(&stream.streaming_format);
            if track.set_looping_current {
                control.looping = true;
            }
            if control.status == PlaybackStatus::NotPlaying {
                self.set_status(&mut control, PlaybackStatus::Playing);
            }
        }

        if current_changed {
            let from = stream.current.as_ref().map(|t| Arc::clone(t.asset()));
            let to = current.as_ref().map(|t| Arc::clone(t.asset()));
            self.emit(LayerEvent::TrackChanged { from, to });
            stream.loop_count = 0;
            self.track_changed_fx(stream, &current, previous_play_head);

            // Not playing: drop buffered blocks, or a few frames of the
            // old track would leak into a later resume.
            if control.status != PlaybackStatus::Playing {
                self.invalidate_blocks(stream);
            }
        }

        stream.current = current;
        stream.next = next;
    }

    /// Consumes the one-shot triggers armed since the last update.
    fn consume_triggers(&self, stream: &mut StreamState) {
        let (cross_fade_armed, fade_stop_armed, duration) = {
            let mut control = self.control.lock();
            let armed = (
                control.trigger_cross_fade,
                control.trigger_fade_stop,
                control.trigger_duration,
            );
            control.trigger_cross_fade = false;
            control.trigger_fade_stop = false;
            armed
        };

        let format = stream.streaming_format;
        let channels = usize::from(format.channels);

        if cross_fade_armed
            && stream.cross_fade.is_none()
            && let (Some(current), Some(next)) = (stream.current.clone(), stream.next.clone())
        {
            let seconds = if duration > 0.0 {
                duration
            } else {
                current
                    .cross_fade
                    .map_or(0.0, |value| current.resolve_duration(value))
            };
            if seconds > 0.0 {
                let duration_samples = format.seconds_to_frames(seconds) * channels;
                let outgoing_end = (stream.play_head + duration_samples).min(stream.total_samples);
                stream.fade_out_env = Some(VolumeModulation::new(
                    1.0,
                    0.0,
                    stream.play_head,
                    outgoing_end,
                ));
                stream.cross_fade =
                    Some(CrossFadeModulation::new(next, duration_samples, outgoing_end));
                debug!(layer = %self.name, seconds, "crossfade armed");
            }
        }

        if fade_stop_armed && stream.fade_stop.is_none() && stream.current.is_some() {
            let duration_samples = format.seconds_to_frames(duration.max(0.0)) * channels;
            let snapshot = self.control.lock().playlist.clone();
            stream.fade_stop = Some(FadeStop {
                envelope: VolumeModulation::new(
                    1.0,
                    0.0,
                    stream.play_head,
                    stream.play_head + duration_samples,
                ),
                snapshot,
            });
            debug!(layer = %self.name, seconds = duration, "fade-out stop armed");
        }
    }

    /// Converts frames ahead of the backend into a pooled block.
    fn buffer_data_in_advance(&self, stream: &mut StreamState, frames_to_get: usize) {
        let frame_size = stream.streaming_format.frame_size();
        let bytes_to_get = frames_to_get * frame_size;
        if bytes_to_get == 0 {
            return;
        }

        // At the block bound the oldest ready block is evicted. The
        // backend is draining slower than production; bounded memory wins
        // over keeping audio nobody fetched.
        let mut block = if stream.ready_blocks.len() >= self.pool.capacity() {
            let evicted = stream
                .ready_blocks
                .pop_front()
                .expect("queue checked non-empty");
            stream.metrics.backend_missed_frames += evicted.frames_available() as u64;
            evicted
        } else {
            self.pool.checkout()
        };

        self.pool
            .note_allocated(block.ensure_capacity(bytes_to_get));

        let frames_got = self.fill_buffer(stream, frames_to_get, &mut block.data[..bytes_to_get], 0);
        if frames_got == 0 {
            // Nothing streamed; the playlist is likely over.
            self.pool.give_back(block);
        } else {
            block.frames_written = frames_got;
            block.frames_read = 0;
            stream.ready_blocks.push_back(block);
        }
    }

    /// Fills `dest` with converted, volume-processed bytes. On track
    /// exhaustion advances the playlist and keeps filling from the next
    /// track.
    fn fill_buffer(
        &self,
        stream: &mut StreamState,
        frames_requested: usize,
        dest: &mut [u8],
        frames_offset: usize,
    ) -> usize {
        let format = stream.streaming_format;
        let frame_size = format.frame_size();
        let channels = usize::from(format.channels);
        if frame_size == 0 {
            return 0;
        }

        let byte_offset = frames_offset * frame_size;
        if byte_offset >= dest.len() {
            warn!("converted frames do not fit in the destination buffer");
            return 0;
        }

        let mut frames_requested = frames_requested;
        let available_frames = (dest.len() - byte_offset) / frame_size;
        if available_frames < frames_requested {
            warn!(
                provided = dest.len(),
                needed = byte_offset + frames_requested * frame_size,
                "destination buffer too small for the requested frames, truncating"
            );
            frames_requested = available_frames;
        }
        if frames_requested == 0 || stream.current.is_none() {
            return 0;
        }

        let produced = self.produce_frames(stream, frames_requested);
        stream.play_head += produced * channels;
        pcm::write_samples_to_bytes(
            &stream.scratch[..produced * channels],
            &mut dest[byte_offset..],
            &format,
        );

        // A finished fade-to-stop removes the playlist it covered.
        let fade_stop_done = stream
            .fade_stop
            .as_ref()
            .is_some_and(|fade_stop| stream.play_head >= fade_stop.envelope.end_sample());
        if fade_stop_done {
            let snapshot = stream
                .fade_stop
                .take()
                .map(|fade_stop| fade_stop.snapshot)
                .unwrap_or_default();
            {
                let mut control = self.control.lock();
                control
                    .playlist
                    .retain(|track| !snapshot.iter().any(|s| Arc::ptr_eq(s, track)));
                control.refresh_needed = true;
            }
            self.refresh_tracks(stream);
            return produced;
        }

        let exhausted = produced < frames_requested;
        let cross_fade_done = stream
            .cross_fade
            .as_ref()
            .is_some_and(|cross_fade| stream.play_head >= cross_fade.outgoing_end);
        if !exhausted && !cross_fade_done {
            return produced;
        }

        self.advance_track(stream, false);

        let mut produced = produced;
        if exhausted && stream.current.is_some() {
            produced += self.fill_buffer(
                stream,
                frames_requested - produced,
                dest,
                frames_offset + produced,
            );
        }
        produced
    }

    /// Converts up to `frames_requested` frames of the current track into
    /// the scratch buffer and applies volume envelopes and any active
    /// crossfade mix. Returns frames produced; fewer than requested means
    /// the track is exhausted.
    fn produce_frames(&self, stream: &mut StreamState, frames_requested: usize) -> usize {
        let format = stream.streaming_format;
        let channels = usize::from(format.channels);
        let Some(current) = stream.current.clone() else {
            return 0;
        };
        let quality = resample_quality();

        let samples_requested = frames_requested * channels;
        if stream.scratch.len() < samples_requested {
            stream.scratch.resize(samples_requested, 0.0);
            stream.cross_fade_scratch.resize(samples_requested, 0.0);
        }

        let produced = current.asset().converter().resampled_frames_with_quality(
            &format,
            stream.play_head,
            frames_requested,
            &mut stream.scratch[..samples_requested],
            quality,
        );

        let base_volume = self.control.lock().volume_modifier;
        // Volume is evaluated per interval chunk rather than per frame;
        // small enough to avoid audible discontinuity, large enough to
        // stay off the per-sample cost.
        let interval = format.seconds_to_frames(self.volume_interval_secs).max(1) * channels;

        let produced_samples = produced * channels;
        let start_sample = stream.play_head;
        {
            let state = &mut *stream;
            let scratch = &mut state.scratch[..produced_samples];
            let mut offset = 0usize;
            while offset < produced_samples {
                let position = start_sample + offset;
                let chunk_end = (position / interval + 1) * interval - start_sample;
                let end = chunk_end.min(produced_samples);
                let mut envelope = 1.0f32;
                if let Some(env) = &state.fade_in_env {
                    envelope *= env.volume_at(position);
                }
                if let Some(env) = &state.fade_out_env {
                    envelope *= env.volume_at(position);
                }
                if let Some(env) = &state.user_env {
                    envelope *= env.volume_at(position);
                }
                if let Some(fade_stop) = &state.fade_stop {
                    envelope *= fade_stop.envelope.volume_at(position);
                }
                let gain = volume_to_multiplier(base_volume * envelope);
                for value in &mut scratch[offset..end] {
                    *value *= gain;
                }
                offset = end;
            }
        }

        // Mix in the incoming track while a crossfade is running.
        let state = &mut *stream;
        if let Some(cross_fade) = state.cross_fade.as_mut() {
            let incoming = Arc::clone(&cross_fade.incoming);
            let produced_in = incoming.asset().converter().resampled_frames_with_quality(
                &format,
                cross_fade.incoming_playhead,
                produced,
                &mut state.cross_fade_scratch[..samples_requested],
                quality,
            );

            let incoming_samples = produced_in * channels;
            let incoming_start = cross_fade.incoming_playhead;
            let scratch = &mut state.scratch;
            let incoming_scratch = &state.cross_fade_scratch;
            let mut offset = 0usize;
            while offset < incoming_samples {
                let position = incoming_start + offset;
                let chunk_end = (position / interval + 1) * interval - incoming_start;
                let end = chunk_end.min(incoming_samples);
                let gain = volume_to_multiplier(base_volume * cross_fade.fade.volume_at(position));
                for i in offset..end {
                    scratch[i] = (scratch[i] + incoming_scratch[i] * gain).clamp(-1.0, 1.0);
                }
                offset = end;
            }
            cross_fade.incoming_playhead += incoming_samples;
        }

        produced
    }

    /// Moves to the next track, or loops the current one.
    fn advance_track(&self, stream: &mut StreamState, ignore_loop: bool) {
        let looping = self.control.lock().looping;
        if looping && !ignore_loop && stream.total_samples > 0 {
            // The track itself does not change; rewind and renotify.
            let previous_play_head = stream.play_head;
            stream.play_head = 0;
            stream.loop_count += 1;
            if let Some(current) = stream.current.clone() {
                self.emit(LayerEvent::TrackLooped(Arc::clone(current.asset())));
                let current = Some(current);
                self.track_changed_fx(stream, &current, previous_play_head);
            }
        } else {
            {
                let mut control = self.control.lock();
                if let Some(current) = &stream.current {
                    // Remove by identity; a data race may have shuffled
                    // the current track off the head.
                    if let Some(position) = control
                        .playlist
                        .iter()
                        .position(|track| Arc::ptr_eq(track, current))
                    {
                        control.playlist.remove(position);
                    }
                }
                control.refresh_needed = true;
            }
            self.refresh_tracks(stream);
        }
    }

    /// Rearms per-track envelopes when the current track (or loop
    /// iteration) changes, and carries absolute-positioned envelopes
    /// across the transition.
    fn track_changed_fx(
        &self,
        stream: &mut StreamState,
        new_current: &Option<Arc<AudioTrack>>,
        previous_play_head: usize,
    ) {
        let format = stream.streaming_format;
        let channels = usize::from(format.channels);

        stream.fade_in_env = None;
        stream.fade_out_env = None;

        if let Some(track) = new_current {
            if let Some(fade_in) = track.fade_in
                && (!track.fade_in_first_loop_only || stream.loop_count == 0)
            {
                let seconds = track.resolve_duration(fade_in);
                let samples = format.seconds_to_frames(seconds) * channels;
                stream.fade_in_env = Some(VolumeModulation::new(0.0, 1.0, 0, samples));
            }

            if let Some(fade_out) = track.fade_out {
                let seconds = track.resolve_duration(fade_out);
                let start_seconds = (track.asset().duration() - seconds).max(0.0);
                let start_sample = format.seconds_to_frames(start_seconds) * channels;
                stream.fade_out_env = Some(VolumeModulation::new(
                    1.0,
                    0.0,
                    start_sample,
                    stream.total_samples,
                ));
            }
        }

        // A crossfade hands off once its incoming track becomes current:
        // the playhead continues from the incoming side and the remaining
        // ramp keeps running as a plain fade-in.
        if let Some(cross_fade) = stream.cross_fade.take() {
            let incoming_is_current = new_current
                .as_ref()
                .is_some_and(|track| Arc::ptr_eq(track, &cross_fade.incoming));
            if incoming_is_current {
                stream.play_head = cross_fade.incoming_playhead;
                stream.fade_in_env = Some(cross_fade.fade);
            }
        }

        let total_samples = stream.total_samples;
        if let Some(env) = stream.user_env.as_mut() {
            transition_absolute_env(env, previous_play_head, total_samples);
        }
        if let Some(fade_stop) = stream.fade_stop.as_mut() {
            transition_absolute_env(&mut fade_stop.envelope, previous_play_head, total_samples);
        }
    }

    fn change_streaming_format(&self, stream: &mut StreamState, format: AudioFormat) {
        let old_format = stream.streaming_format;
        let progress = if stream.play_head != 0 && stream.total_samples != 0 {
            stream.play_head as f32 / stream.total_samples as f32
        } else {
            0.0
        };
        stream.streaming_format = format;

        if !format.is_supported_bit_depth() {
            warn!(?format, "unsupported bits per sample in streaming format");
        }

        let old_total = stream.total_samples;
        if let Some(current) = stream.current.clone() {
            stream.total_samples = current
                .asset()
                .converter()
                .sample_count_in_format(&format);
            let new_total = stream.total_samples;

            if let Some(env) = stream.fade_in_env.as_mut() {
                env.rescale(old_total, new_total);
            }
            if let Some(env) = stream.fade_out_env.as_mut() {
                env.rescale(old_total, new_total);
            }
            if let Some(env) = stream.user_env.as_mut() {
                env.rescale(old_total, new_total);
            }
            if let Some(fade_stop) = stream.fade_stop.as_mut() {
                fade_stop.envelope.rescale(old_total, new_total);
            }
            if let Some(cross_fade) = stream.cross_fade.as_mut() {
                let old_incoming = cross_fade
                    .incoming
                    .asset()
                    .converter()
                    .sample_count_in_format(&old_format);
                let new_incoming = cross_fade
                    .incoming
                    .asset()
                    .converter()
                    .sample_count_in_format(&format);
                cross_fade.rescale(old_incoming, new_incoming, old_total, new_total);
            }
        } else {
            stream.total_samples = 0;
        }

        // Continue from the last streaming position. The jump is an
        // accepted glitch; the buffered blocks no longer match the format.
        stream.play_head = (stream.total_samples as f32 * progress).floor() as usize;
        self.invalidate_blocks(stream);
        debug!(layer = %self.name, ?format, "streaming format changed");
    }

    /// Returns every ready block to the pool.
    fn invalidate_blocks(&self, stream: &mut StreamState) {
        while let Some(block) = stream.ready_blocks.pop_front() {
            self.pool.give_back(block);
        }
    }

    fn set_status(&self, control: &mut ControlState, status: PlaybackStatus) {
        if control.status != status {
            let from = control.status;
            control.status = status;
            self.emit(LayerEvent::StatusChanged { from, to: status });
        }
    }

    fn emit(&self, event: LayerEvent) {
        let subscribers = self.subscribers.lock();
        for sender in subscribers.iter() {
            let _ = sender.try_send(event.clone());
        }
    }
}

impl Drop for AudioLayer {
    fn drop(&mut self) {
        let stream = self.stream.get_mut();
        while let Some(block) = stream.ready_blocks.pop_front() {
            self.pool.give_back(block);
        }
    }
}

impl std::fmt::Debug for AudioLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioLayer")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn same_track(a: &Option<Arc<AudioTrack>>, b: &Option<Arc<AudioTrack>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Carries an absolute-positioned envelope across a track transition so
/// it keeps ramping from where it was.
fn transition_absolute_env(
    env: &mut VolumeModulation,
    previous_play_head: usize,
    total_samples: usize,
) {
    if env.end_sample > previous_play_head {
        let samples_left = env.end_sample - previous_play_head;
        env.start_volume = env.volume_at(previous_play_head);
        env.start_sample = 0;
        env.end_sample = samples_left;
    } else {
        env.start_volume = env.end_volume;
        env.start_sample = 0;
        env.end_sample = total_samples;
    }
}
