//! Single-track playback session.
//!
//! The session owns the device adapter and the logical playback state, and
//! enforces legal transitions on top of a device that only exposes start/stop
//! and coarse position semantics. There is exactly one mutator: commands are
//! processed one at a time to completion.

use thiserror::Error;

use crate::device::{ClipDevice, ClipSource, DeviceError};

/// Trailing length excluded from the seekable range, in microseconds.
///
/// Device duration queries overshoot the audible end by a fixed latency
/// margin; positions inside that tail are unreachable.
pub const TAIL_GUARD_US: u64 = 10_000_000;

/// Logical playback state. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Initial state; also re-entered when the clip plays to its end.
    Stopped,
    /// The device is actively producing output.
    Playing,
    /// The device is halted with the pause position retained.
    Paused,
    /// Terminal; the device has been released.
    Closed,
}

/// A rejected command, or a device failure during a transition.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Command issued in a state that forbids it. Recoverable; session state
    /// is unchanged.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// Seek target outside the seekable range. Recoverable; session state is
    /// unchanged.
    #[error("seek target {target_us}us is outside (0, {usable_end_us}us)")]
    SeekOutOfRange { target_us: u64, usable_end_us: u64 },

    /// Device failure. Fatal: the session closes itself before this
    /// propagates.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// The playback state machine.
///
/// Tracks `(state, pause position, usable end)` and drives the device through
/// the transitions below. Every rejected transition is returned as a
/// [`SessionError`] without mutating state; device failures close the session
/// before they propagate.
pub struct PlaybackSession<D: ClipDevice> {
    device: D,
    state: PlaybackState,
    pause_pos: u64,
    usable_end: u64,
}

impl<D: ClipDevice> PlaybackSession<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: PlaybackState::Stopped,
            pause_pos: 0,
            usable_end: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Position recorded by the last pause or seek, in microseconds.
    pub fn pause_position(&self) -> u64 {
        self.pause_pos
    }

    /// End of the seekable range: total clip length minus the tail guard.
    /// Zero until the device has been opened.
    pub fn usable_end(&self) -> u64 {
        self.usable_end
    }

    /// Open the device on `clip` and start playback from the beginning.
    pub fn play(&mut self, clip: &ClipSource) -> Result<(), SessionError> {
        self.ensure_not_closed()?;
        if self.state != PlaybackState::Stopped || self.device.is_open() {
            return Err(SessionError::InvalidTransition(
                "cannot play: a clip is already loaded",
            ));
        }

        self.run_device(|d| {
            d.open(clip)?;
            d.start()
        })?;
        self.usable_end = self.device.total_length().saturating_sub(TAIL_GUARD_US);
        self.state = PlaybackState::Playing;
        tracing::info!(
            total_us = self.device.total_length(),
            usable_end_us = self.usable_end,
            "playback started"
        );
        Ok(())
    }

    /// Halt output, remembering the current position.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.ensure_not_closed()?;
        if self.state != PlaybackState::Playing || !self.device.is_active() {
            return Err(SessionError::InvalidTransition(
                "cannot pause a paused or stopped clip",
            ));
        }

        // Pausing inside the tail guard would record a position the device
        // cannot seek back to.
        let pos = self.device.position().min(self.usable_end);
        self.run_device(|d| d.stop())?;
        self.pause_pos = pos;
        self.state = PlaybackState::Paused;
        tracing::info!(pause_us = pos, "playback paused");
        Ok(())
    }

    /// Continue output from the recorded pause position.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.ensure_not_closed()?;
        if self.state != PlaybackState::Paused || self.device.is_active() {
            return Err(SessionError::InvalidTransition(
                "cannot resume a clip that is already playing",
            ));
        }

        let pos = self.pause_pos;
        self.run_device(|d| {
            d.set_position(pos)?;
            d.start()
        })?;
        self.state = PlaybackState::Playing;
        tracing::info!(resume_us = pos, "playback resumed");
        Ok(())
    }

    /// Rewind to the beginning and play.
    pub fn restart(&mut self) -> Result<(), SessionError> {
        self.ensure_not_closed()?;
        if self.state != PlaybackState::Playing && self.state != PlaybackState::Paused {
            return Err(SessionError::InvalidTransition(
                "cannot restart: no clip is playing or paused",
            ));
        }

        self.run_device(|d| {
            d.stop()?;
            d.set_position(0)?;
            d.start()
        })?;
        self.pause_pos = 0;
        self.state = PlaybackState::Playing;
        tracing::info!("playback restarted");
        Ok(())
    }

    /// Jump to `target_us` and play.
    ///
    /// The target must lie strictly inside `(0, usable_end)`; out-of-range
    /// targets are rejected without touching the device.
    pub fn seek(&mut self, target_us: u64) -> Result<(), SessionError> {
        self.ensure_not_closed()?;
        if !self.device.is_open() {
            return Err(SessionError::InvalidTransition("no clip is loaded"));
        }
        if target_us == 0 || target_us >= self.usable_end {
            return Err(SessionError::SeekOutOfRange {
                target_us,
                usable_end_us: self.usable_end,
            });
        }

        self.run_device(|d| {
            d.stop()?;
            d.set_position(target_us)?;
            d.start()
        })?;
        self.pause_pos = target_us;
        self.state = PlaybackState::Playing;
        tracing::info!(target_us, "seek");
        Ok(())
    }

    /// Release the device. Terminal: every later command is rejected.
    pub fn close(&mut self) -> Result<(), SessionError> {
        self.ensure_not_closed()?;

        // The device is released exactly once, even when close itself fails,
        // so this cannot go through `run_device`.
        let result = if self.device.is_open() {
            self.device.close()
        } else {
            Ok(())
        };
        self.state = PlaybackState::Closed;
        tracing::info!("session closed");
        result.map_err(SessionError::Device)
    }

    /// Detect natural end of playback.
    ///
    /// Returns `true` exactly once when the device stops running on its own
    /// while the session believes it is playing. The session drops back to
    /// [`PlaybackState::Stopped`]; the caller decides whether to close.
    pub fn poll_ended(&mut self) -> bool {
        if self.state == PlaybackState::Playing && !self.device.is_running() {
            self.state = PlaybackState::Stopped;
            tracing::info!("clip played to its end");
            return true;
        }
        false
    }

    fn ensure_not_closed(&self) -> Result<(), SessionError> {
        if self.state == PlaybackState::Closed {
            return Err(SessionError::InvalidTransition("session is closed"));
        }
        Ok(())
    }

    /// Run a device operation; on failure release the device and make the
    /// session terminal, since the handle may be in an unknown state.
    fn run_device<F>(&mut self, op: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut D) -> Result<(), DeviceError>,
    {
        match op(&mut self.device) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.device.is_open() {
                    if let Err(close_err) = self.device.close() {
                        tracing::warn!("device release after failure: {close_err}");
                    }
                }
                self.state = PlaybackState::Closed;
                Err(SessionError::Device(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timecode::parse_timecode;

    /// In-memory device that records calls and checks the caller contract.
    #[derive(Default)]
    struct FakeClip {
        open: bool,
        running: bool,
        position: u64,
        total: u64,
        closes: usize,
        fail_start: bool,
        calls: Vec<&'static str>,
    }

    impl ClipDevice for FakeClip {
        fn open(&mut self, clip: &ClipSource) -> Result<(), DeviceError> {
            self.calls.push("open");
            assert!(!self.open, "open called twice");
            self.open = true;
            self.total = clip.duration_us();
            Ok(())
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            self.calls.push("start");
            if self.fail_start {
                return Err(DeviceError::Unavailable("injected failure".into()));
            }
            assert!(self.open, "start before open");
            assert!(!self.running, "start on a running device");
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DeviceError> {
            self.calls.push("stop");
            assert!(self.open, "stop before open");
            self.running = false;
            Ok(())
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.calls.push("close");
            assert!(self.open, "close on a released device");
            self.open = false;
            self.running = false;
            self.closes += 1;
            Ok(())
        }

        fn set_position(&mut self, us: u64) -> Result<(), DeviceError> {
            self.calls.push("set_position");
            assert!(!self.running, "set_position while running");
            self.position = us;
            Ok(())
        }

        fn position(&self) -> u64 {
            self.position
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn is_running(&self) -> bool {
            self.open && self.running
        }

        fn is_active(&self) -> bool {
            self.is_running()
        }

        fn total_length(&self) -> u64 {
            self.total
        }
    }

    /// A clip whose duration is `us` microseconds (1 kHz mono keeps the
    /// buffer small).
    fn clip_of_us(us: u64) -> ClipSource {
        ClipSource {
            samples: vec![0.0f32; (us / 1000) as usize].into(),
            channels: 1,
            sample_rate: 1000,
        }
    }

    fn playing_session(total_us: u64) -> PlaybackSession<FakeClip> {
        let mut session = PlaybackSession::new(FakeClip::default());
        session.play(&clip_of_us(total_us)).unwrap();
        session
    }

    #[test]
    fn play_opens_and_starts() {
        let session = playing_session(120_000_000);
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.usable_end(), 110_000_000);
        assert_eq!(session.device.calls, vec!["open", "start"]);
    }

    #[test]
    fn play_twice_is_rejected() {
        let mut session = playing_session(120_000_000);
        let err = session.play(&clip_of_us(120_000_000)).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition(_)));
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[test]
    fn pause_then_resume_restores_position() {
        let mut session = playing_session(120_000_000);
        session.device.position = 30_000_000;

        session.pause().unwrap();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(session.pause_position(), 30_000_000);

        session.resume().unwrap();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.device.position, 30_000_000);
    }

    #[test]
    fn pause_clamps_position_to_usable_end() {
        let mut session = playing_session(120_000_000);
        session.device.position = 115_000_000; // inside the tail guard

        session.pause().unwrap();
        assert_eq!(session.pause_position(), 110_000_000);
    }

    #[test]
    fn pause_while_paused_is_rejected_without_mutation() {
        let mut session = playing_session(120_000_000);
        session.device.position = 30_000_000;
        session.pause().unwrap();

        let err = session.pause().unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition(_)));
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(session.pause_position(), 30_000_000);
    }

    #[test]
    fn resume_while_playing_is_rejected_without_mutation() {
        let mut session = playing_session(120_000_000);
        let err = session.resume().unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition(_)));
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[test]
    fn pause_before_play_is_rejected() {
        let mut session = PlaybackSession::new(FakeClip::default());
        assert!(matches!(
            session.pause(),
            Err(SessionError::InvalidTransition(_))
        ));
        assert!(matches!(
            session.seek(1_000_000),
            Err(SessionError::InvalidTransition(_))
        ));
    }

    #[test]
    fn restart_resets_pause_position() {
        let mut session = playing_session(120_000_000);
        session.device.position = 30_000_000;
        session.pause().unwrap();

        session.restart().unwrap();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.pause_position(), 0);
        assert_eq!(session.device.position, 0);
    }

    #[test]
    fn restart_while_playing_stops_first() {
        let mut session = playing_session(120_000_000);
        session.device.calls.clear();

        session.restart().unwrap();
        assert_eq!(session.device.calls, vec!["stop", "set_position", "start"]);
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[test]
    fn seek_out_of_range_leaves_state_unchanged() {
        let mut session = playing_session(120_000_000);
        session.device.position = 30_000_000;
        session.pause().unwrap();

        for target in [0, 110_000_000, 200_000_000] {
            let err = session.seek(target).unwrap_err();
            assert!(matches!(err, SessionError::SeekOutOfRange { .. }));
            assert_eq!(session.state(), PlaybackState::Paused);
            assert_eq!(session.pause_position(), 30_000_000);
        }
    }

    #[test]
    fn seek_in_range_lands_playing() {
        let mut session = playing_session(120_000_000);
        session.seek(45_000_000).unwrap();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.pause_position(), 45_000_000);
        assert_eq!(session.device.position, 45_000_000);
    }

    #[test]
    fn seek_after_natural_end_replays() {
        let mut session = playing_session(120_000_000);
        session.device.running = false;
        assert!(session.poll_ended());
        assert_eq!(session.state(), PlaybackState::Stopped);

        session.seek(45_000_000).unwrap();
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[test]
    fn close_is_terminal() {
        let mut session = playing_session(120_000_000);
        session.close().unwrap();
        assert_eq!(session.state(), PlaybackState::Closed);
        assert_eq!(session.device.closes, 1);

        assert!(matches!(
            session.pause(),
            Err(SessionError::InvalidTransition(_))
        ));
        assert!(matches!(
            session.resume(),
            Err(SessionError::InvalidTransition(_))
        ));
        assert!(matches!(
            session.restart(),
            Err(SessionError::InvalidTransition(_))
        ));
        assert!(matches!(
            session.seek(45_000_000),
            Err(SessionError::InvalidTransition(_))
        ));
        assert!(matches!(
            session.close(),
            Err(SessionError::InvalidTransition(_))
        ));
        assert_eq!(session.device.closes, 1);
    }

    #[test]
    fn natural_end_is_reported_once() {
        let mut session = playing_session(120_000_000);
        assert!(!session.poll_ended());

        session.device.running = false;
        assert!(session.poll_ended());
        assert_eq!(session.state(), PlaybackState::Stopped);
        assert!(!session.poll_ended());
    }

    #[test]
    fn device_failure_closes_the_session() {
        let mut session = playing_session(120_000_000);
        session.device.position = 30_000_000;
        session.pause().unwrap();

        session.device.fail_start = true;
        let err = session.resume().unwrap_err();
        assert!(matches!(err, SessionError::Device(_)));
        assert_eq!(session.state(), PlaybackState::Closed);
        assert_eq!(session.device.closes, 1);
    }

    #[test]
    fn full_interactive_scenario() {
        // 120 s clip: play, pause at 30 s, seek to 00:45, close.
        let mut session = playing_session(120_000_000);
        assert_eq!(session.state(), PlaybackState::Playing);

        session.device.position = 30_000_000;
        session.pause().unwrap();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(session.pause_position(), 30_000_000);

        let target = parse_timecode("00:45").unwrap();
        assert_eq!(target, 45_000_000);
        assert!(target < session.usable_end());
        session.seek(target).unwrap();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.device.position, 45_000_000);

        session.close().unwrap();
        assert_eq!(session.state(), PlaybackState::Closed);
        assert_eq!(session.device.closes, 1);
    }
}
