//! Frame driver for the simulation render loop.
//!
//! The driver never owns a thread or a timer. A host hands it a
//! [`DisplayScheduler`] (requestAnimationFrame in the browser, redraw requests
//! under winit, a [`ManualScheduler`] in tests) and forwards every fired frame
//! to [`FrameDriver::on_display_frame`]. The driver throttles to the target
//! cadence, invokes the registered callback, and only asks for the next frame
//! once the current body has returned.

use std::fmt;
use std::time::Duration;

/// Cadence used when the caller does not specify one.
pub const DEFAULT_TARGET_FPS: f32 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no frame callback registered; call set_loop first")]
    NoCallback,
    #[error("frame loop is already running")]
    AlreadyRunning,
}

/// Token returned by a host when it schedules a display frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// The host's display-synchronized scheduling primitive.
pub trait DisplayScheduler {
    /// Asks the host to fire one display frame.
    fn request_frame(&mut self) -> RequestId;
    /// Withdraws a request issued by [`DisplayScheduler::request_frame`].
    fn cancel_frame(&mut self, id: RequestId);
}

/// Upper bound on how often the callback runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameRate {
    Capped(f32),
    Uncapped,
}

impl FrameRate {
    /// Non-positive or non-finite values mean "run on every display frame".
    pub fn from_fps(fps: f32) -> Self {
        if fps.is_finite() && fps > 0.0 {
            FrameRate::Capped(fps)
        } else {
            FrameRate::Uncapped
        }
    }

    fn interval(self) -> Option<Duration> {
        match self {
            FrameRate::Capped(fps) => Some(Duration::from_secs_f64(1.0 / f64::from(fps))),
            FrameRate::Uncapped => None,
        }
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        FrameRate::Capped(DEFAULT_TARGET_FPS)
    }
}

/// Legacy timing hint accepted for compatibility; scheduling always goes
/// through the display scheduler regardless of the recorded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    Timeout,
    AnimationFrame,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No loop registered, or the loop was cancelled.
    Idle,
    Running,
    /// Stopped with the callback kept for [`FrameDriver::resume_loop`].
    Paused,
    /// The callback failed; nothing is scheduled until `set_loop` installs a
    /// new callback or `resume_loop` restarts the kept one.
    Halted,
}

/// Timing information handed to the frame callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    /// Invocation count since the last `set_loop`, starting at 1.
    pub frame_number: u64,
    /// Host timestamp of the display frame.
    pub timestamp: Duration,
    /// Time since the previous invocation; zero on the first frame after
    /// `set_loop` or `resume_loop`.
    pub delta: Duration,
}

pub type FrameCallback = Box<dyn FnMut(&FrameTick) -> anyhow::Result<()>>;

/// What happened when a display frame fired.
#[derive(Debug)]
pub enum FrameOutcome {
    /// The loop is not running; the fired frame was ignored.
    Inactive,
    /// Too little time elapsed; the next frame was requested without rendering.
    Throttled,
    Rendered,
    /// The callback failed and the loop stopped.
    Halted(anyhow::Error),
}

pub struct FrameDriver {
    callback: Option<FrameCallback>,
    state: LoopState,
    rate: FrameRate,
    last_invocation: Option<Duration>,
    pending: Option<RequestId>,
    frame_number: u64,
    timing: Option<(TimingMode, i32)>,
}

impl fmt::Debug for FrameDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDriver")
            .field("state", &self.state)
            .field("rate", &self.rate)
            .field("frame_number", &self.frame_number)
            .field("pending", &self.pending)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            callback: None,
            state: LoopState::Idle,
            rate: FrameRate::default(),
            last_invocation: None,
            pending: None,
            frame_number: 0,
            timing: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.rate
    }

    pub fn current_frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn timing(&self) -> Option<(TimingMode, i32)> {
        self.timing
    }

    /// Host timestamp from which the outstanding frame request can render.
    ///
    /// Hosts whose display frames are not paced by presentation (a throttled
    /// frame swaps nothing) wait until this instant before firing the request.
    /// `None` while no request is outstanding.
    pub fn next_due(&self) -> Option<Duration> {
        self.pending.as_ref()?;
        if self.state != LoopState::Running {
            return None;
        }
        Some(match (self.last_invocation, self.rate.interval()) {
            (Some(last), Some(interval)) => last + interval,
            _ => Duration::ZERO,
        })
    }

    /// Registers `callback` and starts scheduling it at `rate`.
    ///
    /// Any previously registered callback is dropped and its pending frame
    /// request withdrawn, so it can never fire again.
    pub fn set_loop<S>(&mut self, scheduler: &mut S, callback: FrameCallback, rate: FrameRate)
    where
        S: DisplayScheduler + ?Sized,
    {
        if self.callback.is_some() {
            tracing::debug!(state = ?self.state, "replacing registered frame callback");
        }
        self.withdraw_pending(scheduler);
        self.callback = Some(callback);
        self.rate = rate;
        self.frame_number = 0;
        self.last_invocation = None;
        self.state = LoopState::Running;
        tracing::info!(?rate, "starting frame loop");
        self.pending = Some(scheduler.request_frame());
    }

    /// Stops scheduling and forgets the callback. Safe to call repeatedly.
    pub fn cancel_loop<S>(&mut self, scheduler: &mut S)
    where
        S: DisplayScheduler + ?Sized,
    {
        self.withdraw_pending(scheduler);
        if self.callback.take().is_some() {
            tracing::info!("frame loop cancelled");
        }
        self.state = LoopState::Idle;
    }

    /// Stops scheduling but keeps the callback for [`FrameDriver::resume_loop`].
    pub fn pause_loop<S>(&mut self, scheduler: &mut S)
    where
        S: DisplayScheduler + ?Sized,
    {
        if self.state != LoopState::Running {
            return;
        }
        self.withdraw_pending(scheduler);
        self.state = LoopState::Paused;
        tracing::debug!(frame = self.frame_number, "frame loop paused");
    }

    /// Restarts the last registered callback at its previous cadence.
    pub fn resume_loop<S>(&mut self, scheduler: &mut S) -> Result<(), DriverError>
    where
        S: DisplayScheduler + ?Sized,
    {
        if self.state == LoopState::Running {
            return Err(DriverError::AlreadyRunning);
        }
        if self.callback.is_none() {
            return Err(DriverError::NoCallback);
        }
        self.last_invocation = None;
        self.state = LoopState::Running;
        self.pending = Some(scheduler.request_frame());
        tracing::debug!(frame = self.frame_number, "frame loop resumed");
        Ok(())
    }

    /// Records a legacy timing hint. Always succeeds.
    pub fn set_timing(&mut self, mode: TimingMode, value: i32) {
        tracing::debug!(?mode, value, "frame loop timing hint recorded");
        self.timing = Some((mode, value));
    }

    /// Handles one fired display frame at host time `now`.
    pub fn on_display_frame<S>(&mut self, scheduler: &mut S, now: Duration) -> FrameOutcome
    where
        S: DisplayScheduler + ?Sized,
    {
        self.pending = None;
        if self.state != LoopState::Running {
            return FrameOutcome::Inactive;
        }
        let Some(callback) = self.callback.as_mut() else {
            self.state = LoopState::Idle;
            return FrameOutcome::Inactive;
        };

        let due = match (self.last_invocation, self.rate.interval()) {
            (Some(last), Some(interval)) => now.saturating_sub(last) >= interval,
            _ => true,
        };
        if !due {
            self.pending = Some(scheduler.request_frame());
            return FrameOutcome::Throttled;
        }

        let delta = self
            .last_invocation
            .map(|last| now.saturating_sub(last))
            .unwrap_or(Duration::ZERO);
        self.frame_number += 1;
        let tick = FrameTick {
            frame_number: self.frame_number,
            timestamp: now,
            delta,
        };

        if let Err(error) = callback(&tick) {
            tracing::error!(frame = tick.frame_number, error = %error, "frame callback failed; halting loop");
            self.state = LoopState::Halted;
            return FrameOutcome::Halted(error);
        }

        self.last_invocation = Some(now);
        if self.state == LoopState::Running {
            self.pending = Some(scheduler.request_frame());
        }
        FrameOutcome::Rendered
    }

    fn withdraw_pending<S>(&mut self, scheduler: &mut S)
    where
        S: DisplayScheduler + ?Sized,
    {
        if let Some(id) = self.pending.take() {
            scheduler.cancel_frame(id);
        }
    }
}

/// Scheduler whose frames fire only when the owner pumps them.
///
/// Used by headless runs and tests: [`ManualScheduler::take_pending`] yields
/// the outstanding request, if any, so the caller can forward it to the driver.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: Option<RequestId>,
    requested: u64,
    cancelled: u64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_pending(&mut self) -> Option<RequestId> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Total number of frame requests issued so far.
    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }
}

impl DisplayScheduler for ManualScheduler {
    fn request_frame(&mut self) -> RequestId {
        self.next_id += 1;
        self.requested += 1;
        let id = RequestId(self.next_id);
        self.pending = Some(id);
        id
    }

    fn cancel_frame(&mut self, id: RequestId) {
        if self.pending == Some(id) {
            self.pending = None;
            self.cancelled += 1;
        }
    }
}
