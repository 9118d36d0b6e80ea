//! Named OTG timeout channels and their configured durations.
//!
//! Every channel belongs to exactly one engine state: it is armed when that
//! state is entered and cancelled when the state is left. [`TimerBank`] hands
//! out a [`TimerToken`] per arm so that an expiry arriving after the channel
//! was cancelled or re-armed can be recognised as stale.

use core::fmt;
use core::time::Duration;

/// Number of timer channels driven by the engine.
pub const TIMER_COUNT: usize = 7;

/// Timeout channels used by the negotiation engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtgTimer {
    /// A-device waits for VBUS to rise after enabling the supply.
    AWaitVrise,
    /// A-device waits for a B-device to connect.
    AWaitBcon,
    /// A-device waits for the B-device to disconnect after suspending the bus.
    AAidlBdis,
    /// B-host waits for the A-device to connect after taking the host role.
    BAse0Brst,
    /// B-device requires the bus to idle before it may request a session.
    BSe0Srp,
    /// B-device gives up on an unanswered session request.
    BSrpFail,
    /// A-host gives the B-device time to enumerate before negotiating.
    AWaitEnum,
}

impl OtgTimer {
    /// All channels in index order.
    pub const ALL: [OtgTimer; TIMER_COUNT] = [
        OtgTimer::AWaitVrise,
        OtgTimer::AWaitBcon,
        OtgTimer::AAidlBdis,
        OtgTimer::BAse0Brst,
        OtgTimer::BSe0Srp,
        OtgTimer::BSrpFail,
        OtgTimer::AWaitEnum,
    ];

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            OtgTimer::AWaitVrise => 0,
            OtgTimer::AWaitBcon => 1,
            OtgTimer::AAidlBdis => 2,
            OtgTimer::BAse0Brst => 3,
            OtgTimer::BSe0Srp => 4,
            OtgTimer::BSrpFail => 5,
            OtgTimer::AWaitEnum => 6,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < TIMER_COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Identifier used by the REPL and transcripts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OtgTimer::AWaitVrise => "a_wait_vrise",
            OtgTimer::AWaitBcon => "a_wait_bcon",
            OtgTimer::AAidlBdis => "a_aidl_bdis",
            OtgTimer::BAse0Brst => "b_ase0_brst",
            OtgTimer::BSe0Srp => "b_se0_srp",
            OtgTimer::BSrpFail => "b_srp_fail",
            OtgTimer::AWaitEnum => "a_wait_enum",
        }
    }

    /// Looks up a channel by its identifier, ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|timer| timer.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for OtgTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default A-device VBUS rise allowance (OTG 2.0 `TA_VBUS_RISE` maximum).
pub const DEFAULT_A_WAIT_VRISE: Duration = Duration::from_millis(100);
/// Default B-connect wait (OTG 2.0 `TA_WAIT_BCON` minimum is 1.1 s).
pub const DEFAULT_A_WAIT_BCON: Duration = Duration::from_millis(1_100);
/// Default suspended-bus wait for the B-device to disconnect.
pub const DEFAULT_A_AIDL_BDIS: Duration = Duration::from_millis(5_000);
/// Default B-host wait for the A-device to connect.
pub const DEFAULT_B_ASE0_BRST: Duration = Duration::from_millis(155);
/// Default idle time required before SRP.
pub const DEFAULT_B_SE0_SRP: Duration = Duration::from_millis(1_000);
/// Default SRP response window.
pub const DEFAULT_B_SRP_FAIL: Duration = Duration::from_millis(5_000);
/// Default enumeration allowance before the A-host may grant HNP.
pub const DEFAULT_A_WAIT_ENUM: Duration = Duration::from_millis(200);

/// Durations handed to the timer service when a channel is armed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerConfig {
    durations: [Duration; TIMER_COUNT],
}

impl TimerConfig {
    /// Creates a configuration populated with the default durations.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            durations: [
                DEFAULT_A_WAIT_VRISE,
                DEFAULT_A_WAIT_BCON,
                DEFAULT_A_AIDL_BDIS,
                DEFAULT_B_ASE0_BRST,
                DEFAULT_B_SE0_SRP,
                DEFAULT_B_SRP_FAIL,
                DEFAULT_A_WAIT_ENUM,
            ],
        }
    }

    /// Returns a copy with `timer` overridden.
    #[must_use]
    pub const fn with(mut self, timer: OtgTimer, duration: Duration) -> Self {
        self.durations[timer.as_index()] = duration;
        self
    }

    /// Overrides the duration of `timer` in place.
    pub fn set(&mut self, timer: OtgTimer, duration: Duration) {
        self.durations[timer.as_index()] = duration;
    }

    #[must_use]
    pub const fn duration(&self, timer: OtgTimer) -> Duration {
        self.durations[timer.as_index()]
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies one arming of a channel.
///
/// Re-arming a channel bumps its generation, so a callback still carrying an
/// older token no longer matches.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerToken {
    pub timer: OtgTimer,
    pub generation: u16,
}

/// Current arm, if any, of every channel.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TimerBank {
    armed: [Option<u16>; TIMER_COUNT],
    generations: [u16; TIMER_COUNT],
}

impl TimerBank {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            armed: [None; TIMER_COUNT],
            generations: [0; TIMER_COUNT],
        }
    }

    #[must_use]
    pub const fn is_armed(&self, timer: OtgTimer) -> bool {
        self.armed[timer.as_index()].is_some()
    }

    /// Token of the pending arm of `timer`.
    #[must_use]
    pub fn current(&self, timer: OtgTimer) -> Option<TimerToken> {
        self.armed[timer.as_index()].map(|generation| TimerToken { timer, generation })
    }

    /// Arms `timer` under a fresh generation, superseding any pending arm.
    pub fn arm(&mut self, timer: OtgTimer) -> TimerToken {
        let index = timer.as_index();
        let generation = self.generations[index].wrapping_add(1);
        self.generations[index] = generation;
        self.armed[index] = Some(generation);
        TimerToken { timer, generation }
    }

    /// Clears the pending arm. Returns `true` when the timer was armed.
    pub fn disarm(&mut self, timer: OtgTimer) -> bool {
        self.armed[timer.as_index()].take().is_some()
    }

    /// Clears the pending arm only if `token` names it.
    pub fn disarm_token(&mut self, token: TimerToken) -> bool {
        if self.current(token.timer) == Some(token) {
            self.disarm(token.timer)
        } else {
            false
        }
    }

    /// Iterates over the channels currently armed, in index order.
    pub fn armed(&self) -> impl Iterator<Item = OtgTimer> + '_ {
        OtgTimer::ALL
            .iter()
            .copied()
            .filter(|timer| self.is_armed(*timer))
    }
}
