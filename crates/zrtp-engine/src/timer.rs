//! Per-channel retransmission timer: a single-shot scheduler with a
//! base/cap/max-firings policy that differs for Hello, non-Hello, and
//! ClearAck messages.
//!
//! `RetransmissionTimer` is a small plain struct the state machine owns per
//! channel rather than a spawned task: the engine is single-threaded and
//! cooperative, so there is no tokio timer here, only a tick driven by the
//! host.

/// Which retransmission policy applies to the message currently
/// outstanding on this channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerClass {
    Hello,
    NonHello,
    ClearAck,
}

impl TimerClass {
    pub const fn base_ms(self) -> u64 {
        match self {
            Self::Hello => 50,
            Self::NonHello => 150,
            Self::ClearAck => 5000,
        }
    }

    /// ClearAck has no stated cap in spec.md's table ("—"); its step never
    /// grows past its own base.
    pub const fn cap_ms(self) -> u64 {
        match self {
            Self::Hello => 200,
            Self::NonHello => 1200,
            Self::ClearAck => 5000,
        }
    }

    pub const fn max_firings(self) -> u32 {
        match self {
            Self::Hello => 20,
            Self::NonHello => 10,
            Self::ClearAck => 20,
        }
    }
}

/// `{on/off, firing_time, firing_count, step}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetransmissionTimer {
    pub on: bool,
    pub firing_time: u64,
    pub firing_count: u32,
    pub step: u64,
    class: Option<TimerClass>,
}

impl RetransmissionTimer {
    /// Arms the timer for `class`, starting at `now_ms + base`.
    pub fn start(&mut self, class: TimerClass, now_ms: u64) {
        self.on = true;
        self.class = Some(class);
        self.step = class.base_ms();
        self.firing_count = 0;
        self.firing_time = now_ms.saturating_add(self.step);
    }

    pub fn stop(&mut self) {
        self.on = false;
        self.class = None;
        self.firing_count = 0;
    }

    /// Called once per host `tick(now_ms)`. Returns `true` exactly when the
    /// caller should resend the outstanding message; advances `step` and
    /// `firing_count` per spec.md §4.2's adjustment rule, turning the timer
    /// off silently once `firing_count` exceeds `max_firings`.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.on || now_ms < self.firing_time {
            return false;
        }
        let class = self.class.expect("an armed timer always has a class");
        self.firing_count += 1;
        if self.firing_count > class.max_firings() {
            self.stop();
            return false;
        }
        self.step = (self.step * 2).min(class.cap_ms());
        self.firing_time = now_ms.saturating_add(self.step);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_timer_doubles_then_caps() {
        let mut t = RetransmissionTimer::default();
        t.start(TimerClass::Hello, 0);
        assert_eq!(t.step, 50);
        assert!(t.poll(50));
        assert_eq!(t.step, 100);
        assert!(t.poll(150));
        assert_eq!(t.step, 200);
        assert!(t.poll(350));
        assert_eq!(t.step, 200, "capped at 200ms");
    }

    #[test]
    fn clear_ack_timer_never_grows_past_base() {
        let mut t = RetransmissionTimer::default();
        t.start(TimerClass::ClearAck, 0);
        assert!(t.poll(5000));
        assert_eq!(t.step, 5000);
    }

    #[test]
    fn timer_turns_off_after_max_firings() {
        let mut t = RetransmissionTimer::default();
        t.start(TimerClass::Hello, 0);
        let mut now = 0u64;
        for _ in 0..TimerClass::Hello.max_firings() {
            now = t.firing_time;
            assert!(t.poll(now));
        }
        assert!(t.on, "still on right at the firing-count boundary");
        now = t.firing_time;
        assert!(!t.poll(now), "silently turns off past max_firings");
        assert!(!t.on);
    }

    #[test]
    fn poll_before_firing_time_does_nothing() {
        let mut t = RetransmissionTimer::default();
        t.start(TimerClass::NonHello, 1000);
        assert!(!t.poll(1001));
    }
}
