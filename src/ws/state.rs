//! Connection lifecycle state machine.
//!
//! [`StateMachine`] is a pure mapping from the current state and an incoming [`Event`] to the next
//! state and a list of [`Effect`]s. It never touches a socket or a timer itself; the driver in
//! [`super::connection`] executes the effects in order.

use super::config::ReconnectConfig;

/// Externally observable connection status.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Status {
    /// Not connected. Initial state, waiting state between reconnect attempts, and the final state
    /// after teardown.
    #[default]
    Disconnected,
    /// A transport is being opened
    Connecting,
    /// The transport is open and delivering messages
    Connected,
    /// The transport reported an error, or the reconnect attempts are exhausted
    Failed,
}

impl Status {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Inputs to the state machine.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The transport finished opening
    OpenSucceeded,
    /// The transport could not be opened (refused, handshake error, connect timeout)
    OpenFailed,
    /// A live transport reported an error. The transport is not closed by this event.
    TransportError,
    /// A live transport closed, either remotely or because the network dropped
    TransportClosed,
    /// The reconnect timer elapsed
    TimerFired,
    /// Caller asked for a fresh connection
    ForceReconnect,
    /// Caller tore the manager down
    Teardown,
}

/// Side effects requested by a transition, to be executed in order.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Open a new transport to the target
    Open,
    /// Close the live transport
    CloseTransport,
    /// Arm the single reconnect timer for the given attempt number
    ArmTimer { attempt: u32 },
    /// Cancel the armed reconnect timer
    CancelTimer,
    /// Publish a status transition
    EmitStatus(Status),
    /// Invoke the caller's `on_open`
    NotifyOpen,
    /// Invoke the caller's `on_close`
    NotifyClose,
    /// Invoke the caller's `on_error`
    NotifyError,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    status: Status,
    attempt: u32,
    auto_reconnect: bool,
    max_attempts: u32,
    timer_armed: bool,
    transport_live: bool,
    torn_down: bool,
}

impl StateMachine {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            status: Status::Disconnected,
            attempt: 0,
            auto_reconnect: config.enabled,
            max_attempts: config.max_attempts,
            timer_armed: false,
            transport_live: false,
            torn_down: false,
        }
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Consecutive reconnect attempts since construction or the last successful open.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    #[must_use]
    pub const fn transport_live(&self) -> bool {
        self.transport_live
    }

    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Begin the first connection attempt.
    pub fn start(&mut self) -> Vec<Effect> {
        if self.torn_down || self.status != Status::Disconnected || self.transport_live {
            return Vec::new();
        }

        let mut effects = Vec::with_capacity(2);
        self.begin_open(&mut effects);
        effects
    }

    /// Apply `event` and return the effects the driver must execute.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.torn_down {
            return effects;
        }

        match event {
            Event::OpenSucceeded => {
                if self.status != Status::Connecting {
                    return effects;
                }
                self.attempt = 0;
                self.transition(Status::Connected, &mut effects);
                effects.push(Effect::NotifyOpen);
            }
            Event::OpenFailed => {
                if self.status != Status::Connecting {
                    return effects;
                }
                self.transport_live = false;
                effects.push(Effect::NotifyError);
                self.apply_reconnect_policy(&mut effects);
            }
            Event::TransportError => {
                if !self.transport_live {
                    return effects;
                }
                self.transition(Status::Failed, &mut effects);
                effects.push(Effect::NotifyError);
            }
            Event::TransportClosed => {
                if !self.transport_live {
                    return effects;
                }
                self.transport_live = false;
                self.transition(Status::Disconnected, &mut effects);
                effects.push(Effect::NotifyClose);
                self.apply_reconnect_policy(&mut effects);
            }
            Event::TimerFired => {
                // A fire after cancellation is stale.
                if !self.timer_armed {
                    return effects;
                }
                self.timer_armed = false;
                self.begin_open(&mut effects);
            }
            Event::ForceReconnect => {
                self.release_resources(&mut effects);
                self.attempt = 0;
                self.begin_open(&mut effects);
            }
            Event::Teardown => {
                self.release_resources(&mut effects);
                self.status = Status::Disconnected;
                self.torn_down = true;
            }
        }

        effects
    }

    fn begin_open(&mut self, effects: &mut Vec<Effect>) {
        self.transport_live = true;
        self.transition(Status::Connecting, effects);
        effects.push(Effect::Open);
    }

    fn release_resources(&mut self, effects: &mut Vec<Effect>) {
        if self.timer_armed {
            self.timer_armed = false;
            effects.push(Effect::CancelTimer);
        }
        if self.transport_live {
            self.transport_live = false;
            effects.push(Effect::CloseTransport);
        }
    }

    /// Decide what happens after an unsolicited close or a failed open.
    fn apply_reconnect_policy(&mut self, effects: &mut Vec<Effect>) {
        if !self.auto_reconnect {
            self.transition(Status::Disconnected, effects);
            return;
        }

        if self.attempt >= self.max_attempts {
            self.transition(Status::Failed, effects);
            return;
        }

        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            self.transition(Status::Failed, effects);
            return;
        }

        self.transition(Status::Disconnected, effects);
        if self.timer_armed {
            effects.push(Effect::CancelTimer);
        }
        self.timer_armed = true;
        effects.push(Effect::ArmTimer {
            attempt: self.attempt,
        });
    }

    fn transition(&mut self, next: Status, effects: &mut Vec<Effect>) {
        if self.status != next {
            self.status = next;
            effects.push(Effect::EmitStatus(next));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ws::config::DelayStrategy;

    fn machine(max_attempts: u32) -> StateMachine {
        StateMachine::new(
            &ReconnectConfig::builder()
                .max_attempts(max_attempts)
                .strategy(DelayStrategy::Fixed(Duration::from_secs(3)))
                .build(),
        )
    }

    fn count_timers(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::ArmTimer { .. }))
            .count()
    }

    #[test]
    fn start_opens_transport() {
        let mut sm = machine(5);
        let effects = sm.start();

        assert_eq!(
            effects,
            vec![Effect::EmitStatus(Status::Connecting), Effect::Open]
        );
        assert_eq!(sm.status(), Status::Connecting);
        assert!(sm.start().is_empty(), "second start must be ignored");
    }

    #[test]
    fn five_failed_opens_end_in_failed_with_four_timers() {
        let mut sm = machine(5);
        let mut timers = 0;
        sm.start();

        for _ in 0..5 {
            let effects = sm.handle(Event::OpenFailed);
            timers += count_timers(&effects);
            if sm.timer_armed() {
                sm.handle(Event::TimerFired);
            }
        }

        assert_eq!(sm.status(), Status::Failed);
        assert_eq!(sm.attempt(), 5);
        assert_eq!(timers, 4);
        assert!(!sm.timer_armed(), "no timer after the cap is reached");
        assert!(sm.handle(Event::TimerFired).is_empty());
        assert!(sm.handle(Event::OpenFailed).is_empty());
    }

    #[test]
    fn open_resets_attempts() {
        let mut sm = machine(5);
        sm.start();
        sm.handle(Event::OpenFailed);
        sm.handle(Event::TimerFired);
        sm.handle(Event::OpenFailed);
        assert_eq!(sm.attempt(), 2);

        sm.handle(Event::TimerFired);
        let effects = sm.handle(Event::OpenSucceeded);
        assert_eq!(
            effects,
            vec![Effect::EmitStatus(Status::Connected), Effect::NotifyOpen]
        );
        assert_eq!(sm.attempt(), 0);

        sm.handle(Event::TransportClosed);
        assert_eq!(sm.attempt(), 1);
    }

    #[test]
    fn unexpected_close_schedules_reconnect() {
        let mut sm = machine(5);
        sm.start();
        sm.handle(Event::OpenSucceeded);

        let effects = sm.handle(Event::TransportClosed);
        assert_eq!(
            effects,
            vec![
                Effect::EmitStatus(Status::Disconnected),
                Effect::NotifyClose,
                Effect::ArmTimer { attempt: 1 },
            ]
        );

        let effects = sm.handle(Event::TimerFired);
        assert_eq!(
            effects,
            vec![Effect::EmitStatus(Status::Connecting), Effect::Open]
        );
        assert_eq!(sm.attempt(), 1);
    }

    #[test]
    fn error_does_not_close_transport() {
        let mut sm = machine(5);
        sm.start();
        sm.handle(Event::OpenSucceeded);

        let effects = sm.handle(Event::TransportError);
        assert_eq!(
            effects,
            vec![Effect::EmitStatus(Status::Failed), Effect::NotifyError]
        );
        assert!(sm.transport_live());

        let effects = sm.handle(Event::TransportClosed);
        assert!(effects.contains(&Effect::ArmTimer { attempt: 1 }));
        assert_eq!(sm.status(), Status::Disconnected);
    }

    #[test]
    fn disabled_reconnect_settles_disconnected() {
        let mut sm = StateMachine::new(&ReconnectConfig::builder().enabled(false).build());
        sm.start();
        sm.handle(Event::OpenSucceeded);

        let effects = sm.handle(Event::TransportClosed);
        assert_eq!(count_timers(&effects), 0);
        assert_eq!(sm.status(), Status::Disconnected);
        assert_eq!(sm.attempt(), 0);
    }

    #[test]
    fn zero_max_attempts_fails_immediately() {
        let mut sm = machine(0);
        sm.start();

        let effects = sm.handle(Event::OpenFailed);
        assert_eq!(count_timers(&effects), 0);
        assert_eq!(sm.status(), Status::Failed);
        assert_eq!(sm.attempt(), 0);
    }

    #[test]
    fn force_reconnect_cancels_timer_and_resets() {
        let mut sm = machine(5);
        sm.start();
        sm.handle(Event::OpenFailed);
        assert!(sm.timer_armed());

        let effects = sm.handle(Event::ForceReconnect);
        assert_eq!(
            effects,
            vec![
                Effect::CancelTimer,
                Effect::EmitStatus(Status::Connecting),
                Effect::Open
            ]
        );
        assert_eq!(sm.attempt(), 0);
        assert!(!sm.timer_armed());

        // The cancelled timer may still fire; it must not open a second transport.
        assert!(sm.handle(Event::TimerFired).is_empty());
    }

    #[test]
    fn force_reconnect_from_failed_restarts() {
        let mut sm = machine(1);
        sm.start();
        sm.handle(Event::OpenFailed);
        assert_eq!(sm.status(), Status::Failed);

        let effects = sm.handle(Event::ForceReconnect);
        assert_eq!(
            effects,
            vec![Effect::EmitStatus(Status::Connecting), Effect::Open]
        );
    }

    #[test]
    fn force_reconnect_closes_live_transport() {
        let mut sm = machine(5);
        sm.start();
        sm.handle(Event::OpenSucceeded);

        let effects = sm.handle(Event::ForceReconnect);
        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::EmitStatus(Status::Connecting),
                Effect::Open
            ]
        );
        assert_eq!(sm.attempt(), 0);
        assert!(sm.transport_live());
    }

    #[test]
    fn teardown_is_terminal_and_idempotent() {
        let mut sm = machine(5);
        sm.start();
        sm.handle(Event::OpenFailed);

        let effects = sm.handle(Event::Teardown);
        assert_eq!(effects, vec![Effect::CancelTimer]);
        assert_eq!(sm.status(), Status::Disconnected);
        assert!(sm.is_torn_down());

        assert!(sm.handle(Event::Teardown).is_empty());
        assert!(sm.handle(Event::TimerFired).is_empty());
        assert!(sm.handle(Event::ForceReconnect).is_empty());
        assert!(sm.start().is_empty());
    }

    #[test]
    fn teardown_before_first_open_closes_transport() {
        let mut sm = machine(5);
        sm.start();

        let effects = sm.handle(Event::Teardown);
        assert_eq!(effects, vec![Effect::CloseTransport]);
        assert!(sm.handle(Event::OpenSucceeded).is_empty());
    }

    #[test]
    fn at_most_one_timer_and_one_transport() {
        let mut sm = machine(10);
        let mut timers = 0_i32;
        let mut transports = 1_i32;
        sm.start();

        for event in [
            Event::OpenFailed,
            Event::ForceReconnect,
            Event::OpenSucceeded,
            Event::TransportError,
            Event::TransportClosed,
            Event::ForceReconnect,
            Event::OpenFailed,
            Event::TimerFired,
            Event::OpenSucceeded,
            Event::ForceReconnect,
            Event::Teardown,
        ] {
            // The transport going away and the timer firing are not effects.
            if matches!(event, Event::OpenFailed | Event::TransportClosed) && sm.transport_live() {
                transports -= 1;
            }
            if event == Event::TimerFired && sm.timer_armed() {
                timers -= 1;
            }

            for effect in sm.handle(event) {
                match effect {
                    Effect::ArmTimer { .. } => timers += 1,
                    Effect::CancelTimer => timers -= 1,
                    Effect::Open => transports += 1,
                    Effect::CloseTransport => transports -= 1,
                    _ => {}
                }
                assert!(timers <= 1, "more than one pending timer after {event:?}");
                assert!(transports <= 1, "more than one live transport after {event:?}");
            }
        }

        assert_eq!(timers, 0, "teardown left a timer behind");
        assert_eq!(transports, 0, "teardown left a transport behind");
    }
}
