//! OutputStreamer: adaptive-interval scrollback sampler (SPEC_FULL §4.5).
//!
//! Grounded in the Design Notes' "promise-chained polling with mutable
//! caches" re-architecture guidance: one task per watched subject holding
//! its own interval and last snapshot, communicating results through
//! channels, rather than the teacher's own shape (which has no direct
//! adaptive-polling analogue) — closest in spirit to `router/canary.rs`'s
//! per-subject polling loop.

use std::collections::HashMap;
use std::time::Duration;

use crate::run::AgentName;

#[derive(Debug, Clone, Copy)]
pub struct StreamerConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamerEvent {
    Output {
        agent: AgentName,
        full_snapshot: String,
        is_new: bool,
    },
    NewOutput {
        agent: AgentName,
        delta: String,
    },
}

struct Subject {
    interval: Duration,
    stale_ticks: u32,
    last_snapshot: String,
}

/// Owns per-agent adaptive poll state. `sample` is called by the
/// orchestrator's event loop each time a pane capture becomes available;
/// this type does not itself own a timer task, matching the "channel
/// carries results, task owns its own state" guidance — the scheduling of
/// *when* to call `sample` is the caller's `tokio::time::sleep(next_interval)`
/// loop, using `next_interval_for` to decide how long to wait.
pub struct OutputStreamer {
    config: StreamerConfig,
    subjects: HashMap<AgentName, Subject>,
}

impl OutputStreamer {
    pub fn new(config: StreamerConfig) -> Self {
        Self {
            config,
            subjects: HashMap::new(),
        }
    }

    pub fn watch(&mut self, agent: AgentName) {
        self.subjects.insert(
            agent,
            Subject {
                interval: self.config.min_interval,
                stale_ticks: 0,
                last_snapshot: String::new(),
            },
        );
    }

    pub fn stop(&mut self, agent: AgentName) {
        self.subjects.remove(&agent);
    }

    pub fn is_watching(&self, agent: AgentName) -> bool {
        self.subjects.contains_key(&agent)
    }

    pub fn next_interval_for(&self, agent: AgentName) -> Duration {
        self.subjects
            .get(&agent)
            .map(|s| s.interval)
            .unwrap_or(self.config.min_interval)
    }

    /// Feed a fresh scrollback capture for `agent`, adjusting the poll
    /// interval and returning the events this sample produces.
    pub fn sample(&mut self, agent: AgentName, snapshot: String) -> Vec<StreamerEvent> {
        let config = self.config;
        let Some(subject) = self.subjects.get_mut(&agent) else {
            return Vec::new();
        };

        let changed = snapshot != subject.last_snapshot;
        let mut events = vec![StreamerEvent::Output {
            agent,
            full_snapshot: snapshot.clone(),
            is_new: changed,
        }];

        if changed {
            let delta = compute_delta(&subject.last_snapshot, &snapshot);
            events.push(StreamerEvent::NewOutput { agent, delta });
            subject.interval = halve(subject.interval, config.min_interval);
            subject.stale_ticks = 0;
            subject.last_snapshot = snapshot;
        } else {
            subject.stale_ticks += 1;
            if subject.stale_ticks >= 3 {
                subject.interval = grow(subject.interval, config.max_interval);
            }
        }

        events
    }
}

fn halve(interval: Duration, floor: Duration) -> Duration {
    let halved = interval.div_f64(2.0);
    halved.max(floor)
}

fn grow(interval: Duration, ceiling: Duration) -> Duration {
    let grown = interval.mul_f64(1.5);
    grown.min(ceiling)
}

/// Find the last line of `previous` inside `current` and return everything
/// after it; if that line cannot be located, fall back to the tail of
/// `current` (SPEC_FULL §4.5's delta rule).
pub fn compute_delta(previous: &str, current: &str) -> String {
    let Some(last_prev_line) = previous.lines().last() else {
        return current.to_string();
    };
    if let Some(pos) = current.rfind(last_prev_line) {
        let after = pos + last_prev_line.len();
        current[after..].trim_start_matches('\n').to_string()
    } else {
        current
            .lines()
            .last()
            .map(str::to_string)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_snapshot_only_emits_output_event() {
        let mut streamer = OutputStreamer::new(StreamerConfig::default());
        streamer.watch(AgentName::Builder);
        streamer.sample(AgentName::Builder, "hello".into());
        let events = streamer.sample(AgentName::Builder, "hello".into());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamerEvent::Output { is_new: false, .. }));
    }

    #[test]
    fn changed_snapshot_emits_both_events_and_halves_interval() {
        let mut streamer = OutputStreamer::new(StreamerConfig {
            min_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
        });
        streamer.watch(AgentName::Builder);
        streamer.sample(AgentName::Builder, "line1\n".into());
        let before = streamer.next_interval_for(AgentName::Builder);
        let events = streamer.sample(AgentName::Builder, "line1\nline2\n".into());
        let after = streamer.next_interval_for(AgentName::Builder);
        assert_eq!(events.len(), 2);
        assert!(after <= before);
    }

    #[test]
    fn interval_grows_after_three_stale_ticks() {
        let mut streamer = OutputStreamer::new(StreamerConfig {
            min_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
        });
        streamer.watch(AgentName::Builder);
        streamer.sample(AgentName::Builder, "x".into());
        for _ in 0..3 {
            streamer.sample(AgentName::Builder, "x".into());
        }
        assert!(streamer.next_interval_for(AgentName::Builder) > Duration::from_millis(250));
    }

    #[test]
    fn compute_delta_returns_text_after_last_known_line() {
        let previous = "a\nb\nc\n";
        let current = "a\nb\nc\nd\ne\n";
        assert_eq!(compute_delta(previous, current), "d\ne\n");
    }

    #[test]
    fn compute_delta_falls_back_to_tail_when_anchor_missing() {
        let previous = "unrelated\n";
        let current = "totally\ndifferent\ntail\n";
        assert_eq!(compute_delta(previous, current), "tail");
    }

    #[test]
    fn stop_then_sample_is_a_noop() {
        let mut streamer = OutputStreamer::new(StreamerConfig::default());
        streamer.watch(AgentName::Builder);
        streamer.stop(AgentName::Builder);
        assert!(streamer.sample(AgentName::Builder, "x".into()).is_empty());
    }
}
