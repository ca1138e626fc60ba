//! Environments that feed observations to the policy.
//!
//! Reward and termination are decided by the environment; the harness only
//! sums rewards and stops on `done`.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::decoder::Action;
use crate::error::{PolicyError, PolicyResult};

/// What the environment returns after an action.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Next observation.
    pub observation: Vec<f64>,
    /// Reward for the action.
    pub reward: f64,
    /// Whether the episode ended.
    pub done: bool,
}

/// An episodic environment.
pub trait Environment: Send {
    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> PolicyResult<Vec<f64>>;

    /// Apply `action` and advance one step.
    fn step(&mut self, action: &Action) -> PolicyResult<Transition>;
}

/// One line of a replay trace.
///
/// Either a bare observation array or an object with reward and done flag:
///
/// ```text
/// [0.1, -0.3, 0.0, 0.02]
/// {"observation": [0.1, -0.3, 0.0, 0.02], "reward": 1.0, "done": true}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceEntry {
    /// Observation only.
    Observation(Vec<f64>),
    /// Observation with reward and termination.
    Step {
        /// Observation.
        observation: Vec<f64>,
        /// Reward received on arriving at this observation.
        #[serde(default)]
        reward: f64,
        /// Whether this observation ends an episode.
        #[serde(default)]
        done: bool,
    },
}

impl TraceEntry {
    fn observation(&self) -> &[f64] {
        match self {
            TraceEntry::Observation(o) | TraceEntry::Step { observation: o, .. } => o,
        }
    }

    fn reward(&self) -> f64 {
        match self {
            TraceEntry::Observation(_) => 0.0,
            TraceEntry::Step { reward, .. } => *reward,
        }
    }

    fn done(&self) -> bool {
        matches!(self, TraceEntry::Step { done: true, .. })
    }
}

/// A recorded observation trace, split into episodes at `done` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    episodes: Vec<Vec<TraceEntry>>,
}

impl Trace {
    /// Read a JSON Lines trace.
    pub fn load(path: &Path) -> PolicyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PolicyError::Environment(format!("cannot read trace '{}': {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Parse JSON Lines trace text.
    pub fn parse(text: &str) -> PolicyResult<Self> {
        let entries = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<TraceEntry>(line).map_err(|e| {
                    PolicyError::Environment(format!("trace line {}: {e}", i + 1))
                })
            })
            .collect::<PolicyResult<Vec<_>>>()?;
        Self::from_entries(entries)
    }

    /// Build a trace from entries.
    pub fn from_entries(entries: Vec<TraceEntry>) -> PolicyResult<Self> {
        let mut episodes = vec![];
        let mut current = vec![];
        for entry in entries {
            let done = entry.done();
            current.push(entry);
            if done {
                episodes.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            episodes.push(current);
        }
        if episodes.is_empty() {
            return Err(PolicyError::Environment("trace is empty".into()));
        }
        Ok(Self { episodes })
    }

    /// A single-episode trace of bare observations.
    pub fn from_observations(observations: Vec<Vec<f64>>) -> PolicyResult<Self> {
        Self::from_entries(observations.into_iter().map(TraceEntry::Observation).collect())
    }

    /// Number of recorded episodes.
    pub fn num_episodes(&self) -> usize {
        self.episodes.len()
    }
}

/// Replays one episode of a [`Trace`], ignoring the actions it receives.
///
/// Episode `k` of an evaluation replays recorded episode `k mod n`.
#[derive(Debug, Clone)]
pub struct ReplayEnvironment {
    trace: Arc<Trace>,
    episode: usize,
    cursor: usize,
}

impl ReplayEnvironment {
    /// Replay recorded episode `episode mod n` of `trace`.
    pub fn new(trace: Arc<Trace>, episode: usize) -> Self {
        let episode = episode % trace.episodes.len().max(1);
        Self {
            trace,
            episode,
            cursor: 0,
        }
    }

    fn entries(&self) -> &[TraceEntry] {
        self.trace
            .episodes
            .get(self.episode)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Environment for ReplayEnvironment {
    fn reset(&mut self) -> PolicyResult<Vec<f64>> {
        self.cursor = 0;
        self.entries()
            .first()
            .map(|e| e.observation().to_vec())
            .ok_or_else(|| PolicyError::Environment("replayed episode is empty".into()))
    }

    fn step(&mut self, _action: &Action) -> PolicyResult<Transition> {
        let next = self.cursor + 1;
        let entries = self.entries();
        // A one-entry episode ends on its first action.
        if let ([only], 1) = (entries, next) {
            let transition = Transition {
                observation: only.observation().to_vec(),
                reward: 0.0,
                done: true,
            };
            self.cursor = next;
            return Ok(transition);
        }
        let Some(entry) = entries.get(next) else {
            return Err(PolicyError::Environment(
                "stepped past the end of the replayed episode".into(),
            ));
        };
        let transition = Transition {
            observation: entry.observation().to_vec(),
            reward: entry.reward(),
            done: entry.done() || next + 1 == entries.len(),
        };
        self.cursor = next;
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = r#"
[0.0, 0.0]
{"observation": [0.5, -0.5], "reward": 1.0}
{"observation": [1.0, -1.0], "reward": 2.0, "done": true}
[3.0, 3.0]
{"observation": [4.0, 4.0], "reward": -1.0}
"#;

    #[test]
    fn test_parse_splits_episodes() {
        let trace = Trace::parse(TRACE).unwrap();
        assert_eq!(trace.num_episodes(), 2);
    }

    #[test]
    fn test_replay_walks_episode() {
        let trace = Arc::new(Trace::parse(TRACE).unwrap());
        let mut env = ReplayEnvironment::new(trace, 0);
        assert_eq!(env.reset().unwrap(), vec![0.0, 0.0]);

        let t = env.step(&Action::Discrete(1)).unwrap();
        assert_eq!(t.observation, vec![0.5, -0.5]);
        assert_eq!(t.reward, 1.0);
        assert!(!t.done);

        let t = env.step(&Action::Discrete(0)).unwrap();
        assert_eq!(t.reward, 2.0);
        assert!(t.done);
        assert!(env.step(&Action::Discrete(0)).is_err());
    }

    #[test]
    fn test_episode_index_wraps() {
        let trace = Arc::new(Trace::parse(TRACE).unwrap());
        let mut env = ReplayEnvironment::new(trace, 3);
        assert_eq!(env.reset().unwrap(), vec![3.0, 3.0]);
        let t = env.step(&Action::Continuous(0.2)).unwrap();
        assert!(t.done, "last entry of the trace ends the episode");
    }

    #[test]
    fn test_single_entry_episode_ends_after_one_action() {
        let trace = Arc::new(Trace::from_observations(vec![vec![0.0; 3]]).unwrap());
        let mut env = ReplayEnvironment::new(trace, 0);
        env.reset().unwrap();
        let t = env.step(&Action::Discrete(0)).unwrap();
        assert!(t.done);
        assert!(env.step(&Action::Discrete(0)).is_err());
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = Trace::parse("[0.0]\n{oops}\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(Trace::parse("\n\n").is_err());
    }
}
