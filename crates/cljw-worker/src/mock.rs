//! In-process mock environments.
//!
//! [`MockFactory`] hands out environments that never leave the process. It
//! records every create / load / invoke / discard so tests can check which
//! environment served a request, and it flags any moment where two
//! environments of the same role were alive at once.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::environment::{Environment, EnvironmentError, EnvironmentFactory, Invocation};
use crate::identity::{EnvironmentId, EnvironmentIds, UnitId};
use crate::roles::Role;

/// One recorded environment operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentEvent {
    Created { id: EnvironmentId, role: Role },
    LocationAdded { id: EnvironmentId, location: String },
    Invoked { id: EnvironmentId, entry_point: String },
    Discarded { id: EnvironmentId },
}

/// Scripted reply for an entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Return this value with the given output.
    Value { value: Value, output: String },
    /// Raise with this message.
    Fail { message: String, output: String },
}

impl MockReply {
    pub fn value(value: Value) -> Self {
        Self::Value {
            value,
            output: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
            output: String::new(),
        }
    }
}

/// Shared state behind a [`MockFactory`] and its environments.
#[derive(Debug, Default)]
pub struct MockState {
    ids: EnvironmentIds,
    events: Vec<EnvironmentEvent>,
    live: HashMap<Role, EnvironmentId>,
    overlaps: Vec<(EnvironmentId, EnvironmentId)>,
    leaked: Vec<EnvironmentId>,
    queued: HashMap<String, VecDeque<MockReply>>,
    defaults: HashMap<String, MockReply>,
    failing_locations: HashSet<String>,
}

impl MockState {
    fn next_reply(&mut self, entry_point: &str) -> MockReply {
        if let Some(reply) = self
            .queued
            .get_mut(entry_point)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.defaults
            .get(entry_point)
            .cloned()
            .unwrap_or_else(|| MockReply::value(Value::Null))
    }
}

/// Factory for in-process environments.
///
/// Cloning shares the underlying state, so a test can keep one handle for
/// assertions while a dispatcher owns another.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Public API for test configuration ===

    /// Reply with `value` whenever `entry_point` has nothing queued.
    pub fn respond(&self, entry_point: &str, value: Value) -> &Self {
        self.state()
            .defaults
            .insert(entry_point.to_string(), MockReply::value(value));
        self
    }

    /// Reply with `value` the next time `entry_point` is invoked.
    pub fn respond_once(&self, entry_point: &str, value: Value) -> &Self {
        self.queue(entry_point, MockReply::value(value))
    }

    /// Raise the next time `entry_point` is invoked.
    pub fn fail_once(&self, entry_point: &str, message: &str) -> &Self {
        self.queue(entry_point, MockReply::fail(message))
    }

    /// Queue an arbitrary reply for `entry_point`.
    pub fn queue(&self, entry_point: &str, reply: MockReply) -> &Self {
        self.state()
            .queued
            .entry(entry_point.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Make every load of `location` fail as unresolvable.
    pub fn fail_location(&self, location: &str) -> &Self {
        self.state().failing_locations.insert(location.to_string());
        self
    }

    /// Let `location` load again.
    pub fn heal_location(&self, location: &str) -> &Self {
        self.state().failing_locations.remove(location);
        self
    }

    // === Public API for test assertions ===

    /// Every recorded event, oldest first.
    pub fn events(&self) -> Vec<EnvironmentEvent> {
        self.state().events.clone()
    }

    /// Environments created for `role`, oldest first.
    pub fn created(&self, role: Role) -> Vec<EnvironmentId> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                EnvironmentEvent::Created { id, role: r } if *r == role => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// How many times `id` was discarded.
    pub fn discards(&self, id: EnvironmentId) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| matches!(event, EnvironmentEvent::Discarded { id: d } if *d == id))
            .count()
    }

    /// Entry points invoked in `id`, in order.
    pub fn invocations(&self, id: EnvironmentId) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                EnvironmentEvent::Invoked { id: i, entry_point } if *i == id => {
                    Some(entry_point.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// The live environment for `role`, if any.
    pub fn live(&self, role: Role) -> Option<EnvironmentId> {
        self.state().live.get(&role).copied()
    }

    /// Pairs `(alive, created)` where an environment was created while
    /// another of the same role was still alive. Empty when the one-live-
    /// environment-per-role rule held.
    pub fn overlaps(&self) -> Vec<(EnvironmentId, EnvironmentId)> {
        self.state().overlaps.clone()
    }

    /// Environments dropped without being discarded.
    pub fn leaked(&self) -> Vec<EnvironmentId> {
        self.state().leaked.clone()
    }

    /// Forget recorded events (configuration is kept).
    pub fn clear_events(&self) {
        self.state().events.clear();
    }
}

impl EnvironmentFactory for MockFactory {
    fn create(&mut self, role: Role) -> Result<Box<dyn Environment>, EnvironmentError> {
        let mut state = self.state();
        let id = state.ids.allocate();
        if let Some(alive) = state.live.insert(role, id) {
            state.overlaps.push((alive, id));
        }
        state.events.push(EnvironmentEvent::Created { id, role });
        drop(state);

        Ok(Box::new(MockEnvironment {
            id,
            role,
            locations: Vec::new(),
            units: BTreeSet::new(),
            discarded: false,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Environment handed out by [`MockFactory`].
pub struct MockEnvironment {
    id: EnvironmentId,
    role: Role,
    locations: Vec<String>,
    units: BTreeSet<UnitId>,
    discarded: bool,
    state: Arc<Mutex<MockState>>,
}

impl MockEnvironment {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for MockEnvironment {
    fn id(&self) -> EnvironmentId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn locations(&self) -> &[String] {
        &self.locations
    }

    fn add_location(&mut self, location: &str) -> Result<bool, EnvironmentError> {
        if self.has_location(location) {
            return Ok(false);
        }
        let mut state = self.state();
        if state.failing_locations.contains(location) {
            return Err(EnvironmentError::Resolution {
                location: location.to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        state.events.push(EnvironmentEvent::LocationAdded {
            id: self.id,
            location: location.to_string(),
        });
        drop(state);
        self.locations.push(location.to_string());
        Ok(true)
    }

    fn invoke(&mut self, entry_point: &str, _payload: &str) -> Result<Invocation, EnvironmentError> {
        let reply = {
            let mut state = self.state();
            state.events.push(EnvironmentEvent::Invoked {
                id: self.id,
                entry_point: entry_point.to_string(),
            });
            state.next_reply(entry_point)
        };
        self.units.insert(UnitId::new(self.id, entry_point));
        match reply {
            MockReply::Value { value, output } => Ok(Invocation { value, output }),
            MockReply::Fail { message, output } => Err(EnvironmentError::Guest {
                entry_point: entry_point.to_string(),
                message,
                output,
            }),
        }
    }

    fn units(&self) -> &BTreeSet<UnitId> {
        &self.units
    }

    fn discard(mut self: Box<Self>) -> Result<(), EnvironmentError> {
        self.discarded = true;
        let mut state = self.state();
        if state.live.get(&self.role) == Some(&self.id) {
            state.live.remove(&self.role);
        }
        state.events.push(EnvironmentEvent::Discarded { id: self.id });
        Ok(())
    }
}

impl Drop for MockEnvironment {
    fn drop(&mut self) {
        if !self.discarded {
            let id = self.id;
            let role = self.role;
            let mut state = self.state();
            state.leaked.push(id);
            if state.live.get(&role) == Some(&id) {
                state.live.remove(&role);
            }
        }
    }
}
