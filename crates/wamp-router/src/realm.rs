//! Realm routing tables
//!
//! A realm owns the sessions attached to it together with the topic and
//! procedure registries. Every table sits behind one mutex, so mutations to
//! a realm are serialized; the lock is never held across an await.

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use wamp_core::{Error, Id, Result};

use crate::id::IdAllocator;
use crate::session::Session;

/// Disclosure policy for one topic uri
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicPolicy {
    pub uri: String,
    /// Reject publishes that ask for `disclose_me`
    pub disallow_disclose_me: bool,
    /// Always attach the publisher id to events
    pub auto_disclose: bool,
}

/// A realm declared up front
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RealmConfig {
    pub name: String,
    pub topics: Vec<TopicPolicy>,
}

impl RealmConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topics: Vec::new(),
        }
    }

    pub fn with_topic(mut self, policy: TopicPolicy) -> Self {
        self.topics.push(policy);
        self
    }
}

/// Topic lookup key
#[derive(Debug, Clone, Copy)]
pub enum TopicKey<'a> {
    Uri(&'a str),
    Id(Id),
}

impl<'a> From<&'a str> for TopicKey<'a> {
    fn from(uri: &'a str) -> Self {
        TopicKey::Uri(uri)
    }
}

impl From<Id> for TopicKey<'_> {
    fn from(id: Id) -> Self {
        TopicKey::Id(id)
    }
}

/// Snapshot of a topic taken under the realm lock
#[derive(Debug, Clone)]
pub struct Topic {
    pub id: Id,
    pub uri: String,
    pub subscribers: Vec<Arc<Session>>,
    pub disallow_disclose_me: bool,
    pub auto_disclose: bool,
}

/// Snapshot of a registered procedure
#[derive(Debug, Clone)]
pub struct Procedure {
    pub id: Id,
    pub uri: String,
    pub callee: Arc<Session>,
}

/// A freshly routed invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: Id,
    pub registration_id: Id,
    pub callee: Arc<Session>,
}

/// The caller side of an invocation
#[derive(Debug, Clone)]
pub struct PendingCall {
    /// The CALL request id to answer
    pub request_id: Id,
    pub caller_id: Id,
    /// `None` once the caller has left the realm
    pub caller: Option<Arc<Session>>,
}

struct TopicEntry {
    uri: String,
    subscribers: HashSet<Id>,
    disallow_disclose_me: bool,
    auto_disclose: bool,
}

struct ProcedureEntry {
    uri: String,
    callee: Id,
    /// invocation id -> (call request id, caller session id)
    pending: HashMap<Id, (Id, Id)>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<Id, Arc<Session>>,
    topic_ids: HashMap<String, Id>,
    topics: HashMap<Id, TopicEntry>,
    procedure_ids: HashMap<String, Id>,
    procedures: HashMap<Id, ProcedureEntry>,
    /// invocation id -> registration id
    invocations: HashMap<Id, Id>,
}

impl Tables {
    fn pending_call(&self, request_id: Id, caller_id: Id) -> PendingCall {
        PendingCall {
            request_id,
            caller_id,
            caller: self.sessions.get(&caller_id).cloned(),
        }
    }

    fn topic_snapshot(&self, id: Id, entry: &TopicEntry) -> Topic {
        Topic {
            id,
            uri: entry.uri.clone(),
            subscribers: entry
                .subscribers
                .iter()
                .filter_map(|sid| self.sessions.get(sid).cloned())
                .collect(),
            disallow_disclose_me: entry.disallow_disclose_me,
            auto_disclose: entry.auto_disclose,
        }
    }

    /// Drop a procedure and hand back the calls still waiting on it
    fn drop_procedure(&mut self, id: Id) -> Vec<PendingCall> {
        let Some(entry) = self.procedures.remove(&id) else {
            return Vec::new();
        };
        self.procedure_ids.remove(&entry.uri);

        let mut calls = Vec::with_capacity(entry.pending.len());
        for (invocation_id, (request_id, caller_id)) in entry.pending {
            self.invocations.remove(&invocation_id);
            calls.push(self.pending_call(request_id, caller_id));
        }
        calls
    }
}

/// An isolated routing namespace
pub struct Realm {
    name: String,
    policies: HashMap<String, TopicPolicy>,
    ids: IdAllocator,
    tables: Mutex<Tables>,
}

impl Realm {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(RealmConfig::new(name))
    }

    pub fn from_config(config: RealmConfig) -> Self {
        let policies = config
            .topics
            .into_iter()
            .map(|policy| (policy.uri.clone(), policy))
            .collect();

        Self {
            name: config.name,
            policies,
            ids: IdAllocator::new(),
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fresh realm-scoped id (publications)
    pub fn next_id(&self) -> Id {
        self.ids.next()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn add_session(&self, session: Arc<Session>) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.sessions.contains_key(&session.id) {
            return Err(Error::SessionAlreadyExists(session.id));
        }
        debug!("Session {} joined realm {}", session.id, self.name);
        tables.sessions.insert(session.id, session);
        Ok(())
    }

    /// Detach a session, dropping its subscriptions and registrations.
    ///
    /// Returns the calls that were waiting on procedures the session owned.
    pub fn remove_session(&self, session_id: Id) -> Result<Vec<PendingCall>> {
        let mut tables = self.tables.lock();
        if tables.sessions.remove(&session_id).is_none() {
            return Err(Error::NoSuchSession(session_id));
        }

        let mut emptied = Vec::new();
        for (id, topic) in tables.topics.iter_mut() {
            if topic.subscribers.remove(&session_id) && topic.subscribers.is_empty() {
                emptied.push(*id);
            }
        }
        for id in emptied {
            if let Some(topic) = tables.topics.remove(&id) {
                tables.topic_ids.remove(&topic.uri);
                debug!("Topic {} removed from realm {}", topic.uri, self.name);
            }
        }

        let owned: Vec<Id> = tables
            .procedures
            .iter()
            .filter(|(_, p)| p.callee == session_id)
            .map(|(id, _)| *id)
            .collect();
        let mut orphans = Vec::new();
        for id in owned {
            orphans.extend(tables.drop_procedure(id));
        }

        debug!("Session {} left realm {}", session_id, self.name);
        Ok(orphans)
    }

    pub fn session_count(&self) -> usize {
        self.tables.lock().sessions.len()
    }

    // =========================================================================
    // Broker
    // =========================================================================

    /// Subscribe a session, creating the topic on first use
    pub fn subscribe(&self, uri: &str, session_id: Id) -> Result<Id> {
        let mut tables = self.tables.lock();

        let existing = tables.topic_ids.get(uri).copied();
        if let Some(id) = existing {
            let topic = tables
                .topics
                .get_mut(&id)
                .ok_or(Error::NoSuchSubscription)?;
            if !topic.subscribers.insert(session_id) {
                return Err(Error::AlreadySubscribed(session_id));
            }
            return Ok(id);
        }

        let id = self.ids.next();
        let policy = self.policies.get(uri);
        tables.topics.insert(
            id,
            TopicEntry {
                uri: uri.to_string(),
                subscribers: HashSet::from([session_id]),
                disallow_disclose_me: policy.map_or(false, |p| p.disallow_disclose_me),
                auto_disclose: policy.map_or(false, |p| p.auto_disclose),
            },
        );
        tables.topic_ids.insert(uri.to_string(), id);
        info!("Topic {} created in realm {} as {}", uri, self.name, id);
        Ok(id)
    }

    pub fn unsubscribe(&self, topic_id: Id, session_id: Id) -> Result<()> {
        let mut tables = self.tables.lock();

        let topic = tables
            .topics
            .get_mut(&topic_id)
            .ok_or(Error::NoSuchSubscription)?;
        if !topic.subscribers.remove(&session_id) {
            return Err(Error::NoSuchSubscription);
        }

        if topic.subscribers.is_empty() {
            let uri = topic.uri.clone();
            tables.topics.remove(&topic_id);
            tables.topic_ids.remove(&uri);
            info!("Topic {} removed from realm {}", uri, self.name);
        }
        Ok(())
    }

    pub fn topic<'a>(&self, key: impl Into<TopicKey<'a>>) -> Result<Topic> {
        let tables = self.tables.lock();
        let id = match key.into() {
            TopicKey::Uri(uri) => *tables.topic_ids.get(uri).ok_or(Error::NoSuchSubscription)?,
            TopicKey::Id(id) => id,
        };
        let entry = tables.topics.get(&id).ok_or(Error::NoSuchSubscription)?;
        Ok(tables.topic_snapshot(id, entry))
    }

    pub fn topic_count(&self) -> usize {
        self.tables.lock().topics.len()
    }

    // =========================================================================
    // Dealer
    // =========================================================================

    pub fn register(&self, uri: &str, callee_id: Id) -> Result<Id> {
        let mut tables = self.tables.lock();
        if tables.procedure_ids.contains_key(uri) {
            return Err(Error::ProcedureAlreadyExists(uri.to_string()));
        }

        let id = self.ids.next();
        tables.procedures.insert(
            id,
            ProcedureEntry {
                uri: uri.to_string(),
                callee: callee_id,
                pending: HashMap::new(),
            },
        );
        tables.procedure_ids.insert(uri.to_string(), id);
        info!(
            "Procedure {} registered in realm {} by session {}",
            uri, self.name, callee_id
        );
        Ok(id)
    }

    /// Remove a registration owned by `callee_id`.
    ///
    /// Returns the calls that were still waiting on it.
    pub fn unregister(&self, registration_id: Id, callee_id: Id) -> Result<Vec<PendingCall>> {
        let mut tables = self.tables.lock();
        match tables.procedures.get(&registration_id) {
            Some(p) if p.callee == callee_id => {}
            _ => return Err(Error::NoSuchRegistration),
        }

        let orphans = tables.drop_procedure(registration_id);
        info!(
            "Registration {} removed from realm {}",
            registration_id, self.name
        );
        Ok(orphans)
    }

    pub fn procedure(&self, uri: &str) -> Result<Procedure> {
        let tables = self.tables.lock();
        let id = *tables.procedure_ids.get(uri).ok_or(Error::NoSuchRegistration)?;
        let entry = tables.procedures.get(&id).ok_or(Error::NoSuchRegistration)?;
        let callee = tables
            .sessions
            .get(&entry.callee)
            .cloned()
            .ok_or(Error::NoSuchRegistration)?;
        Ok(Procedure {
            id,
            uri: entry.uri.clone(),
            callee,
        })
    }

    pub fn procedure_count(&self) -> usize {
        self.tables.lock().procedures.len()
    }

    /// Route a call to the procedure at `uri` and remember who is waiting
    pub fn invoke(&self, uri: &str, caller_id: Id, request_id: Id) -> Result<Invocation> {
        let mut tables = self.tables.lock();
        let registration_id = *tables.procedure_ids.get(uri).ok_or(Error::NoSuchRegistration)?;
        let callee_id = tables
            .procedures
            .get(&registration_id)
            .map(|p| p.callee)
            .ok_or(Error::NoSuchRegistration)?;
        let callee = tables
            .sessions
            .get(&callee_id)
            .cloned()
            .ok_or(Error::NoSuchRegistration)?;

        let id = self.ids.next();
        if let Some(entry) = tables.procedures.get_mut(&registration_id) {
            entry.pending.insert(id, (request_id, caller_id));
        }
        tables.invocations.insert(id, registration_id);

        Ok(Invocation {
            id,
            registration_id,
            callee,
        })
    }

    /// Consume a pending invocation answered by `callee_id`
    pub fn resolve_invocation(&self, invocation_id: Id, callee_id: Id) -> Result<PendingCall> {
        let mut tables = self.tables.lock();
        let registration_id = *tables
            .invocations
            .get(&invocation_id)
            .ok_or(Error::NoSuchInvocation(invocation_id))?;

        let entry = tables
            .procedures
            .get_mut(&registration_id)
            .filter(|p| p.callee == callee_id)
            .ok_or(Error::NoSuchInvocation(invocation_id))?;
        let (request_id, caller_id) = entry
            .pending
            .remove(&invocation_id)
            .ok_or(Error::NoSuchInvocation(invocation_id))?;
        tables.invocations.remove(&invocation_id);

        Ok(tables.pending_call(request_id, caller_id))
    }

    pub fn pending_invocations(&self) -> usize {
        self.tables.lock().invocations.len()
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("Realm")
            .field("name", &self.name)
            .field("sessions", &tables.sessions.len())
            .field("topics", &tables.topics.len())
            .field("procedures", &tables.procedures.len())
            .finish()
    }
}
