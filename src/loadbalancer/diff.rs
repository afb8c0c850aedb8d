use std::{collections::BTreeMap, fmt};

use crate::model::{BackendSetDesc, CertBundle, Certificate, LbSpec, ListenerDesc, LoadBalancer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<T> {
    Create(T),
    Update(T),
    /// Carries the actual entity being removed.
    Delete(T),
}

fn backend_keys(desc: &BackendSetDesc) -> Vec<(&str, u16)> {
    let mut keys: Vec<(&str, u16)> = desc.backends.iter().map(|b| b.key()).collect();
    keys.sort_unstable();
    keys
}

/// Weight differences alone do not count as a change.
pub fn backend_set_changed(desired: &BackendSetDesc, actual: &BackendSetDesc) -> bool {
    desired.health_checker != actual.health_checker
        || desired.policy != actual.policy
        || backend_keys(desired) != backend_keys(actual)
}

pub fn listener_changed(desired: &ListenerDesc, actual: &ListenerDesc) -> bool {
    desired.protocol != actual.protocol
        || desired.port != actual.port
        || desired.default_backend_set_name != actual.default_backend_set_name
        || desired.ssl_certificate_name != actual.ssl_certificate_name
        || desired.idle_timeout_secs != actual.idle_timeout_secs
}

fn diff<T: Clone>(
    desired: &BTreeMap<String, T>,
    actual: &BTreeMap<String, T>,
    changed: impl Fn(&T, &T) -> bool,
) -> Vec<Action<T>> {
    let mut actions = Vec::new();

    for (name, current) in actual {
        match desired.get(name) {
            None => actions.push(Action::Delete(current.clone())),
            Some(wanted) if changed(wanted, current) => actions.push(Action::Update(wanted.clone())),
            Some(_) => {}
        }
    }

    for (name, wanted) in desired {
        if !actual.contains_key(name) {
            actions.push(Action::Create(wanted.clone()));
        }
    }

    actions
}

pub fn diff_backend_sets(
    desired: &BTreeMap<String, BackendSetDesc>,
    actual: &BTreeMap<String, BackendSetDesc>,
) -> Vec<Action<BackendSetDesc>> {
    diff(desired, actual, backend_set_changed)
}

pub fn diff_listeners(
    desired: &BTreeMap<String, ListenerDesc>,
    actual: &BTreeMap<String, ListenerDesc>,
) -> Vec<Action<ListenerDesc>> {
    diff(desired, actual, listener_changed)
}

/// Only creations: certificates outlive the listeners using them.
pub fn diff_certificates(
    desired: &BTreeMap<String, CertBundle>,
    actual: &BTreeMap<String, Certificate>,
) -> Vec<Action<CertBundle>> {
    desired
        .iter()
        .filter(|(name, _)| !actual.contains_key(*name))
        .map(|(_, bundle)| Action::Create(bundle.clone()))
        .collect()
}

/// One mutating load balancer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'a> {
    CreateCertificate(&'a CertBundle),
    CreateBackendSet(&'a BackendSetDesc),
    UpdateBackendSet(&'a BackendSetDesc),
    CreateListener(&'a ListenerDesc),
    UpdateListener(&'a ListenerDesc),
    DeleteListener(&'a ListenerDesc),
    DeleteBackendSet(&'a BackendSetDesc),
}

impl fmt::Display for Step<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCertificate(c) => write!(f, "create certificate {}", c.certificate_name),
            Self::CreateBackendSet(bs) => write!(f, "create backend set {}", bs.name),
            Self::UpdateBackendSet(bs) => write!(f, "update backend set {}", bs.name),
            Self::CreateListener(l) => write!(f, "create listener {}", l.name),
            Self::UpdateListener(l) => write!(f, "update listener {}", l.name),
            Self::DeleteListener(l) => write!(f, "delete listener {}", l.name),
            Self::DeleteBackendSet(bs) => write!(f, "delete backend set {}", bs.name),
        }
    }
}

/// Changes needed to move an actual load balancer to its desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub certificates: Vec<Action<CertBundle>>,
    pub backend_sets: Vec<Action<BackendSetDesc>>,
    pub listeners: Vec<Action<ListenerDesc>>,
}

impl Plan {
    pub fn new(spec: &LbSpec, actual: &LoadBalancer) -> Self {
        Self {
            certificates: diff_certificates(&spec.certificates(), &actual.certificates),
            backend_sets: diff_backend_sets(&spec.backend_sets, &actual.backend_sets),
            listeners: diff_listeners(&spec.listeners, &actual.listeners),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.backend_sets.is_empty() && self.listeners.is_empty()
    }

    /// Steps in execution order:
    ///
    /// 1. certificate creations
    /// 2. backend set creations and updates
    /// 3. listener creations and updates
    /// 4. listener deletions
    /// 5. backend set deletions
    ///
    /// Each group is sorted by name.
    pub fn steps(&self) -> Vec<Step<'_>> {
        let mut certificates: Vec<&CertBundle> = self
            .certificates
            .iter()
            .filter_map(|a| match a {
                Action::Create(c) => Some(c),
                _ => None,
            })
            .collect();
        certificates.sort_by(|a, b| a.certificate_name.cmp(&b.certificate_name));

        let mut backend_sets: Vec<Step<'_>> = Vec::new();
        let mut backend_set_deletes: Vec<&BackendSetDesc> = Vec::new();
        for action in &self.backend_sets {
            match action {
                Action::Create(bs) => backend_sets.push(Step::CreateBackendSet(bs)),
                Action::Update(bs) => backend_sets.push(Step::UpdateBackendSet(bs)),
                Action::Delete(bs) => backend_set_deletes.push(bs),
            }
        }
        backend_sets.sort_by(|a, b| step_name(a).cmp(step_name(b)));
        backend_set_deletes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut listeners: Vec<Step<'_>> = Vec::new();
        let mut listener_deletes: Vec<&ListenerDesc> = Vec::new();
        for action in &self.listeners {
            match action {
                Action::Create(l) => listeners.push(Step::CreateListener(l)),
                Action::Update(l) => listeners.push(Step::UpdateListener(l)),
                Action::Delete(l) => listener_deletes.push(l),
            }
        }
        listeners.sort_by(|a, b| step_name(a).cmp(step_name(b)));
        listener_deletes.sort_by(|a, b| a.name.cmp(&b.name));

        certificates
            .into_iter()
            .map(Step::CreateCertificate)
            .chain(backend_sets)
            .chain(listeners)
            .chain(listener_deletes.into_iter().map(Step::DeleteListener))
            .chain(backend_set_deletes.into_iter().map(Step::DeleteBackendSet))
            .collect()
    }
}

fn step_name<'a>(step: &Step<'a>) -> &'a str {
    match *step {
        Step::CreateCertificate(c) => &c.certificate_name,
        Step::CreateBackendSet(bs) | Step::UpdateBackendSet(bs) | Step::DeleteBackendSet(bs) => {
            &bs.name
        }
        Step::CreateListener(l) | Step::UpdateListener(l) | Step::DeleteListener(l) => &l.name,
    }
}
