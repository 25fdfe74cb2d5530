use crate::config::{Policy, Value};
use crate::session::Session;

/// Client-initiated operations subject to authorization. Ack kinds never
/// reach the engine; the dispatcher drops them before this point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Connect,
    Publish,
    Subscribe,
    Unsubscribe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RightsAtom {
    Pub,
    Sub,
    DenyPub,
    DenySub,
}

impl RightsAtom {
    pub fn parse(atom: &str) -> Option<Self> {
        match atom {
            "pub" => return Some(Self::Pub),
            "sub" => return Some(Self::Sub),
            "!pub" => return Some(Self::DenyPub),
            "!sub" => return Some(Self::DenySub),
            _ => return None,
        }
    }
}

/// The parsed right-hand side of a `topic <pattern> <rights>` rule:
/// a set of grant and deny atoms applied in written order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rights {
    atoms: Vec<RightsAtom>,
}

impl Rights {
    pub fn new(atoms: Vec<RightsAtom>) -> Self {
        return Self { atoms };
    }

    /// Builds a rights set from a parsed config value: a single atom, or a
    /// `|`-separated list. Unknown atoms are dropped with a warning rather
    /// than failing the whole policy.
    pub fn from_value(value: &Value) -> Self {
        let mut atoms = vec![];

        let mut push = |atom: &str| match RightsAtom::parse(atom) {
            Some(atom) => atoms.push(atom),
            None => {
                log::warn!("Ignoring unknown rights atom: {atom}");
            }
        };

        match value {
            Value::List(values) => {
                for value in values {
                    if let Value::Str(atom) = value {
                        push(atom);
                    } else {
                        log::warn!("Ignoring non-string rights atom: {value:?}");
                    }
                }
            }
            Value::Str(atom) => push(atom),
            _ => {
                log::warn!("Ignoring malformed rights value: {value:?}");
            }
        }

        return Self { atoms };
    }

    fn apply(&self, action: Action, allow: &mut bool) {
        for atom in self.atoms.iter() {
            match (atom, action) {
                (RightsAtom::Pub, Action::Publish) => *allow = true,
                (RightsAtom::DenyPub, Action::Publish) => *allow = false,
                (RightsAtom::Sub, Action::Subscribe) => *allow = true,
                (RightsAtom::DenySub, Action::Subscribe) => *allow = false,
                _ => {}
            }
        }
    }
}

/// Resolves whether a session may perform an action, driven by the loaded
/// policy. The policy is immutable after startup so the manager is shared
/// freely across session tasks.
pub struct AuthManager {
    policy: Policy,
}

impl AuthManager {
    pub fn new(policy: Policy) -> Self {
        return Self { policy };
    }

    pub fn policy(&self) -> &Policy {
        return &self.policy;
    }

    pub fn check(&self, session: &Session, action: Action, topic: Option<&str>) -> bool {
        match action {
            Action::Connect => {
                if !self.policy.require_auth() {
                    return true;
                }

                return self
                    .policy
                    .find_user(session.username(), session.password())
                    .is_some();
            }

            Action::Unsubscribe => {
                return true;
            }

            Action::Publish | Action::Subscribe => {
                if !session.is_connected() {
                    return false;
                }

                let topic = match topic {
                    Some(topic) => topic,
                    None => {
                        debug_assert!(false, "publish/subscribe check without a topic");
                        return false;
                    }
                };

                // later rules override earlier ones; user rules come after
                // the global table and therefore win
                let mut allow = true;

                for rule in self.policy.topics() {
                    if rule.pattern().matches(topic) {
                        rule.rights().apply(action, &mut allow);
                    }
                }

                if let Some(user) = self
                    .policy
                    .find_user(session.username(), session.password())
                {
                    for rule in user.topics() {
                        if rule.pattern().matches(topic) {
                            rule.rights().apply(action, &mut allow);
                        }
                    }
                }

                return allow;
            }
        }
    }
}
