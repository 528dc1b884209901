//! registry.rs
//!
//! Membership of one engine instance. Registration order is preserved and
//! drives primary rotation in the byzantine engine.

use serde::{Deserialize, Serialize};

use council_common::{Element, Guardian, NodeId};

/// Superset of what any protocol wants to know about a new member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddNodeOptions {
    pub is_primary: bool,
    pub weight_tag: Option<String>,
}

impl AddNodeOptions {
    pub fn primary() -> Self {
        Self { is_primary: true, weight_tag: None }
    }

    pub fn tagged(tag: &str) -> Self {
        Self { is_primary: false, weight_tag: Some(tag.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub is_primary: bool,
    pub weight_tag: Option<String>,
}

impl Member {
    pub fn guardian(&self) -> Option<Guardian> {
        self.weight_tag.as_deref().and_then(Guardian::from_tag)
    }

    /// Frequency weight of the tag, 1.0 when untagged or unknown.
    pub fn weight(&self) -> f64 {
        self.guardian().map(|g| g.weight()).unwrap_or(1.0)
    }

    pub fn element(&self) -> Element {
        self.guardian().map(|g| g.element()).unwrap_or(Element::Void)
    }
}

pub enum RegistryCommand {
    Register(NodeId, AddNodeOptions),
    Drop(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered(NodeId),
    AlreadyRegistered(NodeId),
    Dropped(NodeId),
    NotFound(NodeId),
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    members: Vec<Member>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_command(&mut self, cmd: RegistryCommand) -> RegistryEvent {
        match cmd {
            RegistryCommand::Register(id, opts) => {
                if self.contains(&id) {
                    return RegistryEvent::AlreadyRegistered(id);
                }
                self.members.push(Member {
                    id: id.clone(),
                    is_primary: opts.is_primary,
                    weight_tag: opts.weight_tag,
                });
                RegistryEvent::Registered(id)
            }
            RegistryCommand::Drop(id) => match self.position(&id) {
                Some(pos) => {
                    self.members.remove(pos);
                    RegistryEvent::Dropped(id)
                }
                None => RegistryEvent::NotFound(id),
            },
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == *id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    /// Every member except `id`, in registration order.
    pub fn peers_of(&self, id: &NodeId) -> Vec<NodeId> {
        self.members.iter().filter(|m| m.id != *id).map(|m| m.id.clone()).collect()
    }

    /// Member registered after `id`, wrapping around. Falls back to the first
    /// member when `id` is not registered.
    pub fn next_after(&self, id: &NodeId) -> Option<NodeId> {
        if self.members.is_empty() {
            return None;
        }
        let next = match self.position(id) {
            Some(pos) => (pos + 1) % self.members.len(),
            None => 0,
        };
        Some(self.members[next].id.clone())
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.members.iter().position(|m| m.id == *id)
    }
}
