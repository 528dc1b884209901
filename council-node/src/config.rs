use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use council_common::{CouncilConfig, NodeId, Result, Seal};
use council_consensus::{select_protocol, AddNodeOptions, CouncilProtocol};

/// A seal a member will cast during the simulated round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealEntry {
    pub approve: bool,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn full_confidence() -> f64 {
    1.0
}

impl SealEntry {
    pub fn to_seal(&self, voter: &NodeId) -> Seal {
        let seal = Seal::new(voter.clone(), self.approve, self.confidence);
        match &self.reason {
            Some(reason) => seal.with_reason(reason),
            None => seal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub id: NodeId,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_tag: Option<String>,
    /// Members without a seal stay silent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal: Option<SealEntry>,
}

impl MemberEntry {
    pub fn options(&self) -> AddNodeOptions {
        AddNodeOptions { is_primary: self.is_primary, weight_tag: self.weight_tag.clone() }
    }
}

/// Council file read by `council-node run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilFile {
    pub node_id: NodeId,
    /// Explicit protocol name. Wins over `element`.
    pub protocol: Option<String>,
    pub element: Option<String>,
    pub council: CouncilConfig,
    pub members: Vec<MemberEntry>,
    pub value: Value,
}

impl Default for CouncilFile {
    fn default() -> Self {
        Self {
            node_id: NodeId::from("local"),
            protocol: None,
            element: None,
            council: CouncilConfig::default(),
            members: Vec::new(),
            value: Value::Null,
        }
    }
}

impl CouncilFile {
    /// A five-member council that approves under every protocol.
    pub fn sample() -> Self {
        let member = |i: usize, tag: &str, approve: bool, confidence: f64| MemberEntry {
            id: NodeId(format!("council-{}", i)),
            is_primary: false,
            weight_tag: Some(tag.to_string()),
            seal: Some(SealEntry { approve, confidence, reason: None }),
        };
        Self {
            node_id: NodeId::from("council-0"),
            protocol: None,
            element: None,
            council: CouncilConfig { timeout_ms: Some(5_000), ..Default::default() },
            members: vec![
                member(0, "shinkami", true, 1.0),
                member(1, "lyssandria", true, 1.0),
                member(2, "leyla", true, 0.9),
                member(3, "draconia", false, 0.8),
                member(4, "alera", true, 1.0),
            ],
            value: json!({"action": "open-gate", "gate": 7}),
        }
    }

    /// Protocol the file asks for, as given. `None` means "pick by element".
    pub fn requested_protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn element_protocol(&self) -> CouncilProtocol {
        select_protocol(self.element.as_deref())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let file: CouncilFile = serde_json::from_str(&json)?;
        file.council.validate()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_common::CouncilError;

    #[test]
    fn test_missing_fields_take_defaults() {
        let file: CouncilFile = serde_json::from_str(r#"{"members": [{"id": "a", "seal": {"approve": true}}]}"#).unwrap();
        assert_eq!(file.node_id, NodeId::from("local"));
        assert_eq!(file.members[0].seal.as_ref().unwrap().confidence, 1.0);
        assert!(!file.members[0].is_primary);
        assert_eq!(file.element_protocol(), CouncilProtocol::GateQuorum);
    }

    #[test]
    fn test_element_picks_protocol() {
        let file = CouncilFile { element: Some("Earth".into()), ..CouncilFile::sample() };
        assert_eq!(file.element_protocol(), CouncilProtocol::CouncilVote);
        assert_eq!(file.requested_protocol(), None);
    }

    #[test]
    fn test_invalid_council_config_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("council.json");
        let mut file = CouncilFile::sample();
        file.council.quorum_ratio = Some(3.0);
        file.save_to_file(&path).unwrap();
        assert!(matches!(CouncilFile::load_from_file(&path), Err(CouncilError::Config(_))));
    }

    #[test]
    fn test_seal_spec_keeps_reason() {
        let entry = SealEntry { approve: false, confidence: 0.4, reason: Some("too early".into()) };
        let seal = entry.to_seal(&NodeId::from("a"));
        assert_eq!(seal.reason.as_deref(), Some("too early"));
        assert!(!seal.approve);
    }
}
