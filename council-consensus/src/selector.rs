use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use council_common::{CouncilError, Element};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CouncilProtocol {
    CouncilVote,
    AncientAccord,
    ShinkamisDecree,
    Whisper,
    GateQuorum,
}

impl CouncilProtocol {
    pub const ALL: [CouncilProtocol; 5] = [
        CouncilProtocol::CouncilVote,
        CouncilProtocol::AncientAccord,
        CouncilProtocol::ShinkamisDecree,
        CouncilProtocol::Whisper,
        CouncilProtocol::GateQuorum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CouncilProtocol::CouncilVote => "council-vote",
            CouncilProtocol::AncientAccord => "ancient-accord",
            CouncilProtocol::ShinkamisDecree => "shinkamis-decree",
            CouncilProtocol::Whisper => "whisper",
            CouncilProtocol::GateQuorum => "gate-quorum",
        }
    }

    /// Whether the engine speaks proposal / vote rather than petition / seal.
    pub fn uses_legacy_fields(&self) -> bool {
        !matches!(self, CouncilProtocol::GateQuorum)
    }
}

impl Default for CouncilProtocol {
    fn default() -> Self {
        CouncilProtocol::GateQuorum
    }
}

impl fmt::Display for CouncilProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CouncilProtocol {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CouncilProtocol::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| CouncilError::InvalidProtocol(s.to_string()))
    }
}

/// Protocol suited to a task's element.
pub fn select_for_element(element: Option<Element>) -> CouncilProtocol {
    match element {
        Some(Element::Earth) => CouncilProtocol::CouncilVote,
        Some(Element::Fire) | Some(Element::Void) => CouncilProtocol::ShinkamisDecree,
        Some(Element::Water) => CouncilProtocol::Whisper,
        Some(Element::Wind) | Some(Element::Spirit) | None => CouncilProtocol::GateQuorum,
    }
}

/// Same as `select_for_element`, from a free-form element name. Anything
/// unrecognized selects the default protocol.
pub fn select_protocol(element: Option<&str>) -> CouncilProtocol {
    select_for_element(element.and_then(|e| e.parse::<Element>().ok()))
}
