//! guardian.rs
//!
//! Weight tags for the weighted quorum. Each of the ten Guardians holds a
//! Gate frequency between 174 Hz and 1111 Hz and an element; the voting
//! weight of a tagged node is its frequency relative to the foundation gate.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Frequency of the foundation gate, the unit weight.
pub const BASE_FREQUENCY: f64 = 174.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Earth,
    Fire,
    Water,
    Wind,
    Void,
    Spirit,
}

impl Element {
    pub fn as_str(&self) -> &'static str {
        match self {
            Element::Earth => "earth",
            Element::Fire => "fire",
            Element::Water => "water",
            Element::Wind => "wind",
            Element::Void => "void",
            Element::Spirit => "spirit",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Element {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earth" => Ok(Element::Earth),
            "fire" => Ok(Element::Fire),
            "water" => Ok(Element::Water),
            "wind" => Ok(Element::Wind),
            "void" => Ok(Element::Void),
            "spirit" => Ok(Element::Spirit),
            other => Err(format!("unknown element '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Guardian {
    Lyssandria,
    Leyla,
    Draconia,
    Maylinn,
    Alera,
    Lyria,
    Aiyami,
    Elara,
    Ino,
    Shinkami,
}

impl Guardian {
    pub const ALL: [Guardian; 10] = [
        Guardian::Lyssandria,
        Guardian::Leyla,
        Guardian::Draconia,
        Guardian::Maylinn,
        Guardian::Alera,
        Guardian::Lyria,
        Guardian::Aiyami,
        Guardian::Elara,
        Guardian::Ino,
        Guardian::Shinkami,
    ];

    pub fn frequency(&self) -> u32 {
        match self {
            Guardian::Lyssandria => 174,
            Guardian::Leyla => 285,
            Guardian::Draconia => 396,
            Guardian::Maylinn => 417,
            Guardian::Alera => 528,
            Guardian::Lyria => 639,
            Guardian::Aiyami => 741,
            Guardian::Elara => 852,
            Guardian::Ino => 963,
            Guardian::Shinkami => 1111,
        }
    }

    pub fn element(&self) -> Element {
        match self {
            Guardian::Lyssandria | Guardian::Ino => Element::Earth,
            Guardian::Leyla | Guardian::Maylinn => Element::Water,
            Guardian::Draconia => Element::Fire,
            Guardian::Alera | Guardian::Elara => Element::Wind,
            Guardian::Lyria | Guardian::Aiyami | Guardian::Shinkami => Element::Void,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Guardian::Lyssandria => "lyssandria",
            Guardian::Leyla => "leyla",
            Guardian::Draconia => "draconia",
            Guardian::Maylinn => "maylinn",
            Guardian::Alera => "alera",
            Guardian::Lyria => "lyria",
            Guardian::Aiyami => "aiyami",
            Guardian::Elara => "elara",
            Guardian::Ino => "ino",
            Guardian::Shinkami => "shinkami",
        }
    }

    /// Weight relative to the foundation gate (lyssandria = 1.0).
    pub fn weight(&self) -> f64 {
        self.frequency() as f64 / BASE_FREQUENCY
    }

    /// Looks up a weight tag. Unknown tags have no Guardian.
    pub fn from_tag(tag: &str) -> Option<Guardian> {
        let tag = tag.trim().to_ascii_lowercase();
        Guardian::ALL.iter().copied().find(|g| g.name() == tag)
    }
}
