use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Requested output quality of an upload. Selects the encoding profile sent to the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Standard,
    Premium,
    Ultra,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Standard => "standard",
            QualityTier::Premium => "premium",
            QualityTier::Ultra => "ultra",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(QualityTier::Standard),
            "premium" => Ok(QualityTier::Premium),
            "ultra" => Ok(QualityTier::Ultra),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodingProfile {
    pub encoding_tier: String,
    pub max_resolution_tier: String,
    pub bitrates: Vec<String>,
}

impl EncodingProfile {
    fn new(encoding_tier: &str, max_resolution_tier: &str, bitrates: &[&str]) -> Self {
        Self {
            encoding_tier: encoding_tier.to_string(),
            max_resolution_tier: max_resolution_tier.to_string(),
            bitrates: bitrates.iter().map(|rate| rate.to_string()).collect(),
        }
    }

    pub fn standard() -> Self {
        Self::new("baseline", "1080p", &["3000k", "2000k", "1000k", "500k"])
    }

    pub fn premium() -> Self {
        Self::new(
            "smart",
            "1440p",
            &["6000k", "4500k", "3000k", "2000k", "1000k"],
        )
    }

    pub fn ultra() -> Self {
        Self::new(
            "smart",
            "2160p",
            &["16000k", "8000k", "6000k", "4500k", "3000k", "1500k"],
        )
    }
}

/// Encoding profile table, one entry per quality tier.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProfilesSection {
    pub standard: EncodingProfile,
    pub premium: EncodingProfile,
    pub ultra: EncodingProfile,
}

impl Default for ProfilesSection {
    fn default() -> Self {
        Self {
            standard: EncodingProfile::standard(),
            premium: EncodingProfile::premium(),
            ultra: EncodingProfile::ultra(),
        }
    }
}

impl ProfilesSection {
    pub fn for_tier(&self, tier: QualityTier) -> &EncodingProfile {
        match tier {
            QualityTier::Standard => &self.standard,
            QualityTier::Premium => &self.premium,
            QualityTier::Ultra => &self.ultra,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendition {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
}

pub const RESOLUTION_TABLE: [Rendition; 6] = [
    Rendition {
        label: "360p",
        width: 640,
        height: 360,
    },
    Rendition {
        label: "480p",
        width: 854,
        height: 480,
    },
    Rendition {
        label: "720p",
        width: 1280,
        height: 720,
    },
    Rendition {
        label: "1080p",
        width: 1920,
        height: 1080,
    },
    Rendition {
        label: "2k",
        width: 2560,
        height: 1440,
    },
    Rendition {
        label: "4k",
        width: 3840,
        height: 2160,
    },
];

/// Labels of every rendition that fits inside `width` x `height`, smallest first.
pub fn resolution_ladder(width: u32, height: u32) -> Vec<String> {
    RESOLUTION_TABLE
        .iter()
        .filter(|rendition| rendition.width <= width && rendition.height <= height)
        .map(|rendition| rendition.label.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_stops_at_asset_resolution() {
        assert_eq!(
            resolution_ladder(1920, 1080),
            vec!["360p", "480p", "720p", "1080p"]
        );
        assert_eq!(resolution_ladder(3840, 2160).len(), 6);
        assert!(resolution_ladder(320, 240).is_empty());
    }

    #[test]
    fn portrait_sources_only_keep_renditions_within_both_bounds() {
        assert_eq!(resolution_ladder(1080, 1920), vec!["360p", "480p"]);
    }

    #[test]
    fn quality_tier_parses_case_insensitively() {
        assert_eq!("Premium".parse::<QualityTier>(), Ok(QualityTier::Premium));
        assert_eq!(" ULTRA ".parse::<QualityTier>(), Ok(QualityTier::Ultra));
        assert!("gold".parse::<QualityTier>().is_err());
    }

    #[test]
    fn standard_profile_has_four_step_ladder() {
        let profiles = ProfilesSection::default();
        let standard = profiles.for_tier(QualityTier::Standard);
        assert_eq!(standard.max_resolution_tier, "1080p");
        assert_eq!(standard.bitrates, vec!["3000k", "2000k", "1000k", "500k"]);
    }
}
