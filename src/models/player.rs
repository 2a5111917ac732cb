use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==================================================================================================
// Enumerations (SCREAMING_SNAKE_CASE on the wire)
// ==================================================================================================

/// Wire enum with case-insensitive parsing for the command line
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
                match normalized.as_str() {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(format!(
                        "invalid {} '{}', expected one of: {}",
                        stringify!($name),
                        s,
                        [$($wire),+].join(", ")
                    )),
                }
            }
        }
    };
}

wire_enum!(PlayerRole {
    Batsman => "BATSMAN",
    Bowler => "BOWLER",
    AllRounder => "ALL_ROUNDER",
    WicketKeeper => "WICKET_KEEPER",
});

wire_enum!(BattingStyle {
    RightHand => "RIGHT_HAND",
    LeftHand => "LEFT_HAND",
    None => "NONE",
});

wire_enum!(BowlingStyle {
    RightArmFast => "RIGHT_ARM_FAST",
    RightArmMedium => "RIGHT_ARM_MEDIUM",
    RightArmOffSpin => "RIGHT_ARM_OFF_SPIN",
    RightArmLegSpin => "RIGHT_ARM_LEG_SPIN",
    LeftArmFast => "LEFT_ARM_FAST",
    LeftArmMedium => "LEFT_ARM_MEDIUM",
    LeftArmOrthodox => "LEFT_ARM_ORTHODOX",
    LeftArmWristSpin => "LEFT_ARM_WRIST_SPIN",
    None => "NONE",
});

wire_enum!(MatchFormat {
    Odi => "ODI",
    Test => "TEST",
    T20i => "T20I",
    Ipl => "IPL",
});

impl Default for BattingStyle {
    fn default() -> Self {
        BattingStyle::RightHand
    }
}

impl Default for BowlingStyle {
    fn default() -> Self {
        BowlingStyle::None
    }
}

// ==================================================================================================
// Players resource
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    pub village: String,
    pub role: PlayerRole,
    #[serde(default)]
    pub batting_style: BattingStyle,
    #[serde(default)]
    pub bowling_style: BowlingStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wickets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economy_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teams: Option<Vec<String>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    /// Presigned GET URL, present when the player has an image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

/// POST /players payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlayer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    pub village: String,
    pub role: PlayerRole,
    pub batting_style: BattingStyle,
    pub bowling_style: BowlingStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wickets: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub economy_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teams: Option<Vec<String>>,
    pub is_active: bool,
}

impl CreatePlayer {
    pub fn new(name: impl Into<String>, village: impl Into<String>, role: PlayerRole) -> Self {
        Self {
            name: name.into(),
            age: None,
            village: village.into(),
            role,
            batting_style: BattingStyle::default(),
            bowling_style: BowlingStyle::default(),
            matches: None,
            runs: None,
            wickets: None,
            strike_rate: None,
            economy_rate: None,
            average: None,
            teams: None,
            is_active: true,
        }
    }
}

// ==================================================================================================
// PUT /players/{id}/stats
// ==================================================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BattingStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BowlingStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wickets: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub economy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batting: Option<BattingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bowling: Option<BowlingStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsUpdate {
    pub format: MatchFormat,
    pub stats: FormatStats,
}

impl StatsUpdate {
    /// Build an update, dropping sections with no values
    pub fn new(
        format: MatchFormat,
        runs: Option<u32>,
        average: Option<f64>,
        wickets: Option<u32>,
        economy: Option<f64>,
    ) -> Self {
        let batting = (runs.is_some() || average.is_some()).then_some(BattingStats { runs, average });
        let bowling =
            (wickets.is_some() || economy.is_some()).then_some(BowlingStats { wickets, economy });

        Self {
            format,
            stats: FormatStats { batting, bowling },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stats.batting.is_none() && self.stats.bowling.is_none()
    }
}

// ==================================================================================================
// Object storage
// ==================================================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUploadUrlRequest<'a> {
    pub file_name: &'a str,
    pub content_type: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub upload_url: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresignDownloadRequest<'a> {
    pub key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedDownload {
    pub url: String,
}
