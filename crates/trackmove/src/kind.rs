use std::fmt;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityError;

/// What was done during an activity.
///
/// Services accept a fixed vocabulary, so unknown names are rejected
/// instead of being passed through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActivityKind {
    #[default]
    Cycling,
    Running,
    MountainBiking,
    IndoorCycling,
    Sailing,
    Walking,
    Hiking,
    Swimming,
    Driving,
    OffRoadDriving,
    MotorRacing,
    Motorcycling,
    Enduro,
    Skiing,
    CrossCountrySkiing,
    Canoeing,
    Kayaking,
    SeaKayaking,
    StandUpPaddleBoarding,
    Rowing,
    Windsurfing,
    Kiteboarding,
    Orienteering,
    Mountaineering,
    Skating,
    Skateboarding,
    HorseRiding,
    HangGliding,
    Gliding,
    Flying,
    Snowboarding,
    Paragliding,
    HotAirBallooning,
    NordicWalking,
    Snowshoeing,
    JetSkiing,
    Powerboating,
    Miscellaneous,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 38] = [
        Self::Cycling,
        Self::Running,
        Self::MountainBiking,
        Self::IndoorCycling,
        Self::Sailing,
        Self::Walking,
        Self::Hiking,
        Self::Swimming,
        Self::Driving,
        Self::OffRoadDriving,
        Self::MotorRacing,
        Self::Motorcycling,
        Self::Enduro,
        Self::Skiing,
        Self::CrossCountrySkiing,
        Self::Canoeing,
        Self::Kayaking,
        Self::SeaKayaking,
        Self::StandUpPaddleBoarding,
        Self::Rowing,
        Self::Windsurfing,
        Self::Kiteboarding,
        Self::Orienteering,
        Self::Mountaineering,
        Self::Skating,
        Self::Skateboarding,
        Self::HorseRiding,
        Self::HangGliding,
        Self::Gliding,
        Self::Flying,
        Self::Snowboarding,
        Self::Paragliding,
        Self::HotAirBallooning,
        Self::NordicWalking,
        Self::Snowshoeing,
        Self::JetSkiing,
        Self::Powerboating,
        Self::Miscellaneous,
    ];

    /// The name services use on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cycling => "Cycling",
            Self::Running => "Running",
            Self::MountainBiking => "Mountain biking",
            Self::IndoorCycling => "Indoor cycling",
            Self::Sailing => "Sailing",
            Self::Walking => "Walking",
            Self::Hiking => "Hiking",
            Self::Swimming => "Swimming",
            Self::Driving => "Driving",
            Self::OffRoadDriving => "Off road driving",
            Self::MotorRacing => "Motor racing",
            Self::Motorcycling => "Motorcycling",
            Self::Enduro => "Enduro",
            Self::Skiing => "Skiing",
            Self::CrossCountrySkiing => "Cross country skiing",
            Self::Canoeing => "Canoeing",
            Self::Kayaking => "Kayaking",
            Self::SeaKayaking => "Sea kayaking",
            Self::StandUpPaddleBoarding => "Stand up paddle boarding",
            Self::Rowing => "Rowing",
            Self::Windsurfing => "Windsurfing",
            Self::Kiteboarding => "Kiteboarding",
            Self::Orienteering => "Orienteering",
            Self::Mountaineering => "Mountaineering",
            Self::Skating => "Skating",
            Self::Skateboarding => "Skateboarding",
            Self::HorseRiding => "Horse riding",
            Self::HangGliding => "Hang gliding",
            Self::Gliding => "Gliding",
            Self::Flying => "Flying",
            Self::Snowboarding => "Snowboarding",
            Self::Paragliding => "Paragliding",
            Self::HotAirBallooning => "Hot air ballooning",
            Self::NordicWalking => "Nordic walking",
            Self::Snowshoeing => "Snowshoeing",
            Self::JetSkiing => "Jet skiing",
            Self::Powerboating => "Powerboating",
            Self::Miscellaneous => "Miscellaneous",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn parse(name: &str) -> Result<Self, ActivityError> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| ActivityError::UnknownKind(name.to_owned()))
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ActivityKind {
    type Error = ActivityError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::parse(&name)
    }
}

impl From<ActivityKind> for String {
    fn from(kind: ActivityKind) -> Self {
        kind.as_str().to_owned()
    }
}
