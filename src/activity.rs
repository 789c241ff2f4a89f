use crate::protocol::{MowerActivity, MowerState};

/// Home Assistant's lawn mower activity vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LawnMowerActivity {
    Mowing,
    Paused,
    Docked,
    Error,
}

impl LawnMowerActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            LawnMowerActivity::Mowing => "mowing",
            LawnMowerActivity::Paused => "paused",
            LawnMowerActivity::Docked => "docked",
            LawnMowerActivity::Error => "error",
        }
    }
}

/// Collapses the mower's state and activity codes into a lawn mower activity.
///
/// Returns `None` when either code is missing.
pub fn map_activity(
    state: Option<MowerState>,
    activity: Option<MowerActivity>,
) -> Option<LawnMowerActivity> {
    let (Some(state), Some(activity)) = (state, activity) else {
        return None;
    };

    let mapped = match state {
        MowerState::Paused => LawnMowerActivity::Paused,
        // Really "stopped", which Home Assistant has no activity for
        MowerState::WaitForSafetyPin
        | MowerState::Stopped
        | MowerState::FatalError
        | MowerState::Error => LawnMowerActivity::Error,
        MowerState::PendingStart | MowerState::InOperation | MowerState::Restricted => {
            match activity {
                MowerActivity::Charging | MowerActivity::Parked => LawnMowerActivity::Docked,
                MowerActivity::GoingOut | MowerActivity::Mowing | MowerActivity::GoingHome => {
                    LawnMowerActivity::Mowing
                }
                _ => LawnMowerActivity::Error,
            }
        }
        _ => LawnMowerActivity::Error,
    };
    Some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ACTIVITIES: [MowerActivity; 8] = [
        MowerActivity::None,
        MowerActivity::Charging,
        MowerActivity::GoingOut,
        MowerActivity::Mowing,
        MowerActivity::GoingHome,
        MowerActivity::Parked,
        MowerActivity::StoppedInGarden,
        MowerActivity::Unknown(99),
    ];

    fn map(state: MowerState, activity: MowerActivity) -> Option<LawnMowerActivity> {
        map_activity(Some(state), Some(activity))
    }

    #[test]
    fn test_missing_input() {
        assert_eq!(map_activity(None, Some(MowerActivity::Mowing)), None);
        assert_eq!(map_activity(Some(MowerState::InOperation), None), None);
        assert_eq!(map_activity(None, None), None);
    }

    #[test]
    fn test_paused_wins_over_activity() {
        for activity in ALL_ACTIVITIES {
            assert_eq!(map(MowerState::Paused, activity), Some(LawnMowerActivity::Paused));
        }
    }

    #[test]
    fn test_stopped_states_are_errors() {
        for state in [
            MowerState::WaitForSafetyPin,
            MowerState::Stopped,
            MowerState::FatalError,
            MowerState::Error,
        ] {
            for activity in ALL_ACTIVITIES {
                assert_eq!(map(state, activity), Some(LawnMowerActivity::Error));
            }
        }
    }

    #[test]
    fn test_operating_states() {
        for state in [
            MowerState::PendingStart,
            MowerState::InOperation,
            MowerState::Restricted,
        ] {
            assert_eq!(map(state, MowerActivity::Charging), Some(LawnMowerActivity::Docked));
            assert_eq!(map(state, MowerActivity::Parked), Some(LawnMowerActivity::Docked));
            assert_eq!(map(state, MowerActivity::GoingOut), Some(LawnMowerActivity::Mowing));
            assert_eq!(map(state, MowerActivity::Mowing), Some(LawnMowerActivity::Mowing));
            assert_eq!(map(state, MowerActivity::GoingHome), Some(LawnMowerActivity::Mowing));
            assert_eq!(map(state, MowerActivity::None), Some(LawnMowerActivity::Error));
            assert_eq!(
                map(state, MowerActivity::StoppedInGarden),
                Some(LawnMowerActivity::Error)
            );
        }
    }

    #[test]
    fn test_unlisted_states_fall_back_to_error() {
        for state in [MowerState::Off, MowerState::Unknown(42)] {
            for activity in ALL_ACTIVITIES {
                assert_eq!(map(state, activity), Some(LawnMowerActivity::Error));
            }
        }
    }

    #[test]
    fn test_examples() {
        assert_eq!(
            map(MowerState::PendingStart, MowerActivity::Charging),
            Some(LawnMowerActivity::Docked)
        );
        assert_eq!(
            map(MowerState::InOperation, MowerActivity::Mowing),
            Some(LawnMowerActivity::Mowing)
        );
    }
}
