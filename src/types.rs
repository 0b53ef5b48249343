//! Strongly typed codes shared by the controller, engine and telemetry
//!
//! Each concern gets its own enum. The numeric codes are the ones reported
//! in telemetry records and accepted by remote commands; they never cross
//! between enums.

use serde::{Deserialize, Serialize};

/// Number of AC outlet relays on the cabinet
pub const MAX_RELAYS: usize = 4;

/// Top-level operating mode of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RunState {
    Startup = 0,
    Standby = 1,
    TimedOn = 3,
    AutoOff = 4,
    AutoOn = 5,
    AlwaysOn = 6,
    Sleeping = 7,
    ChargedOn = 8,
    ChargedOnUsbC = 9,
    GoToStandby = 21,
    GoToTimedOn = 23,
    GoToAuto = 25,
    GoToAlwaysOn = 26,
    GoToSleep = 27,
    GoToChargedOn = 28,
    GoToChargedOnUsbC = 29,
    ChargedOnAuto = 78,
    ChargedOnUsbCAuto = 79,
    Restart = 88,
    WebSmartExit = 90,
    WebRestart = 91,
    WebFactoryReset = 92,
    WebStandby = 93,
    WebHibernate = 94,
    WebAuto = 95,
    WebChargedOn = 96,
    WebAlwaysOn = 97,
    WebTimedOn = 98,
    WebSmartAuto = 99,
    GoToChargedOnAuto = 178,
    GoToChargedOnUsbCAuto = 179,
    WebChargedOnUsbC = 196,
}

impl RunState {
    /// Every run state, in code order
    pub const ALL: [RunState; 32] = [
        RunState::Startup,
        RunState::Standby,
        RunState::TimedOn,
        RunState::AutoOff,
        RunState::AutoOn,
        RunState::AlwaysOn,
        RunState::Sleeping,
        RunState::ChargedOn,
        RunState::ChargedOnUsbC,
        RunState::GoToStandby,
        RunState::GoToTimedOn,
        RunState::GoToAuto,
        RunState::GoToAlwaysOn,
        RunState::GoToSleep,
        RunState::GoToChargedOn,
        RunState::GoToChargedOnUsbC,
        RunState::ChargedOnAuto,
        RunState::ChargedOnUsbCAuto,
        RunState::Restart,
        RunState::WebSmartExit,
        RunState::WebRestart,
        RunState::WebFactoryReset,
        RunState::WebStandby,
        RunState::WebHibernate,
        RunState::WebAuto,
        RunState::WebChargedOn,
        RunState::WebAlwaysOn,
        RunState::WebTimedOn,
        RunState::WebSmartAuto,
        RunState::GoToChargedOnAuto,
        RunState::GoToChargedOnUsbCAuto,
        RunState::WebChargedOnUsbC,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    /// Externally presented state
    pub fn view(self) -> ViewState {
        use RunState::*;
        match self {
            GoToSleep | Sleeping | WebHibernate => ViewState::Sleeping,
            WebTimedOn | TimedOn | GoToTimedOn => ViewState::TimedOn,
            WebAuto | GoToAuto | AutoOff => ViewState::AutoOff,
            AutoOn => ViewState::AutoOn,
            WebAlwaysOn | GoToAlwaysOn | AlwaysOn => ViewState::On,
            WebChargedOn | ChargedOn | GoToChargedOn => ViewState::ChargedOn,
            WebChargedOnUsbC | ChargedOnUsbC | GoToChargedOnUsbC => ViewState::ChargedOnUsbC,
            GoToChargedOnAuto | ChargedOnAuto => ViewState::ChargedOnAuto,
            GoToChargedOnUsbCAuto | ChargedOnUsbCAuto => ViewState::ChargedOnUsbCAuto,
            Startup | Restart | Standby | GoToStandby | WebStandby | WebRestart
            | WebFactoryReset | WebSmartExit | WebSmartAuto => ViewState::Standby,
        }
    }

    /// States that exist only to carry a command acknowledgement
    pub fn is_web_transitional(self) -> bool {
        use RunState::*;
        matches!(
            self,
            WebSmartExit
                | WebRestart
                | WebFactoryReset
                | WebStandby
                | WebHibernate
                | WebAuto
                | WebChargedOn
                | WebAlwaysOn
                | WebTimedOn
                | WebSmartAuto
                | WebChargedOnUsbC
        )
    }

    /// One-time setup states that fall into a steady state
    pub fn is_entering(self) -> bool {
        use RunState::*;
        matches!(
            self,
            GoToStandby
                | GoToTimedOn
                | GoToAuto
                | GoToAlwaysOn
                | GoToSleep
                | GoToChargedOn
                | GoToChargedOnUsbC
                | GoToChargedOnAuto
                | GoToChargedOnUsbCAuto
        )
    }

    /// Smart charge steady states
    pub fn is_smart_charge(self) -> bool {
        use RunState::*;
        matches!(
            self,
            ChargedOn | ChargedOnAuto | ChargedOnUsbC | ChargedOnUsbCAuto
        )
    }

    pub fn is_usbc(self) -> bool {
        use RunState::*;
        matches!(
            self,
            ChargedOnUsbC | ChargedOnUsbCAuto | GoToChargedOnUsbC | GoToChargedOnUsbCAuto
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Run state as reported to the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ViewState {
    Standby = 1,
    TimedOn = 3,
    AutoOff = 4,
    AutoOn = 5,
    On = 6,
    Sleeping = 7,
    ChargedOn = 8,
    ChargedOnAuto = 9,
    ChargedOnUsbC = 15,
    ChargedOnUsbCAuto = 16,
}

impl ViewState {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Derived mains/charging status, recomputed every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PowerState {
    MainsOff = 100,
    MainsOn = 101,
    Charging = 105,
}

impl PowerState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn derive(mains_present: bool, charge: ChargeState) -> Self {
        if !mains_present {
            PowerState::MainsOff
        } else if charge.is_active() {
            PowerState::Charging
        } else {
            PowerState::MainsOn
        }
    }

    pub fn has_mains(self) -> bool {
        !matches!(self, PowerState::MainsOff)
    }
}

/// Progress marker within a charge session
///
/// Declaration order is progression order, so `Ord` compares progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChargeState {
    NotCharging = 0,
    Charging = 1,
    FullRateCharging = 2,
    RateMonitoring = 7,
    Done = 9,
    Ended = 10,
}

impl ChargeState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_active(self) -> bool {
        self != ChargeState::NotCharging
    }
}

/// Policy applied to choose the run state at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum PowerOnPolicy {
    Last = 0,
    Standby = 1,
    TimedOn = 3,
    #[default]
    Continuous = 6,
    SmartAc = 7,
    SmartUsb = 8,
}

impl PowerOnPolicy {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Unknown codes fall back to continuous power
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => PowerOnPolicy::Last,
            1 => PowerOnPolicy::Standby,
            3 => PowerOnPolicy::TimedOn,
            7 => PowerOnPolicy::SmartAc,
            8 => PowerOnPolicy::SmartUsb,
            _ => PowerOnPolicy::Continuous,
        }
    }
}

/// Why the controller last suspended or reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ResumeCause {
    #[default]
    None = 0,
    OutOfMemory = 1,
    Watchdog = 2,
    MainsOff = 3,
    Overheat = 4,
    WebCommand = 10,
    HardReset = 88,
    Hibernate = 93,
    DeepPowerDown = 98,
}

impl ResumeCause {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Kind of weekly schedule loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScheduleKind {
    #[default]
    None,
    /// Relays follow the on/off slots
    OnOff,
    /// "On" slots start a smart charge
    SmartStart,
}

impl ScheduleKind {
    /// Single-letter tag used in telemetry
    pub fn tag(self) -> &'static str {
        match self {
            ScheduleKind::None => "N",
            ScheduleKind::OnOff => "C",
            ScheduleKind::SmartStart => "O",
        }
    }
}

/// Daylight saving handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DstMode {
    #[default]
    Off,
    On,
    Auto,
}

impl DstMode {
    pub fn code(self) -> u8 {
        match self {
            DstMode::Off => 0,
            DstMode::On => 1,
            DstMode::Auto => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DstMode::Off),
            1 => Some(DstMode::On),
            2 => Some(DstMode::Auto),
            _ => None,
        }
    }
}

/// Phase of a smart charge cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SmartPhase {
    #[default]
    Idle,
    WarmUp,
    Charge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_codes_are_unique() {
        for (i, a) in RunState::ALL.iter().enumerate() {
            for b in RunState::ALL.iter().skip(i + 1) {
                assert_ne!(a.code(), b.code(), "{:?} and {:?} share a code", a, b);
            }
            assert_eq!(RunState::from_code(a.code()), Some(*a));
        }
        assert_eq!(RunState::from_code(2), None);
    }

    #[test]
    fn test_view_mapping() {
        assert_eq!(RunState::AutoOn.view(), ViewState::AutoOn);
        assert_eq!(RunState::GoToAuto.view(), ViewState::AutoOff);
        assert_eq!(RunState::WebHibernate.view(), ViewState::Sleeping);
        assert_eq!(RunState::GoToChargedOnUsbCAuto.view(), ViewState::ChargedOnUsbCAuto);
        assert_eq!(RunState::Restart.view(), ViewState::Standby);
        assert_eq!(ViewState::ChargedOnUsbC.code(), 15);
    }

    #[test]
    fn test_power_state_derivation() {
        assert_eq!(
            PowerState::derive(false, ChargeState::Charging),
            PowerState::MainsOff
        );
        assert_eq!(
            PowerState::derive(true, ChargeState::RateMonitoring),
            PowerState::Charging
        );
        assert_eq!(
            PowerState::derive(true, ChargeState::NotCharging),
            PowerState::MainsOn
        );
    }

    #[test]
    fn test_charge_state_progression_order() {
        assert!(ChargeState::FullRateCharging < ChargeState::RateMonitoring);
        assert!(ChargeState::Done < ChargeState::Ended);
        assert_eq!(ChargeState::RateMonitoring.code(), 7);
    }

    #[test]
    fn test_power_on_policy_fallback() {
        assert_eq!(PowerOnPolicy::from_code(0), PowerOnPolicy::Last);
        assert_eq!(PowerOnPolicy::from_code(8), PowerOnPolicy::SmartUsb);
        assert_eq!(PowerOnPolicy::from_code(42), PowerOnPolicy::Continuous);
    }
}
