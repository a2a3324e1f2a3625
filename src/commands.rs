//! Single-character operator commands.
//!
//! The web page and the serial console both send one character per
//! command. [`Command::from_char`] decodes it (case-insensitive) and
//! [`SystemContext::handle_command`](crate::SystemContext::handle_command)
//! executes it, returning a [`CommandReply`] with a message for the operator.
//!
//! # Command Table
//!
//! | Key | Command | Effect |
//! |-----|---------|--------|
//! | `W` | [`StartWireLearning`](Command::StartWireLearning) | Activate wire learning |
//! | `U` | [`StartAutomatic`](Command::StartAutomatic) | Activate automatic cycling |
//! | `M` | [`StartManual`](Command::StartManual) | Activate manual control |
//! | `V` | [`StartValidation`](Command::StartValidation) | Begin the sensor handshake |
//! | `H` | [`ConfirmHall`](Command::ConfirmHall) | Confirm the wheel rotation |
//! | `C` | [`ConfirmAccel`](Command::ConfirmAccel) | Confirm the trolley shake |
//! | `A` | [`ArmEsc`](Command::ArmEsc) | Manual: arm the ESC |
//! | `D` | [`DisarmEsc`](Command::DisarmEsc) | Manual: disarm the ESC |
//! | `F` | [`Forward`](Command::Forward) | Manual: default speed forward |
//! | `B` | [`Backward`](Command::Backward) | Manual: default speed backward |
//! | `S` | [`Stop`](Command::Stop) | Manual: stop the motor |
//! | `+` | [`SpeedUp`](Command::SpeedUp) | Manual: one speed step up |
//! | `-` | [`SlowDown`](Command::SlowDown) | Manual: one speed step down |
//! | `Q` | [`StopMode`](Command::StopMode) | Stop the current mode gracefully |
//! | `I` | [`Interrupt`](Command::Interrupt) | Stop the current mode immediately |
//! | `E` | [`EmergencyStop`](Command::EmergencyStop) | Emergency stop everything |
//! | `R` | [`Reset`](Command::Reset) | Reset the whole system |
//! | `T` | [`Status`](Command::Status) | One-line status |
//!
//! # Example
//!
//! ```rust
//! use trolley_core::Command;
//!
//! assert_eq!(Command::from_char('w'), Some(Command::StartWireLearning));
//! assert_eq!(Command::from_char('+'), Some(Command::SpeedUp));
//! assert_eq!(Command::from_char('x'), None);
//! assert_eq!(Command::EmergencyStop.as_char(), 'E');
//! ```

use crate::config::LongString;
use crate::manual::ManualCommand;

// ============================================================================
// Command Source
// ============================================================================

/// Where a command came from. Logged with every manual command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum CommandSource {
    /// UART console.
    Serial,
    /// Browser control page.
    WebUi,
    /// Programmatic HTTP client.
    Api,
}

impl CommandSource {
    /// Returns the source as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandSource::Serial => "serial",
            CommandSource::WebUi => "web_ui",
            CommandSource::Api => "api",
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// Operator command decoded from a single character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum Command {
    /// `W`
    StartWireLearning,
    /// `U`
    StartAutomatic,
    /// `M`
    StartManual,
    /// `V`
    StartValidation,
    /// `H`
    ConfirmHall,
    /// `C`
    ConfirmAccel,
    /// `A`
    ArmEsc,
    /// `D`
    DisarmEsc,
    /// `F`
    Forward,
    /// `B`
    Backward,
    /// `S`
    Stop,
    /// `+`
    SpeedUp,
    /// `-`
    SlowDown,
    /// `Q`
    StopMode,
    /// `I`
    Interrupt,
    /// `E`
    EmergencyStop,
    /// `R`
    Reset,
    /// `T`
    Status,
}

impl Command {
    /// Every command, in table order.
    pub const ALL: [Command; 18] = [
        Command::StartWireLearning,
        Command::StartAutomatic,
        Command::StartManual,
        Command::StartValidation,
        Command::ConfirmHall,
        Command::ConfirmAccel,
        Command::ArmEsc,
        Command::DisarmEsc,
        Command::Forward,
        Command::Backward,
        Command::Stop,
        Command::SpeedUp,
        Command::SlowDown,
        Command::StopMode,
        Command::Interrupt,
        Command::EmergencyStop,
        Command::Reset,
        Command::Status,
    ];

    /// Decode a command character (case-insensitive).
    pub fn from_char(c: char) -> Option<Self> {
        let cmd = match c.to_ascii_uppercase() {
            'W' => Command::StartWireLearning,
            'U' => Command::StartAutomatic,
            'M' => Command::StartManual,
            'V' => Command::StartValidation,
            'H' => Command::ConfirmHall,
            'C' => Command::ConfirmAccel,
            'A' => Command::ArmEsc,
            'D' => Command::DisarmEsc,
            'F' => Command::Forward,
            'B' => Command::Backward,
            'S' => Command::Stop,
            '+' => Command::SpeedUp,
            '-' => Command::SlowDown,
            'Q' => Command::StopMode,
            'I' => Command::Interrupt,
            'E' => Command::EmergencyStop,
            'R' => Command::Reset,
            'T' => Command::Status,
            _ => return None,
        };
        Some(cmd)
    }

    /// The character that encodes this command.
    pub const fn as_char(&self) -> char {
        match self {
            Command::StartWireLearning => 'W',
            Command::StartAutomatic => 'U',
            Command::StartManual => 'M',
            Command::StartValidation => 'V',
            Command::ConfirmHall => 'H',
            Command::ConfirmAccel => 'C',
            Command::ArmEsc => 'A',
            Command::DisarmEsc => 'D',
            Command::Forward => 'F',
            Command::Backward => 'B',
            Command::Stop => 'S',
            Command::SpeedUp => '+',
            Command::SlowDown => '-',
            Command::StopMode => 'Q',
            Command::Interrupt => 'I',
            Command::EmergencyStop => 'E',
            Command::Reset => 'R',
            Command::Status => 'T',
        }
    }

    /// Returns the command as a snake_case string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::StartWireLearning => "start_wire_learning",
            Command::StartAutomatic => "start_automatic",
            Command::StartManual => "start_manual",
            Command::StartValidation => "start_validation",
            Command::ConfirmHall => "confirm_hall",
            Command::ConfirmAccel => "confirm_accel",
            Command::ArmEsc => "arm_esc",
            Command::DisarmEsc => "disarm_esc",
            Command::Forward => "forward",
            Command::Backward => "backward",
            Command::Stop => "stop",
            Command::SpeedUp => "speed_up",
            Command::SlowDown => "slow_down",
            Command::StopMode => "stop_mode",
            Command::Interrupt => "interrupt",
            Command::EmergencyStop => "emergency_stop",
            Command::Reset => "reset",
            Command::Status => "status",
        }
    }

    /// The manual mode command this maps to, if any.
    ///
    /// `E` is not included: it always stops everything, not just the
    /// manual engine.
    pub const fn manual_command(&self) -> Option<ManualCommand> {
        match self {
            Command::ArmEsc => Some(ManualCommand::ArmEsc),
            Command::DisarmEsc => Some(ManualCommand::DisarmEsc),
            Command::Forward => Some(ManualCommand::Forward),
            Command::Backward => Some(ManualCommand::Backward),
            Command::Stop => Some(ManualCommand::Stop),
            Command::SpeedUp => Some(ManualCommand::IncreaseSpeed),
            Command::SlowDown => Some(ManualCommand::DecreaseSpeed),
            _ => None,
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// Outcome of a command, for the operator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct CommandReply {
    /// Command that was handled
    pub command: Command,
    /// Whether it took effect
    pub success: bool,
    /// Human-readable outcome
    pub message: LongString,
}

impl CommandReply {
    /// Successful reply.
    pub fn ok(command: Command, message: LongString) -> Self {
        Self {
            command,
            success: true,
            message,
        }
    }

    /// Failed reply.
    pub fn failed(command: Command, message: LongString) -> Self {
        Self {
            command,
            success: false,
            message,
        }
    }
}
