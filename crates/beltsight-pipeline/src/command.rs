// beltsight-pipeline/src/command.rs
//
// Operator commands, queued from any thread and applied by the loop at the
// start of the next iteration.  Text form (one per line):
//   q | quit            stop
//   1 | 2 | 3           frame skip
//   c                   toggle conveyor mode
//   s <m/s>             manual belt speed (0 = back to measured)
//   l                   toggle low-latency mode
//   mode <name>         speed | balanced | quality | low_latency
//   fps <n>             target fps

use crate::Mode;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Stop,
    SetFrameSkip(u32),
    ToggleConveyor,
    SetConveyorSpeed(f32),
    ToggleLowLatency,
    SelectMode(Mode),
    SetTargetFps(u32),
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` needs {expected}")]
    BadArgument { command: &'static str, expected: &'static str },
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let head = parts.next().ok_or(CommandParseError::Empty)?;
        let arg = parts.next();

        let cmd = match head.to_ascii_lowercase().as_str() {
            "q" | "quit" | "stop" => Command::Stop,
            "1" => Command::SetFrameSkip(1),
            "2" => Command::SetFrameSkip(2),
            "3" => Command::SetFrameSkip(3),
            "c" | "conveyor" => Command::ToggleConveyor,
            "l" | "low-latency" | "low_latency" => Command::ToggleLowLatency,
            "s" | "speed" => {
                let speed = arg
                    .and_then(|a| a.parse::<f32>().ok())
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .ok_or(CommandParseError::BadArgument { command: "s", expected: "a speed in m/s >= 0" })?;
                Command::SetConveyorSpeed(speed)
            }
            "mode" => {
                let mode = arg
                    .and_then(|a| a.parse::<Mode>().ok())
                    .ok_or(CommandParseError::BadArgument {
                        command: "mode",
                        expected: "speed, balanced, quality or low_latency",
                    })?;
                Command::SelectMode(mode)
            }
            "fps" => {
                let fps = arg
                    .and_then(|a| a.parse::<u32>().ok())
                    .filter(|f| *f > 0)
                    .ok_or(CommandParseError::BadArgument { command: "fps", expected: "a positive integer" })?;
                Command::SetTargetFps(fps)
            }
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}
