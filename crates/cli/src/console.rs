// Interactive commands read from stdin while a job runs

use std::str::FromStr;

use multirun_engine::{JobError, MultiRunJob};

/// One console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Pause,
    Resume,
    Stop,
    Abort,
    /// Change the number of bots
    Bots(usize),
    Stats,
    SkipWait,
    Trigger,
    /// Reload the proxy sources
    Reload,
    Help,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsoleParseError {
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),

    #[error("'bots' expects a number, got '{0}'")]
    InvalidBots(String),
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();

        match command.as_str() {
            "pause" | "p" => Ok(Self::Pause),
            "resume" | "r" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            "abort" => Ok(Self::Abort),
            "bots" | "b" => {
                let value = words.next().unwrap_or_default();
                value
                    .parse()
                    .map(Self::Bots)
                    .map_err(|_| ConsoleParseError::InvalidBots(value.to_string()))
            }
            "stats" | "s" | "" => Ok(Self::Stats),
            "skip-wait" | "skip" => Ok(Self::SkipWait),
            "trigger" => Ok(Self::Trigger),
            "reload" => Ok(Self::Reload),
            "help" | "?" => Ok(Self::Help),
            other => Err(ConsoleParseError::Unknown(other.to_string())),
        }
    }
}

pub const HELP: &str = "commands: pause, resume, stop, abort, bots <n>, stats, skip-wait, trigger, reload, help";

/// Apply a command to the job and return the line to print
pub async fn apply(job: &MultiRunJob, command: ConsoleCommand) -> Result<String, JobError> {
    match command {
        ConsoleCommand::Pause => job.pause().await.map(|_| "paused".to_string()),
        ConsoleCommand::Resume => job.resume().await.map(|_| "resumed".to_string()),
        ConsoleCommand::Stop => job.stop().await.map(|_| "stopping".to_string()),
        ConsoleCommand::Abort => job.abort().await.map(|_| "aborting".to_string()),
        ConsoleCommand::Bots(bots) => job
            .change_bots(bots)
            .await
            .map(|_| format!("bots set to {bots}")),
        ConsoleCommand::Stats => Ok(job.snapshot().summary_line()),
        ConsoleCommand::SkipWait => job.skip_wait().await.map(|_| "start wait skipped".to_string()),
        ConsoleCommand::Trigger => job.trigger().await.map(|_| "triggered".to_string()),
        ConsoleCommand::Reload => job
            .reload_proxies()
            .await
            .map(|count| format!("{count} proxies loaded")),
        ConsoleCommand::Help => Ok(HELP.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("pause".parse(), Ok(ConsoleCommand::Pause));
        assert_eq!("  RESUME ".parse(), Ok(ConsoleCommand::Resume));
        assert_eq!("bots 40".parse(), Ok(ConsoleCommand::Bots(40)));
        assert_eq!("".parse(), Ok(ConsoleCommand::Stats));
        assert_eq!("skip-wait".parse(), Ok(ConsoleCommand::SkipWait));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "bots many".parse::<ConsoleCommand>(),
            Err(ConsoleParseError::InvalidBots("many".into()))
        );
        assert_eq!(
            "launch".parse::<ConsoleCommand>(),
            Err(ConsoleParseError::Unknown("launch".into()))
        );
    }
}
