use anyhow::{anyhow, bail, Context, Result};

use crate::{
    instance::Instance,
    models::{PlaybackState, SessionType, TimerSession, Track, TrackSource},
};

/// One line typed into the terminal front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Skip,
    Reset,
    Goal(Option<String>),
    Mode(SessionType),
    Play,
    Stop,
    Toggle,
    Volume(u32),
    Track(String),
    AddTrack { id: String, path: String },
    RemoveTrack(String),
    Tracks,
    History,
    Status,
    Yield,
    /// Re-read settings; an Idle timer picks up new durations.
    Reload,
    Quit,
}

pub const HELP: &str = "commands: start pause resume skip reset goal <id>|none \
mode work|break|long play stop toggle volume <0-100> track <id> add <id> <file> \
remove <id> tracks history status yield reload quit";

pub fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };
    let arg = words.next();

    let command = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("start", None) => Command::Start,
        ("pause", None) => Command::Pause,
        ("resume", None) => Command::Resume,
        ("skip", None) => Command::Skip,
        ("reset", None) => Command::Reset,
        ("goal", Some("none")) => Command::Goal(None),
        ("goal", Some(id)) => Command::Goal(Some(id.to_string())),
        ("mode", Some(mode)) => Command::Mode(parse_mode(mode)?),
        ("play", None) => Command::Play,
        ("stop", None) => Command::Stop,
        ("toggle", None) => Command::Toggle,
        ("volume", Some(level)) => Command::Volume(
            level
                .parse()
                .with_context(|| format!("volume must be a number, got '{level}'"))?,
        ),
        ("track", Some(id)) => Command::Track(id.to_string()),
        ("add", Some(id)) => {
            let path = words.collect::<Vec<_>>().join(" ");
            if path.is_empty() {
                bail!("usage: add <id> <file>");
            }
            return Ok(Command::AddTrack {
                id: id.to_string(),
                path,
            });
        }
        ("remove", Some(id)) => Command::RemoveTrack(id.to_string()),
        ("tracks", None) => Command::Tracks,
        ("history", None) => Command::History,
        ("status", None) => Command::Status,
        ("yield", None) => Command::Yield,
        ("reload", None) => Command::Reload,
        ("quit" | "exit", None) => Command::Quit,
        _ => return Err(anyhow!("unrecognised command '{}'\n{HELP}", line.trim())),
    };

    if words.next().is_some() {
        bail!("too many arguments for '{verb}'");
    }
    Ok(command)
}

fn parse_mode(mode: &str) -> Result<SessionType> {
    match mode {
        "work" => Ok(SessionType::Work),
        "break" => Ok(SessionType::Break),
        "long" | "longbreak" => Ok(SessionType::LongBreak),
        other => bail!("unknown mode '{other}' (work, break, long)"),
    }
}

/// Runs `command` against `instance` and returns the line to print.
pub async fn execute(instance: &Instance, command: Command) -> Result<String> {
    let timer = instance.timer();
    let playback = instance.playback();

    let reply = match command {
        Command::Start => describe_timer(&timer.start().await?),
        Command::Pause => describe_timer(&timer.pause().await?),
        Command::Resume => describe_timer(&timer.resume().await?),
        Command::Skip => describe_timer(&timer.skip().await),
        Command::Reset => describe_timer(&timer.reset().await),
        Command::Goal(goal) => {
            let session = timer.select_goal(goal).await;
            match session.selected_goal_ref {
                Some(goal) => format!("goal set to {goal}"),
                None => "goal cleared".to_string(),
            }
        }
        Command::Mode(session_type) => describe_timer(&timer.select_session_type(session_type).await?),
        Command::Play => describe_playback(&playback.set_playing(true).await),
        Command::Stop => describe_playback(&playback.set_playing(false).await),
        Command::Toggle => describe_playback(&playback.toggle().await),
        Command::Volume(level) => describe_playback(&playback.set_volume(level).await),
        Command::Track(id) => describe_playback(&playback.select_track(&id).await?),
        Command::AddTrack { id, path } => {
            playback
                .add_custom_track(Track::new(id.clone(), id.clone(), TrackSource::File(path)))
                .await?;
            format!("added {id}")
        }
        Command::RemoveTrack(id) => {
            let removed = playback.remove_track(&id).await?;
            format!("removed {}", removed.id)
        }
        Command::Tracks => playback
            .tracks()
            .iter()
            .map(|track| format!("{:<16} {}", track.id, track.title))
            .collect::<Vec<_>>()
            .join("\n"),
        Command::History => {
            let history = timer.history().await?;
            if history.is_empty() {
                "no completed sessions yet".to_string()
            } else {
                history
                    .iter()
                    .map(|entry| {
                        format!(
                            "{}  {:<9} {:>3} min{}",
                            entry.completed_at.format("%Y-%m-%d %H:%M"),
                            entry.session_type.as_str(),
                            entry.duration_minutes(),
                            entry
                                .goal_ref
                                .as_deref()
                                .map(|goal| format!("  goal {goal}"))
                                .unwrap_or_default()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Status => {
            let local = instance.local_state().await;
            let role = if instance.is_leader() { "leader" } else { "follower" };
            format!(
                "{}\n{}\n{role}",
                describe_timer(&local.timer),
                describe_playback(&local.playback)
            )
        }
        Command::Yield => {
            if instance.is_leader() {
                instance.yield_leadership();
                "stepping down".to_string()
            } else {
                "not the leader".to_string()
            }
        }
        Command::Reload => describe_timer(&timer.refresh_durations().await),
        Command::Quit => String::new(),
    };
    Ok(reply)
}

fn describe_timer(session: &TimerSession) -> String {
    format!(
        "{} {} {:02}:{:02}",
        session.session_type.as_str(),
        session.status.as_str(),
        session.time_remaining_seconds / 60,
        session.time_remaining_seconds % 60
    )
}

fn describe_playback(state: &PlaybackState) -> String {
    format!(
        "{} {} at volume {}",
        if state.desired_playing { "playing" } else { "stopped" },
        state.track_ref().unwrap_or("(no track)"),
        state.volume
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_command_surface() {
        assert_eq!(parse_command("start").unwrap(), Command::Start);
        assert_eq!(parse_command("  VOLUME 70 ").unwrap(), Command::Volume(70));
        assert_eq!(parse_command("goal none").unwrap(), Command::Goal(None));
        assert_eq!(
            parse_command("goal g-12").unwrap(),
            Command::Goal(Some("g-12".into()))
        );
        assert_eq!(
            parse_command("mode long").unwrap(),
            Command::Mode(SessionType::LongBreak)
        );
        assert_eq!(
            parse_command("add cafe /music/cafe ambience.ogg").unwrap(),
            Command::AddTrack {
                id: "cafe".into(),
                path: "/music/cafe ambience.ogg".into()
            }
        );
        assert_eq!(parse_command("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_command("").is_err());
        assert!(parse_command("volume loud").is_err());
        assert!(parse_command("mode nap").is_err());
        assert!(parse_command("start now").is_err());
        assert!(parse_command("add cafe").is_err());
        assert!(parse_command("dance").is_err());
    }
}
